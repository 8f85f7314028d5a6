//! Shared test utilities for performance optimization

use once_cell::sync::Lazy;
use std::path::PathBuf;

/// Cached binary path for the curlkit CLI to avoid repeated compilation
pub static CURLKIT_BIN: Lazy<PathBuf> = Lazy::new(|| assert_cmd::cargo::cargo_bin("curlkit"));

/// Test helper to create a command with the cached binary
pub fn curlkit_cmd() -> assert_cmd::Command {
    assert_cmd::Command::new(&*CURLKIT_BIN)
}
