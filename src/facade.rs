//! Convenience facade (§6 "Convenience facade"): a family of callable entry
//! points, each wrapping [`engine::process`] and differing only in how the
//! response body is shaped. Every facade has three parameter shapes —
//! `_command` (a single command string, environment-lenient), `_args` (an
//! already-tokenized argv list, environment-lenient), and `_with_vars`
//! (either input form plus an explicit variable map that replaces
//! environment expansion, strict).

use crate::engine::{self, EngineResponse};
use crate::error::Error;
use crate::request::RequestConfig;
use crate::variables::VariableResolver;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

fn config_from_command(command: &str, resolver: &VariableResolver) -> Result<RequestConfig, Error> {
    let config = RequestConfig::from_command(command, resolver)?;
    config.validate()?;
    Ok(config)
}

fn config_from_args(args: &[String], resolver: &VariableResolver) -> Result<RequestConfig, Error> {
    let config = RequestConfig::from_args(args, resolver)?;
    config.validate()?;
    Ok(config)
}

// --- Bare: the raw engine response, caller reads the body itself ---

/// Runs a command string under the lenient (environment) resolver and
/// returns the raw response (§6 "Bare").
///
/// # Errors
/// See [`RequestConfig::from_command`] and [`engine::process`].
pub async fn bare_command(command: &str) -> Result<EngineResponse, Error> {
    let config = config_from_command(command, &VariableResolver::environment())?;
    engine::process(&config).await
}

/// Runs an argv-style token list under the lenient resolver (§6 "Bare").
///
/// # Errors
/// See [`RequestConfig::from_args`] and [`engine::process`].
pub async fn bare_args(args: &[String]) -> Result<EngineResponse, Error> {
    let config = config_from_args(args, &VariableResolver::environment())?;
    engine::process(&config).await
}

/// Runs a command string under the strict explicit-variable resolver
/// (§6 "with-vars").
///
/// # Errors
/// See [`RequestConfig::from_command`] and [`engine::process`].
pub async fn bare_command_with_vars(
    command: &str,
    vars: HashMap<String, String>,
) -> Result<EngineResponse, Error> {
    let config = config_from_command(command, &VariableResolver::explicit(vars))?;
    engine::process(&config).await
}

/// Runs an argv-style token list under the strict explicit-variable
/// resolver (§6 "with-vars").
///
/// # Errors
/// See [`RequestConfig::from_args`] and [`engine::process`].
pub async fn bare_args_with_vars(
    args: &[String],
    vars: HashMap<String, String>,
) -> Result<EngineResponse, Error> {
    let config = config_from_args(args, &VariableResolver::explicit(vars))?;
    engine::process(&config).await
}

// --- String: body read fully into a String, response returned alongside ---

/// Runs `command` and returns the response with its body decoded as UTF-8
/// (lossily), alongside the response metadata (§6 "String").
///
/// # Errors
/// See [`bare_command`].
pub async fn string_command(command: &str) -> Result<(EngineResponse, String), Error> {
    let response = bare_command(command).await?;
    let body = response.body_as_string();
    Ok((response, body))
}

/// See [`string_command`]; argv form.
///
/// # Errors
/// See [`bare_args`].
pub async fn string_args(args: &[String]) -> Result<(EngineResponse, String), Error> {
    let response = bare_args(args).await?;
    let body = response.body_as_string();
    Ok((response, body))
}

/// See [`string_command`]; strict explicit-variable form.
///
/// # Errors
/// See [`bare_command_with_vars`].
pub async fn string_command_with_vars(
    command: &str,
    vars: HashMap<String, String>,
) -> Result<(EngineResponse, String), Error> {
    let response = bare_command_with_vars(command, vars).await?;
    let body = response.body_as_string();
    Ok((response, body))
}

/// See [`string_command`]; strict explicit-variable argv form.
///
/// # Errors
/// See [`bare_args_with_vars`].
pub async fn string_args_with_vars(
    args: &[String],
    vars: HashMap<String, String>,
) -> Result<(EngineResponse, String), Error> {
    let response = bare_args_with_vars(args, vars).await?;
    let body = response.body_as_string();
    Ok((response, body))
}

// --- Bytes: body read fully into a byte slice, response returned alongside ---

/// Runs `command` and returns the response with its raw body bytes
/// (§6 "Bytes"). `EngineResponse::body` is already a fully-read `Vec<u8>`,
/// so this is the same call as [`bare_command`] under a name matching the
/// facade table.
///
/// # Errors
/// See [`bare_command`].
pub async fn bytes_command(command: &str) -> Result<EngineResponse, Error> {
    bare_command(command).await
}

/// See [`bytes_command`]; argv form.
///
/// # Errors
/// See [`bare_args`].
pub async fn bytes_args(args: &[String]) -> Result<EngineResponse, Error> {
    bare_args(args).await
}

/// See [`bytes_command`]; strict explicit-variable form.
///
/// # Errors
/// See [`bare_command_with_vars`].
pub async fn bytes_command_with_vars(
    command: &str,
    vars: HashMap<String, String>,
) -> Result<EngineResponse, Error> {
    bare_command_with_vars(command, vars).await
}

/// See [`bytes_command`]; strict explicit-variable argv form.
///
/// # Errors
/// See [`bare_args_with_vars`].
pub async fn bytes_args_with_vars(
    args: &[String],
    vars: HashMap<String, String>,
) -> Result<EngineResponse, Error> {
    bare_args_with_vars(args, vars).await
}

// --- JSON: body decoded into a caller-supplied structured value ---

/// Runs `command` and decodes the body as `T` via JSON unmarshaling
/// (§6 "JSON").
///
/// # Errors
/// Returns [`Error::Json`] if the body is not valid JSON for `T`, in
/// addition to the errors [`bare_command`] can return.
pub async fn json_command<T: serde::de::DeserializeOwned>(command: &str) -> Result<(EngineResponse, T), Error> {
    let response = bare_command(command).await?;
    let value = serde_json::from_slice(&response.body)?;
    Ok((response, value))
}

/// See [`json_command`]; argv form.
///
/// # Errors
/// See [`json_command`].
pub async fn json_args<T: serde::de::DeserializeOwned>(args: &[String]) -> Result<(EngineResponse, T), Error> {
    let response = bare_args(args).await?;
    let value = serde_json::from_slice(&response.body)?;
    Ok((response, value))
}

/// See [`json_command`]; strict explicit-variable form.
///
/// # Errors
/// See [`json_command`].
pub async fn json_command_with_vars<T: serde::de::DeserializeOwned>(
    command: &str,
    vars: HashMap<String, String>,
) -> Result<(EngineResponse, T), Error> {
    let response = bare_command_with_vars(command, vars).await?;
    let value = serde_json::from_slice(&response.body)?;
    Ok((response, value))
}

/// See [`json_command`]; strict explicit-variable argv form.
///
/// # Errors
/// See [`json_command`].
pub async fn json_args_with_vars<T: serde::de::DeserializeOwned>(
    args: &[String],
    vars: HashMap<String, String>,
) -> Result<(EngineResponse, T), Error> {
    let response = bare_args_with_vars(args, vars).await?;
    let value = serde_json::from_slice(&response.body)?;
    Ok((response, value))
}

// --- Download: body streamed to a caller-specified path, bytes written returned ---

async fn write_download(response: &EngineResponse, destination: &Path) -> Result<u64, Error> {
    let mut file = tokio::fs::File::create(destination).await?;
    file.write_all(&response.body).await?;
    file.flush().await?;
    Ok(response.body.len() as u64)
}

/// Runs `command` and streams the body to `destination`, returning the
/// number of bytes written (§6 "Download").
///
/// # Errors
/// Returns [`Error::Io`] if the destination cannot be written, in addition
/// to the errors [`bare_command`] can return.
pub async fn download_command(command: &str, destination: &Path) -> Result<u64, Error> {
    let response = bare_command(command).await?;
    write_download(&response, destination).await
}

/// See [`download_command`]; argv form.
///
/// # Errors
/// See [`download_command`].
pub async fn download_args(args: &[String], destination: &Path) -> Result<u64, Error> {
    let response = bare_args(args).await?;
    write_download(&response, destination).await
}

/// See [`download_command`]; strict explicit-variable form.
///
/// # Errors
/// See [`download_command`].
pub async fn download_command_with_vars(
    command: &str,
    vars: HashMap<String, String>,
    destination: &Path,
) -> Result<u64, Error> {
    let response = bare_command_with_vars(command, vars).await?;
    write_download(&response, destination).await
}

/// See [`download_command`]; strict explicit-variable argv form.
///
/// # Errors
/// See [`download_command`].
pub async fn download_args_with_vars(
    args: &[String],
    vars: HashMap<String, String>,
    destination: &Path,
) -> Result<u64, Error> {
    let response = bare_args_with_vars(args, vars).await?;
    write_download(&response, destination).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_with_missing_variable_in_strict_mode_fails_before_dispatch() {
        let result = config_from_command("curl $MISSING_HOST/path", &VariableResolver::explicit(HashMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn command_with_missing_variable_in_lenient_mode_substitutes_empty() {
        let result = config_from_command("curl https://example.com/$MISSING_SUFFIX", &VariableResolver::environment());
        assert!(result.is_ok());
    }

    #[test]
    fn invalid_url_fails_validation_before_dispatch() {
        let result = config_from_command("curl not-a-url", &VariableResolver::environment());
        assert!(result.is_err());
    }
}
