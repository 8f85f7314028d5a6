//! Error handling for the curl-compatible execution engine.
//!
//! Every failure mode is mapped onto one of six [`ErrorKind`] categories —
//! configuration, setup, network, protocol, timeout, or policy — so callers
//! can branch on category (e.g. to pick a CLI exit code) without matching
//! on concrete variants. `ErrorContext` carries an optional structured
//! detail payload and a human-readable suggestion, following the same
//! builder shape regardless of which constructor produced the error.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Cow;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("{kind}: {message}")]
    Internal {
        kind: ErrorKind,
        message: Cow<'static, str>,
        context: Option<ErrorContext>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// The six error categories from the design's error-handling taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed command, unresolved strict variable, bad URL/method, conflicting TLS material.
    Configuration,
    /// Failure to read cert/CA files, build a TLS config, or build a proxy transport.
    Setup,
    /// DNS, connect, handshake, CONNECT non-200, read/write failure, pinning mismatch.
    Network,
    /// Malformed response, response size over the configured byte limit.
    Protocol,
    /// Deadline exceeded or the caller's context was cancelled.
    Timeout,
    /// Retries exhausted; carries the last underlying error.
    Policy,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "Configuration",
            Self::Setup => "Setup",
            Self::Network => "Network",
            Self::Protocol => "Protocol",
            Self::Timeout => "Timeout",
            Self::Policy => "Policy",
        };
        write!(f, "{s}")
    }
}

/// Additional context for an `Error::Internal`.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub details: Option<serde_json::Value>,
    pub suggestion: Option<Cow<'static, str>>,
}

impl ErrorContext {
    #[must_use]
    pub const fn with_details(details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            suggestion: None,
        }
    }

    #[must_use]
    pub fn with_suggestion(suggestion: impl Into<Cow<'static, str>>) -> Self {
        Self {
            details: None,
            suggestion: Some(suggestion.into()),
        }
    }

    #[must_use]
    pub fn and_suggestion(mut self, suggestion: impl Into<Cow<'static, str>>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// JSON representation of an error, used by the `--json-errors` CLI flag.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal { kind, .. } => *kind,
            Self::Io(_) | Self::Toml(_) | Self::Json(_) => ErrorKind::Setup,
            Self::Url(_) | Self::Tls(_) => ErrorKind::Configuration,
            Self::Anyhow(_) => ErrorKind::Setup,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> JsonError {
        let (kind, suggestion, details) = match self {
            Self::Internal {
                kind,
                context: ctx,
                ..
            } => (
                kind.to_string(),
                ctx.as_ref().and_then(|c| c.suggestion.clone()),
                ctx.as_ref().and_then(|c| c.details.clone()),
            ),
            other => (other.kind().to_string(), None, None),
        };
        JsonError {
            kind,
            message: self.to_string(),
            suggestion: suggestion.map(std::string::ToString::to_string),
            details,
        }
    }

    // --- Configuration errors --------------------------------------------

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn unresolved_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(format!("unresolved variable reference '${name}'")),
            context: Some(
                ErrorContext::with_details(json!({ "variable": name }))
                    .and_suggestion("supply the variable in the explicit map, or run the bare (environment) entry point"),
            ),
        }
    }

    pub fn unmatched_quote() -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Borrowed("unmatched quote in command"),
            context: None,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(format!("invalid or non-absolute URL: '{url}'")),
            context: Some(ErrorContext::with_details(json!({ "url": url }))),
        }
    }

    pub fn invalid_method(method: impl Into<String>) -> Self {
        let method = method.into();
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(format!("unrecognized HTTP method '{method}'")),
            context: None,
        }
    }

    pub fn malformed_credential(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn insecure_credentials_over_http() -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Borrowed(
                "basic-auth or bearer credentials set on an http:// URL without insecure-skip-verify",
            ),
            context: Some(ErrorContext::with_suggestion(
                "use https://, or set insecure-skip-verify as an explicit development escape hatch",
            )),
        }
    }

    pub fn conflicting_tls_material(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn unknown_cipher_suite(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(format!("unknown cipher suite '{name}'")),
            context: Some(ErrorContext::with_details(json!({ "cipher": name }))),
        }
    }

    pub fn invalid_cidr(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self::Internal {
            kind: ErrorKind::Configuration,
            message: Cow::Owned(format!("invalid CIDR in no-proxy pattern: '{pattern}'")),
            context: None,
        }
    }

    // --- Setup errors ------------------------------------------------------

    pub fn setup_error(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Setup,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    // --- Network errors ------------------------------------------------------

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Network,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn connect_tunnel_failed(status: u16) -> Self {
        Self::Internal {
            kind: ErrorKind::Network,
            message: Cow::Owned(format!("proxy CONNECT failed with status {status}")),
            context: Some(ErrorContext::with_details(json!({ "status": status }))),
        }
    }

    pub fn pinning_mismatch() -> Self {
        Self::Internal {
            kind: ErrorKind::Network,
            message: Cow::Borrowed(
                "server certificate chain did not match any pinned SHA-256 fingerprint",
            ),
            context: None,
        }
    }

    // --- Protocol errors ------------------------------------------------------

    pub fn body_too_large(limit: u64) -> Self {
        Self::Internal {
            kind: ErrorKind::Protocol,
            message: Cow::Owned(format!("response body exceeded the {limit}-byte limit")),
            context: Some(ErrorContext::with_details(json!({ "limit": limit }))),
        }
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Protocol,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    // --- Timeout / cancellation ---------------------------------------------

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Internal {
            kind: ErrorKind::Timeout,
            message: Cow::Owned(message.into()),
            context: None,
        }
    }

    pub fn deadline_exceeded() -> Self {
        Self::Internal {
            kind: ErrorKind::Timeout,
            message: Cow::Borrowed("deadline exceeded"),
            context: None,
        }
    }

    // --- Policy --------------------------------------------------------------

    pub fn retry_limit_exceeded(attempts: u32, last_error: impl Into<String>) -> Self {
        let last_error = last_error.into();
        Self::Internal {
            kind: ErrorKind::Policy,
            message: Cow::Owned(format!(
                "retries exhausted after {attempts} attempts: {last_error}"
            )),
            context: Some(ErrorContext::with_details(
                json!({ "attempts": attempts, "last_error": last_error }),
            )),
        }
    }
}
