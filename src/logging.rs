//! Request and response logging with automatic secret redaction (§4.H,
//! SPEC_FULL component J).
//!
//! Redaction covers three layers: known-sensitive header names, known-
//! sensitive query parameter names, and a dynamic [`SecretContext`] of
//! resolved credential values (basic-auth password, bearer token, any
//! variable the caller marks as sensitive) that get blanked wherever they
//! appear verbatim, including in the body.

use tracing::{debug, info, trace};

/// Minimum length for a secret to be redacted in body content, to avoid
/// false positives on short, incidentally-matching substrings.
const MIN_SECRET_LENGTH_FOR_BODY_REDACTION: usize = 8;

/// Resolved credential values to redact wherever they appear verbatim.
#[derive(Debug, Default, Clone)]
pub struct SecretContext {
    secrets: Vec<String>,
}

impl SecretContext {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a context from already-resolved secret values (the request's
    /// basic-auth password, bearer token, proxy credentials, and any
    /// explicit variable the caller flags as sensitive).
    #[must_use]
    pub fn from_values(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        secrets.sort();
        secrets.dedup();
        Self { secrets }
    }

    #[must_use]
    pub fn is_secret(&self, value: &str) -> bool {
        self.secrets.iter().any(|s| s == value)
    }

    #[must_use]
    pub fn redact_secrets_in_text(&self, text: &str) -> String {
        let mut result = text.to_string();
        for secret in &self.secrets {
            if secret.len() >= MIN_SECRET_LENGTH_FOR_BODY_REDACTION {
                result = result.replace(secret, "[REDACTED]");
            }
        }
        result
    }

    #[must_use]
    pub const fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }
}

#[must_use]
const fn http_status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Checks if a header name should always be redacted, independent of any
/// dynamic secret context.
#[must_use]
pub fn should_redact_header(header_name: &str) -> bool {
    let lower = header_name.to_lowercase();
    matches!(
        lower.as_str(),
        "authorization"
            | "proxy-authorization"
            | "x-api-key"
            | "x-api-token"
            | "api-key"
            | "api_key"
            | "x-access-token"
            | "x-auth-token"
            | "x-secret-token"
            | "token"
            | "secret"
            | "password"
            | "x-webhook-secret"
            | "cookie"
            | "set-cookie"
            | "x-csrf-token"
            | "x-xsrf-token"
            | "x-amz-security-token"
            | "private-token"
    )
}

#[must_use]
fn should_redact_query_param(param_name: &str) -> bool {
    let lower = param_name.to_lowercase();
    matches!(
        lower.as_str(),
        "api_key"
            | "apikey"
            | "api-key"
            | "key"
            | "token"
            | "access_token"
            | "accesstoken"
            | "auth_token"
            | "authtoken"
            | "bearer_token"
            | "refresh_token"
            | "secret"
            | "api_secret"
            | "client_secret"
            | "password"
            | "passwd"
            | "pwd"
            | "signature"
            | "sig"
            | "session_id"
            | "sessionid"
            | "auth"
            | "authorization"
            | "credentials"
    )
}

/// Redacts sensitive query parameter values from a URL string.
#[must_use]
pub fn redact_url_query_params(url: &str) -> String {
    let Some(query_start) = url.find('?') else {
        return url.to_string();
    };

    let base_url = &url[..query_start];
    let query_string = &url[query_start + 1..];

    let (query_part, fragment) =
        query_string
            .find('#')
            .map_or((query_string, None), |frag_start| {
                (
                    &query_string[..frag_start],
                    Some(&query_string[frag_start..]),
                )
            });

    let redacted_params: Vec<String> = query_part
        .split('&')
        .map(|param| {
            param.find('=').map_or_else(
                || param.to_string(),
                |eq_pos| {
                    let name = &param[..eq_pos];
                    if should_redact_query_param(name) {
                        format!("{name}=[REDACTED]")
                    } else {
                        param.to_string()
                    }
                },
            )
        })
        .collect();

    let mut result = format!("{base_url}?{}", redacted_params.join("&"));
    if let Some(frag) = fragment {
        result.push_str(frag);
    }
    result
}

fn redact_header_value(header_name: &str, value: &str, secret_ctx: Option<&SecretContext>) -> String {
    if should_redact_header(header_name) {
        return "[REDACTED]".to_string();
    }
    if secret_ctx.is_some_and(|ctx| ctx.is_secret(value)) {
        return "[REDACTED]".to_string();
    }
    value.to_string()
}

/// Logs an outgoing request at `info` (method/URL), `debug` (headers), and
/// `trace` (body) levels, each pass through redaction first.
pub fn log_request(
    method: &str,
    url: &str,
    headers: Option<&http::HeaderMap>,
    body: Option<&str>,
    secret_ctx: Option<&SecretContext>,
    trace_id: Option<&str>,
) {
    let redacted_url = redact_url_query_params(url);
    info!(target: "curlkit::engine", trace_id = trace_id.unwrap_or("-"), "→ {} {}", method.to_uppercase(), redacted_url);

    let Some(header_map) = headers else {
        log_body("Request body", body, usize::MAX, secret_ctx);
        return;
    };

    debug!(target: "curlkit::engine", "Request headers:");
    for (name, value) in header_map {
        let header_str = name.as_str();
        let raw_value = String::from_utf8_lossy(value.as_bytes()).to_string();
        let display_value = redact_header_value(header_str, &raw_value, secret_ctx);
        debug!(target: "curlkit::engine", "  {}: {}", header_str, display_value);
    }

    log_body("Request body", body, usize::MAX, secret_ctx);
}

/// Logs a response at `info` (status/duration), `debug` (headers), and
/// `trace` (truncated body) levels.
pub fn log_response(
    status: u16,
    duration_ms: u128,
    headers: Option<&http::HeaderMap>,
    body: Option<&str>,
    max_body_len: usize,
    secret_ctx: Option<&SecretContext>,
    trace_id: Option<&str>,
) {
    info!(
        target: "curlkit::engine",
        trace_id = trace_id.unwrap_or("-"),
        "← {} {} ({}ms)",
        status,
        http_status_text(status),
        duration_ms
    );

    let Some(header_map) = headers else {
        log_body("Response body", body, max_body_len, secret_ctx);
        return;
    };

    debug!(target: "curlkit::engine", "Response headers:");
    for (name, value) in header_map {
        let header_str = name.as_str();
        let raw_value = String::from_utf8_lossy(value.as_bytes()).to_string();
        let display_value = redact_header_value(header_str, &raw_value, secret_ctx);
        debug!(target: "curlkit::engine", "  {}: {}", header_str, display_value);
    }

    log_body("Response body", body, max_body_len, secret_ctx);
}

fn log_body(label: &str, body: Option<&str>, max_body_len: usize, secret_ctx: Option<&SecretContext>) {
    let Some(body_content) = body else {
        return;
    };
    let redacted = secret_ctx.map_or_else(
        || body_content.to_string(),
        |ctx| ctx.redact_secrets_in_text(body_content),
    );
    if redacted.len() > max_body_len {
        trace!(target: "curlkit::engine", "{}: {} (truncated at {} chars)", label, &redacted[..max_body_len], max_body_len);
    } else {
        trace!(target: "curlkit::engine", "{}: {}", label, redacted);
    }
}

/// Reads the response-body log-truncation limit from `CURLKIT_LOG_MAX_BODY`,
/// defaulting to 1000 characters.
#[must_use]
pub fn get_max_body_len() -> usize {
    std::env::var("CURLKIT_LOG_MAX_BODY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_known_sensitive_headers() {
        assert!(should_redact_header("Authorization"));
        assert!(should_redact_header("X-API-Key"));
        assert!(should_redact_header("Proxy-Authorization"));
        assert!(should_redact_header("Cookie"));
        assert!(!should_redact_header("Content-Type"));
        assert!(!should_redact_header("X-Request-Id"));
    }

    #[test]
    fn redacts_known_sensitive_query_params() {
        let url = "https://api.example.com/users?api_key=secret123&page=1";
        assert_eq!(
            redact_url_query_params(url),
            "https://api.example.com/users?api_key=[REDACTED]&page=1"
        );
    }

    #[test]
    fn preserves_fragment_and_non_sensitive_params() {
        let url = "https://api.example.com/users?page=1&limit=10#top";
        assert_eq!(redact_url_query_params(url), url);
    }

    #[test]
    fn secret_context_redacts_body_occurrences() {
        let ctx = SecretContext::from_values(["sk_live_abcdef1234".to_string()]);
        let text = "token=sk_live_abcdef1234 in the payload";
        assert_eq!(ctx.redact_secrets_in_text(text), "token=[REDACTED] in the payload");
    }

    #[test]
    fn short_secrets_are_not_redacted_in_body() {
        let ctx = SecretContext::from_values(["short".to_string()]);
        assert_eq!(
            ctx.redact_secrets_in_text("a short word here"),
            "a short word here"
        );
    }

    #[test]
    fn header_value_matching_dynamic_secret_is_redacted() {
        let ctx = SecretContext::from_values(["my_api_key_12345".to_string()]);
        assert_eq!(
            redact_header_value("X-Custom-Header", "my_api_key_12345", Some(&ctx)),
            "[REDACTED]"
        );
        assert_eq!(
            redact_header_value("X-Custom-Header", "unrelated", Some(&ctx)),
            "unrelated"
        );
    }
}
