//! Execution engine (§4.H): builds the HTTP request, selects transport via
//! §4.E/§4.F, runs the retry loop, applies middleware, and shapes the
//! response.
//!
//! Entry point is [`process`], the `Process(ctx, config) -> (response,
//! body, error)` operation named in §4.H, adapted to return a single
//! `Result` carrying an [`EngineResponse`].

use crate::error::Error;
use crate::logging::{self, SecretContext};
use crate::proxy::ProxyConnector;
use crate::request::{MiddlewareEvent, MultiMap, RequestConfig};
use crate::retry;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// The shaped result of a completed `Process` call (§4.H step 11).
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: u16,
    pub headers: MultiMap,
    pub body: Vec<u8>,
}

impl EngineResponse {
    /// The response body, lossily decoded as UTF-8 (§6 "String" facade).
    #[must_use]
    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Runs `config` to completion: validates, selects transport, dispatches
/// under the retry policy with middleware and redirect handling, and
/// shapes the response (§4.H).
///
/// # Errors
/// Returns a configuration error (no network activity occurs), a setup
/// error building the transport, or a network/protocol/policy error from
/// the dispatch itself.
pub async fn process(config: &RequestConfig) -> Result<EngineResponse, Error> {
    config.validate()?;

    let owned_config;
    let config = if let Some(jar) = load_cookie_jar(config)? {
        let mut cloned = config.clone();
        cloned.cookie_jar = Some(jar);
        owned_config = cloned;
        &owned_config
    } else {
        config
    };

    let connect_timeout = config.connect_deadline.unwrap_or(Duration::from_secs(10));
    let connector = ProxyConnector::build(&config.proxy, &config.tls, connect_timeout)?;
    let client: Client<ProxyConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(connector);

    let secret_ctx = build_secret_context(config);

    if let Some(hook) = &config.hooks.on_request_start {
        hook();
    }

    let start = Instant::now();
    let cancelled = config.context.clone();

    let attempt_fut = |attempt: u32| {
        let client = &client;
        let config = config;
        let secret_ctx = &secret_ctx;
        async move {
            let (response, retry_after) = dispatch_with_redirects(client, config, secret_ctx).await?;
            let status = response.status;
            Ok((response, Some(status), retry_after))
        }
    };

    let deadline_fut = async {
        if let Some(context) = &cancelled {
            context.cancelled().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let retry_run = retry::execute_with_retry(&config.retry_policy, config.hooks.on_retry.as_ref(), attempt_fut);

    let result = if let Some(overall) = config.deadline {
        tokio::select! {
            res = retry_run => res,
            () = deadline_fut => Err(Error::cancelled("request context cancelled")),
            () = tokio::time::sleep(overall) => Err(Error::deadline_exceeded()),
        }
    } else {
        tokio::select! {
            res = retry_run => res,
            () = deadline_fut => Err(Error::cancelled("request context cancelled")),
        }
    };

    let duration = start.elapsed();
    if let Some(hook) = &config.hooks.on_request_end {
        hook(result.as_ref().ok().map(|r| r.status), duration, result.as_ref().err());
    }

    if let (Some(path), Some(jar)) = (&config.cookie_file, &config.cookie_jar) {
        jar.save_file(std::path::Path::new(path)).await?;
    }

    result
}

/// Resolves the cookie jar to use for this call (§6 "Persisted state"):
/// reuses an already-attached jar, otherwise loads `config.cookie_file`
/// (tolerating a missing file, which is the normal first-request case)
/// into a fresh one. Returns `None` when no file-backed jar applies.
fn load_cookie_jar(config: &RequestConfig) -> Result<Option<std::sync::Arc<crate::cookie::CookieJar>>, Error> {
    let Some(path) = &config.cookie_file else {
        return Ok(None);
    };
    let jar = config
        .cookie_jar
        .clone()
        .unwrap_or_else(|| std::sync::Arc::new(crate::cookie::CookieJar::new()));
    match jar.load_file(std::path::Path::new(path)) {
        Ok(()) => {}
        Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    Ok(Some(jar))
}

async fn dispatch_with_redirects(
    client: &Client<ProxyConnector, Full<Bytes>>,
    config: &RequestConfig,
    secret_ctx: &SecretContext,
) -> Result<(EngineResponse, Option<Duration>), Error> {
    let mut current_url = config.url.clone();
    let mut hops = 0;

    loop {
        let (response, retry_after) = send_once(client, config, &current_url, secret_ctx).await?;

        let is_redirect = matches!(response.status, 301 | 302 | 303 | 307 | 308);
        if is_redirect && config.redirect.follow && hops < config.redirect.max_hops {
            if let Some(location) = first_header(&response.headers, "location") {
                current_url = resolve_redirect(&current_url, &location)?;
                hops += 1;
                continue;
            }
        }

        return Ok((response, retry_after));
    }
}

fn first_header(headers: &MultiMap, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first().cloned())
}

fn resolve_redirect(base: &str, location: &str) -> Result<String, Error> {
    let base_url = url::Url::parse(base).map_err(|_| Error::invalid_url(base))?;
    base_url
        .join(location)
        .map(|joined| joined.to_string())
        .map_err(|_| Error::invalid_url(location))
}

async fn send_once(
    client: &Client<ProxyConnector, Full<Bytes>>,
    config: &RequestConfig,
    url: &str,
    secret_ctx: &SecretContext,
) -> Result<(EngineResponse, Option<Duration>), Error> {
    let request = build_request(config, url)?;

    if config.verbose {
        let method = request.method().as_str().to_string();
        logging::log_request(
            &method,
            url,
            Some(request.headers()),
            None,
            Some(secret_ctx),
            config.trace_id.as_deref(),
        );
    }

    let response = client
        .request(request)
        .await
        .map_err(|err| Error::network_error(err.to_string()))?;

    let status = response.status().as_u16();
    let response_headers = header_map_to_multimap(response.headers());
    let retry_after = retry::parse_retry_after_header(response.headers());

    let body = read_body_limited(response.into_body(), config.response_body_limit).await?;
    let body = decode_body(&response_headers, body)?;
    let body = apply_response_decoder(config, body)?;

    if let Some(jar) = &config.cookie_jar {
        store_response_cookies(jar.as_ref(), &response_headers, url);
    }

    let (status, response_headers, body) = apply_response_middleware(config, status, response_headers, body)?;

    if config.verbose {
        logging::log_response(
            status,
            0,
            None,
            None,
            logging::get_max_body_len(),
            Some(secret_ctx),
            config.trace_id.as_deref(),
        );
    }

    Ok((
        EngineResponse {
            status,
            headers: response_headers,
            body,
        },
        retry_after,
    ))
}

fn build_request(config: &RequestConfig, url: &str) -> Result<Request<Full<Bytes>>, Error> {
    let final_url = merge_query(url, &config.query_params)?;
    let uri = Uri::from_str(&final_url).map_err(|_| Error::invalid_url(final_url.clone()))?;
    let method = Method::from_bytes(config.method.as_bytes()).map_err(|_| Error::invalid_method(&config.method))?;

    let (content_type, body_bytes) = build_body(config)?;
    let mut headers = config.headers.clone();

    headers
        .entry("Host".to_string())
        .or_default()
        .push(uri_host(&final_url)?);

    if let Some(content_type) = content_type {
        if !has_header(&headers, "content-type") {
            headers.entry("Content-Type".to_string()).or_default().push(content_type);
        }
    }
    if let Some(ua) = &config.user_agent {
        if !has_header(&headers, "user-agent") {
            headers.entry("User-Agent".to_string()).or_default().push(ua.clone());
        }
    }
    if let Some(referer) = &config.referer {
        if !has_header(&headers, "referer") {
            headers.entry("Referer".to_string()).or_default().push(referer.clone());
        }
    }
    if config.compress && !has_header(&headers, "accept-encoding") {
        headers
            .entry("Accept-Encoding".to_string())
            .or_default()
            .push(config.accepted_encodings.join(", "));
    }
    if let Some(auth) = &config.basic_auth {
        if !has_header(&headers, "authorization") {
            let token = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                format!("{}:{}", auth.user, auth.pass),
            );
            headers
                .entry("Authorization".to_string())
                .or_default()
                .push(format!("Basic {token}"));
        }
    } else if let Some(bearer) = &config.bearer_token {
        if !has_header(&headers, "authorization") {
            headers
                .entry("Authorization".to_string())
                .or_default()
                .push(format!("Bearer {bearer}"));
        }
    }
    if let Some(cookie_header) = build_cookie_header(config, &final_url) {
        headers.entry("Cookie".to_string()).or_default().push(cookie_header);
    }
    if let Some(key) = &config.idempotency_key {
        if !has_header(&headers, "idempotency-key") {
            headers.entry("Idempotency-Key".to_string()).or_default().push(key.clone());
        }
    }

    let (headers, body_bytes) = apply_request_middleware(config, headers, body_bytes.to_vec())?;

    let mut builder = Request::builder().method(method).uri(uri);
    for (name, values) in &headers {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(Full::new(Bytes::from(body_bytes)))
        .map_err(|err| Error::invalid_config(err.to_string()))
}

fn uri_host(url: &str) -> Result<String, Error> {
    let parsed = url::Url::parse(url).map_err(|_| Error::invalid_url(url))?;
    let host = parsed.host_str().ok_or_else(|| Error::invalid_url(url))?;
    Ok(parsed.port().map_or_else(|| host.to_string(), |port| format!("{host}:{port}")))
}

fn has_header(headers: &MultiMap, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Merges `config`'s query-parameter map into `url`'s query string
/// (§4.H step 3: "URL (with query parameters merged in)").
fn merge_query(url: &str, params: &MultiMap) -> Result<String, Error> {
    if params.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed = url::Url::parse(url).map_err(|_| Error::invalid_url(url))?;
    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (key, values) in params {
            for value in values {
                pairs.append_pair(key, value);
            }
        }
    }
    Ok(parsed.to_string())
}

/// Builds the request body under the precedence order file-upload > raw
/// body > form (§4.H step 3, §9 "Multipart precedence").
fn build_body(config: &RequestConfig) -> Result<(Option<String>, Bytes), Error> {
    if let Some(upload) = &config.file_upload {
        return build_multipart_body(config, upload);
    }
    if let Some(body) = &config.body {
        return Ok((None, Bytes::copy_from_slice(body)));
    }
    if !config.form.is_empty() {
        let mut encoded = String::new();
        for (key, values) in &config.form {
            for value in values {
                if !encoded.is_empty() {
                    encoded.push('&');
                }
                encoded.push_str(&urlencoding::encode(key));
                encoded.push('=');
                encoded.push_str(&urlencoding::encode(value));
            }
        }
        return Ok((
            Some("application/x-www-form-urlencoded".to_string()),
            Bytes::from(encoded),
        ));
    }
    Ok((None, Bytes::new()))
}

fn build_multipart_body(
    config: &RequestConfig,
    upload: &crate::request::FileUpload,
) -> Result<(Option<String>, Bytes), Error> {
    let boundary = format!("----curlkit-{:016x}", fastrand::u64(..));
    let mut body = Vec::new();

    for (key, values) in &config.form {
        for value in values {
            write!(body, "--{boundary}\r\n").ok();
            write!(body, "Content-Disposition: form-data; name=\"{key}\"\r\n\r\n{value}\r\n").ok();
        }
    }

    let file_contents = std::fs::read(&upload.file_path)?;
    let file_name = upload
        .file_name
        .clone()
        .or_else(|| {
            std::path::Path::new(&upload.file_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    write!(body, "--{boundary}\r\n").ok();
    write!(
        body,
        "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n",
        upload.field_name
    )
    .ok();
    write!(body, "Content-Type: application/octet-stream\r\n\r\n").ok();
    body.extend_from_slice(&file_contents);
    write!(body, "\r\n--{boundary}--\r\n").ok();

    Ok((
        Some(format!("multipart/form-data; boundary={boundary}")),
        Bytes::from(body),
    ))
}

fn build_cookie_header(config: &RequestConfig, url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let path = if parsed.path().is_empty() { "/" } else { parsed.path() };
    let secure = parsed.scheme() == "https";

    let mut parts = Vec::new();
    if let Some(jar) = &config.cookie_jar {
        if let Some(from_jar) = jar.header_value(host, path, secure) {
            parts.push(from_jar);
        }
    }
    for cookie in &config.cookies {
        parts.push(format!("{}={}", cookie.name, cookie.value));
    }
    (!parts.is_empty()).then(|| parts.join("; "))
}

fn store_response_cookies(jar: &crate::cookie::CookieJar, headers: &MultiMap, url: &str) {
    let Ok(parsed) = url::Url::parse(url) else {
        return;
    };
    let Some(host) = parsed.host_str() else {
        return;
    };
    let path = if parsed.path().is_empty() { "/" } else { parsed.path() };

    for (name, values) in headers {
        if name.eq_ignore_ascii_case("set-cookie") {
            for value in values {
                jar.store_set_cookie(value, host, path);
            }
        }
    }
}

fn header_map_to_multimap(headers: &HeaderMap) -> MultiMap {
    let mut map = MultiMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string()).or_default().push(value);
    }
    map
}

async fn read_body_limited(body: Incoming, limit: u64) -> Result<Vec<u8>, Error> {
    let mut collected = Vec::new();
    let mut body = body;
    while let Some(frame) = BodyExt::frame(&mut body).await {
        let frame = frame.map_err(|err| Error::protocol_error(err.to_string()))?;
        if let Ok(data) = frame.into_data() {
            if collected.len() as u64 + data.len() as u64 > limit {
                return Err(Error::body_too_large(limit));
            }
            collected.extend_from_slice(&data);
        }
    }
    Ok(collected)
}

/// Transparently decodes a gzip/deflate response body per its
/// `Content-Encoding` header (§3 "Content negotiation").
fn decode_body(headers: &MultiMap, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    let Some(encoding) = first_header(headers, "content-encoding") else {
        return Ok(body);
    };
    match encoding.to_ascii_lowercase().as_str() {
        "gzip" => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(body.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| Error::protocol_error(err.to_string()))?;
            Ok(out)
        }
        "deflate" => {
            use std::io::Read;
            let mut decoder = flate2::read::DeflateDecoder::new(body.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| Error::protocol_error(err.to_string()))?;
            Ok(out)
        }
        _ => Ok(body),
    }
}

fn apply_response_decoder(config: &RequestConfig, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    config
        .response_decoder
        .as_ref()
        .map_or_else(|| Ok(body.clone()), |decoder| decoder(&body))
}

/// Applies the request-phase middleware pipeline in list order prior to
/// building the `hyper::Request`; the first middleware to return an error
/// short-circuits (§4.H step 8). Operates on plain header/body data rather
/// than a constructed request so no body-buffering round trip is needed.
fn apply_request_middleware(
    config: &RequestConfig,
    headers: MultiMap,
    body: Vec<u8>,
) -> Result<(MultiMap, Vec<u8>), Error> {
    if config.middleware.is_empty() {
        return Ok((headers, body));
    }

    let mut event = MiddlewareEvent::Request {
        headers,
        body: Some(body),
    };
    for middleware in &config.middleware {
        event = middleware(event)?;
    }

    match event {
        MiddlewareEvent::Request { headers, body } => Ok((headers, body.unwrap_or_default())),
        MiddlewareEvent::Response { .. } => {
            Err(Error::invalid_config("middleware returned a response event for a request"))
        }
    }
}

/// Applies the response-phase middleware pipeline in the *same* list order
/// as the request phase (§5 "implementations must document which they
/// pick").
fn apply_response_middleware(
    config: &RequestConfig,
    status: u16,
    headers: MultiMap,
    body: Vec<u8>,
) -> Result<(u16, MultiMap, Vec<u8>), Error> {
    if config.middleware.is_empty() {
        return Ok((status, headers, body));
    }

    let mut event = MiddlewareEvent::Response { status, headers, body };
    for middleware in &config.middleware {
        event = middleware(event)?;
    }

    match event {
        MiddlewareEvent::Response { status, headers, body } => Ok((status, headers, body)),
        MiddlewareEvent::Request { .. } => {
            Err(Error::invalid_config("middleware returned a request event for a response"))
        }
    }
}

fn build_secret_context(config: &RequestConfig) -> SecretContext {
    let mut secrets = Vec::new();
    if let Some(auth) = &config.basic_auth {
        secrets.push(auth.pass.clone());
    }
    if let Some(token) = &config.bearer_token {
        secrets.push(token.clone());
    }
    SecretContext::from_values(secrets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Builder;

    #[test]
    fn merges_query_parameters_into_url() {
        let mut params = MultiMap::new();
        params.entry("p".to_string()).or_default().push("v".to_string());
        let merged = merge_query("https://api.example.com/data", &params).unwrap();
        assert_eq!(merged, "https://api.example.com/data?p=v");
    }

    #[test]
    fn form_body_is_url_encoded() {
        let config = Builder::new()
            .post("https://example.com")
            .form([("a".to_string(), "1 2".to_string())])
            .build();
        let (content_type, bytes) = build_body(&config).unwrap();
        assert_eq!(content_type.as_deref(), Some("application/x-www-form-urlencoded"));
        assert_eq!(&bytes[..], b"a=1%202");
    }

    #[test]
    fn raw_body_takes_precedence_over_form() {
        let config = Builder::new()
            .post("https://example.com")
            .form([("a".to_string(), "1".to_string())])
            .body(b"raw".to_vec())
            .build();
        let (content_type, bytes) = build_body(&config).unwrap();
        assert!(content_type.is_none());
        assert_eq!(&bytes[..], b"raw");
    }

    #[test]
    fn decode_body_passes_through_unknown_encoding() {
        let mut headers = MultiMap::new();
        headers.entry("content-encoding".to_string()).or_default().push("br".to_string());
        let result = decode_body(&headers, b"payload".to_vec()).unwrap();
        assert_eq!(result, b"payload");
    }

    #[test]
    fn redirect_resolves_relative_location() {
        let resolved = resolve_redirect("https://example.com/a/b", "/c").unwrap();
        assert_eq!(resolved, "https://example.com/c");
    }
}
