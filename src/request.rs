//! Request configuration and its builder (§3 "Request configuration", §4.G).
//!
//! [`RequestConfig`] is the single typed model populated either by the
//! command parser (§4.C) or by [`Builder`]'s fluent setters. Both surfaces
//! populate the same struct; fields reachable only from the builder
//! (pinning, cipher lists, middleware, lifecycle hooks) are called out
//! where they appear.

use crate::cookie::{Cookie, CookieJar};
use crate::error::Error;
use crate::parser::{self, keys, OptionMap, MULTI_VALUE_SEP};
use crate::proxy::ProxySpec;
use crate::retry::RetryPolicy;
use crate::tls::TlsMaterial;
use crate::variables::VariableResolver;
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Ordered multi-map: key → list of values, in insertion order (§3
/// "Identity", "Headers").
pub type MultiMap = IndexMap<String, Vec<String>>;

/// HTTP basic-auth credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub pass: String,
}

/// A declared file upload (`-F name=@path`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileUpload {
    pub field_name: String,
    pub file_name: Option<String>,
    pub file_path: String,
}

/// The request-configuration redirect policy (§3 "Redirect policy").
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    pub follow: bool,
    pub max_hops: u32,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            follow: true,
            max_hops: 10,
        }
    }
}

/// A transform applied to the outgoing request or incoming response by the
/// middleware pipeline (§4.H step 8, §5 "Ordering guarantees").
pub type MiddlewareFn = Arc<dyn Fn(MiddlewareEvent) -> Result<MiddlewareEvent, Error> + Send + Sync>;

/// The value passed through a middleware entry; request-phase middleware
/// receives and returns [`MiddlewareEvent::Request`], response-phase
/// middleware receives and returns [`MiddlewareEvent::Response`].
#[derive(Debug, Clone)]
pub enum MiddlewareEvent {
    Request { headers: MultiMap, body: Option<Vec<u8>> },
    Response { status: u16, headers: MultiMap, body: Vec<u8> },
}

/// A caller-supplied callback invoked at a fixed point in the request
/// timeline (§4.G "lifecycle hooks", GLOSSARY "Lifecycle hook").
pub type StartHook = Arc<dyn Fn() + Send + Sync>;
pub type EndHook = Arc<dyn Fn(Option<u16>, Duration, Option<&Error>) + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(u32, &Error) + Send + Sync>;

/// The zero-or-more DNS/connect/TLS start-end lifecycle pairs (§3
/// "Extensibility").
#[derive(Clone, Default)]
pub struct PhaseHooks {
    pub on_start: Option<StartHook>,
    pub on_end: Option<EndHook>,
}

impl std::fmt::Debug for PhaseHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Lifecycle hooks fired by the execution engine (§4.H steps 6/7/10, §5
/// "Ordering guarantees": `on-request-start` -> zero or more `on-retry` ->
/// `on-request-end`).
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub on_request_start: Option<StartHook>,
    pub on_retry: Option<RetryHook>,
    pub on_request_end: Option<EndHook>,
    pub dns: PhaseHooks,
    pub connect: PhaseHooks,
    pub tls: PhaseHooks,
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_request_start", &self.on_request_start.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("on_request_end", &self.on_request_end.is_some())
            .field("dns", &self.dns)
            .field("connect", &self.connect)
            .field("tls", &self.tls)
            .finish()
    }
}

/// A caller-supplied transform applied to the raw response body before it
/// is handed back through the convenience facade (§3 "Output shaping").
pub type ResponseDecoder = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync>;

/// Cancellation and request-scoped values, supplied by the caller and
/// honored throughout the engine (§4.H step 1, §4.H "Cancellation
/// semantics"). A minimal stand-in for a full context type: a cancellation
/// future plus an opaque request id.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Option<String>,
    cancelled: Arc<tokio::sync::Notify>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: None,
            cancelled: Arc::new(tokio::sync::Notify::new()),
        }
    }
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this context (and every clone sharing it) cancelled.
    pub fn cancel(&self) {
        self.cancelled.notify_waiters();
    }

    /// Resolves once `cancel` has been called.
    pub fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        self.cancelled.notified()
    }
}

/// The central entity: a single HTTP request plus its reliability and
/// security policy (§3 "Request configuration", GLOSSARY "Configuration").
#[derive(Clone)]
pub struct RequestConfig {
    // --- Identity ---
    pub method: String,
    pub url: String,
    pub query_params: MultiMap,

    // --- Payload ---
    pub body: Option<Vec<u8>>,
    pub form: MultiMap,
    pub file_upload: Option<FileUpload>,

    // --- Headers ---
    pub headers: MultiMap,

    // --- Credentials ---
    pub basic_auth: Option<BasicAuth>,
    pub bearer_token: Option<String>,

    // --- TLS ---
    pub tls: TlsMaterial,

    // --- Proxy ---
    pub proxy: ProxySpec,

    // --- Timing ---
    pub deadline: Option<Duration>,
    pub connect_deadline: Option<Duration>,

    // --- Redirect policy ---
    pub redirect: RedirectPolicy,

    // --- Content negotiation ---
    pub compress: bool,
    pub accepted_encodings: Vec<String>,

    // --- HTTP version ---
    pub permit_http2: bool,
    pub require_http2: bool,

    // --- Cookies ---
    pub cookies: Vec<Cookie>,
    pub cookie_jar: Option<Arc<CookieJar>>,
    pub cookie_file: Option<String>,

    // --- UX knobs ---
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub output_file: Option<String>,
    pub silent: bool,
    pub verbose: bool,
    /// Prepend response headers to the body in the CLI facade (`-i`).
    pub include_headers: bool,

    // --- Reliability ---
    pub retry_policy: RetryPolicy,

    // --- Output shaping ---
    pub response_body_limit: u64,
    pub response_decoder: Option<ResponseDecoder>,

    // --- Extensibility ---
    pub middleware: Vec<MiddlewareFn>,
    pub custom_client: Option<Arc<crate::proxy::ProxyConnector>>,
    pub request_id: Option<String>,
    pub context: Option<RequestContext>,
    pub hooks: LifecycleHooks,

    /// Propagated as the `Idempotency-Key` header, making retries of
    /// non-idempotent methods explicit (§9 "Retry on non-idempotent
    /// methods").
    pub idempotency_key: Option<String>,
    /// Request identifier threaded through every lifecycle hook and
    /// tracing span for cross-system correlation.
    pub trace_id: Option<String>,
}

impl std::fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query_params", &self.query_params)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("form", &self.form)
            .field("file_upload", &self.file_upload)
            .field("headers", &self.headers)
            .field("basic_auth", &self.basic_auth.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("proxy", &self.proxy)
            .field("deadline", &self.deadline)
            .field("connect_deadline", &self.connect_deadline)
            .field("redirect", &self.redirect)
            .field("compress", &self.compress)
            .field("accepted_encodings", &self.accepted_encodings)
            .field("permit_http2", &self.permit_http2)
            .field("require_http2", &self.require_http2)
            .field("cookies", &self.cookies)
            .field("cookie_file", &self.cookie_file)
            .field("user_agent", &self.user_agent)
            .field("referer", &self.referer)
            .field("output_file", &self.output_file)
            .field("silent", &self.silent)
            .field("verbose", &self.verbose)
            .field("include_headers", &self.include_headers)
            .field("retry_policy", &self.retry_policy)
            .field("response_body_limit", &self.response_body_limit)
            .field("middleware_count", &self.middleware.len())
            .field("request_id", &self.request_id)
            .field("hooks", &self.hooks)
            .field("idempotency_key", &self.idempotency_key.as_ref().map(|_| "<redacted>"))
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

/// Default response body byte limit: 100 MiB.
pub const DEFAULT_BODY_LIMIT: u64 = 100 * 1024 * 1024;

/// The recognized HTTP methods (§3 "Invariants": "Method ... must be one
/// of the recognized HTTP methods (case-insensitive)").
const RECOGNIZED_METHODS: [&str; 8] = [
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE",
];

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: String::new(),
            query_params: MultiMap::new(),
            body: None,
            form: MultiMap::new(),
            file_upload: None,
            headers: MultiMap::new(),
            basic_auth: None,
            bearer_token: None,
            tls: TlsMaterial::default(),
            proxy: ProxySpec::default(),
            deadline: None,
            connect_deadline: None,
            redirect: RedirectPolicy::default(),
            compress: true,
            accepted_encodings: vec!["gzip".to_string(), "deflate".to_string()],
            permit_http2: false,
            require_http2: false,
            cookies: Vec::new(),
            cookie_jar: None,
            cookie_file: None,
            user_agent: None,
            referer: None,
            output_file: None,
            silent: false,
            verbose: false,
            include_headers: false,
            retry_policy: RetryPolicy::none(),
            response_body_limit: DEFAULT_BODY_LIMIT,
            response_decoder: None,
            middleware: Vec::new(),
            custom_client: None,
            request_id: None,
            context: None,
            hooks: LifecycleHooks::default(),
            idempotency_key: None,
            trace_id: None,
        }
    }
}

impl RequestConfig {
    /// Builds a configuration from an already-resolved option map, applying
    /// §4.C's defaults (method GET, follow-redirects true, max-redirects
    /// 10, compress true, non-nil maps) and the scenario-3 flag table.
    ///
    /// # Errors
    /// Returns [`Error::malformed_credential`], [`Error::invalid_config`], or
    /// a parse error from a malformed flag value.
    pub fn from_options(map: &OptionMap) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(url) = map.get(parser::URL_KEY) {
            config.url = url.clone();
            config.query_params = extract_query_params(url);
        }

        if let Some(method) = map.get(keys::METHOD) {
            config.method = method.to_uppercase();
        }

        if let Some(joined) = map.get(keys::HEADER) {
            for raw in split_multi(joined) {
                if let Some((name, value)) = raw.split_once(':') {
                    let name = name.trim().to_string();
                    let value = value.trim().to_string();
                    if name.eq_ignore_ascii_case("authorization") {
                        if let Some(token) = value
                            .to_ascii_lowercase()
                            .starts_with("bearer ")
                            .then(|| value[7..].trim().to_string())
                        {
                            config.bearer_token = Some(token);
                        }
                    }
                    config
                        .headers
                        .entry(name)
                        .or_default()
                        .push(value);
                }
            }
        }

        if let Some(data) = map.get(keys::DATA) {
            config.body = Some(data.as_bytes().to_vec());
        }

        if let Some(joined) = map.get(keys::FORM) {
            for raw in split_multi(joined) {
                if let Some(path) = raw.strip_prefix('@') {
                    config.file_upload = Some(FileUpload {
                        field_name: String::new(),
                        file_name: None,
                        file_path: path.to_string(),
                    });
                } else if let Some((name, value)) = raw.split_once('=') {
                    if let Some(path) = value.strip_prefix('@') {
                        config.file_upload = Some(FileUpload {
                            field_name: name.to_string(),
                            file_name: None,
                            file_path: path.to_string(),
                        });
                    } else {
                        config.form.entry(name.to_string()).or_default().push(value.to_string());
                    }
                }
            }
        }

        if let Some(user) = map.get(keys::USER) {
            let (user, pass) = user
                .split_once(':')
                .ok_or_else(|| Error::malformed_credential("expected user:pass"))?;
            config.basic_auth = Some(BasicAuth {
                user: user.to_string(),
                pass: pass.to_string(),
            });
        }

        if let Some(proxy) = map.get(keys::PROXY) {
            config.proxy.url =
                Some(url::Url::parse(proxy).map_err(|_| Error::invalid_url(proxy.clone()))?);
        }

        if let Some(cert) = map.get(keys::PROXY_CERT) {
            config.proxy.proxy_tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = map.get(keys::PROXY_KEY) {
            config.proxy.proxy_tls.key_path = Some(key.clone());
        }
        if let Some(cacert) = map.get(keys::PROXY_CACERT) {
            config.proxy.proxy_tls.ca_path = Some(cacert.clone());
        }
        if map.contains_key(keys::PROXY_INSECURE) {
            config.proxy.proxy_tls.insecure_skip_verify = true;
        }

        if let Some(max_time) = map.get(keys::MAX_TIME) {
            let secs: f64 = max_time
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed --max-time: {max_time}")))?;
            config.deadline = Some(Duration::from_secs_f64(secs));
        }

        if let Some(connect_timeout) = map.get(keys::CONNECT_TIMEOUT) {
            let secs: f64 = connect_timeout.parse().map_err(|_| {
                Error::invalid_config(format!("malformed --connect-timeout: {connect_timeout}"))
            })?;
            config.connect_deadline = Some(Duration::from_secs_f64(secs));
        }

        if map.contains_key(keys::LOCATION) {
            config.redirect.follow = true;
        }

        if let Some(max_redirs) = map.get(keys::MAX_REDIRS) {
            config.redirect.max_hops = max_redirs
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed --max-redirs: {max_redirs}")))?;
        }

        config.compress = map.contains_key(keys::COMPRESSED);

        if let Some(cert) = map.get(keys::CERT) {
            config.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = map.get(keys::KEY) {
            config.tls.key_path = Some(key.clone());
        }
        if let Some(cacert) = map.get(keys::CACERT) {
            config.tls.ca_path = Some(cacert.clone());
        }
        if map.contains_key(keys::INSECURE) {
            config.tls.insecure_skip_verify = true;
        }

        if let Some(ua) = map.get(keys::USER_AGENT) {
            config.user_agent = Some(ua.clone());
        }
        if let Some(referer) = map.get(keys::REFERER) {
            config.referer = Some(referer.clone());
        }

        if map.contains_key(keys::HTTP2) {
            config.permit_http2 = true;
        }

        if let Some(output) = map.get(keys::OUTPUT) {
            config.output_file = Some(output.clone());
        }
        config.silent = map.contains_key(keys::SILENT);
        config.verbose = map.contains_key(keys::VERBOSE);

        if let Some(cookie) = map.get(keys::COOKIE) {
            config.cookie_file = Some(cookie.clone());
        }
        if let Some(jar_path) = map.get(keys::COOKIE_JAR) {
            config.cookie_file = Some(jar_path.clone());
        }

        if let Some(retry) = map.get(keys::RETRY) {
            let max: u32 = retry
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed --retry: {retry}")))?;
            config.retry_policy = RetryPolicy {
                max_attempts: max + 1,
                ..RetryPolicy::with_default_retry()
            };
        }

        if let Some(retry_max_time) = map.get(keys::RETRY_MAX_TIME) {
            let secs: f64 = retry_max_time
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed --retry-max-time: {retry_max_time}")))?;
            config.retry_policy.max_time = Some(Duration::from_secs_f64(secs));
        }

        if map.contains_key(keys::INCLUDE) {
            config.include_headers = true;
        }

        Ok(config)
    }

    /// Parses a full curl-compatible command string using `resolver`
    /// (§4.A-C end to end).
    ///
    /// # Errors
    /// See [`parser::parse_command`] and [`Self::from_options`].
    pub fn from_command(command: &str, resolver: &VariableResolver) -> Result<Self, Error> {
        let map = parser::parse_command(command, resolver)?;
        Self::from_options(&map)
    }

    /// Parses an already-tokenized argv-style list (§6 "args" entry point).
    ///
    /// # Errors
    /// See [`parser::parse_args`] and [`Self::from_options`].
    pub fn from_args(args: &[String], resolver: &VariableResolver) -> Result<Self, Error> {
        let map = parser::parse_args(args, resolver)?;
        Self::from_options(&map)
    }

    /// Enforces §3's invariants (§4.G "Validation").
    ///
    /// # Errors
    /// Returns [`Error::invalid_method`], [`Error::invalid_url`],
    /// [`Error::invalid_config`], or [`Error::insecure_credentials_over_http`].
    pub fn validate(&self) -> Result<(), Error> {
        if !RECOGNIZED_METHODS.contains(&self.method.to_uppercase().as_str()) {
            return Err(Error::invalid_method(self.method.clone()));
        }

        let parsed = url::Url::parse(&self.url).map_err(|_| Error::invalid_url(self.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::invalid_url(self.url.clone()));
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(Error::invalid_url(self.url.clone()));
        }

        for key in self
            .headers
            .keys()
            .chain(self.form.keys())
            .chain(self.query_params.keys())
        {
            if key.is_empty() || key.chars().any(char::is_control) {
                return Err(Error::invalid_config(format!(
                    "key '{key}' is empty or contains control characters"
                )));
            }
        }

        if let Some(body) = &self.body {
            if body.len() as u64 > self.response_body_limit {
                return Err(Error::invalid_config("request body exceeds configured limit"));
            }
        }

        let has_credentials = self.basic_auth.is_some() || self.bearer_token.is_some();
        if has_credentials && parsed.scheme() == "http" && !self.tls.insecure_skip_verify {
            return Err(Error::insecure_credentials_over_http());
        }

        Ok(())
    }
}

fn split_multi(joined: &str) -> Vec<String> {
    joined.split(MULTI_VALUE_SEP).map(str::to_string).collect()
}

fn extract_query_params(url: &str) -> MultiMap {
    let mut params = MultiMap::new();
    let Ok(parsed) = url::Url::parse(url) else {
        return params;
    };
    for (key, value) in parsed.query_pairs() {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Fluent constructor for [`RequestConfig`] (§4.G "Builder contract").
///
/// Each setter returns `self` for chaining. The builder carries a scratch
/// configuration plus an optional stashed cancel notifier installed by
/// [`Self::with_timeout`]; callers are expected to call [`Self::cleanup`]
/// (typically deferred) after calling it.
pub struct Builder {
    scratch: RequestConfig,
    cancel: Option<Arc<tokio::sync::Notify>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scratch: RequestConfig::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.scratch.method = method.into().to_uppercase();
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.scratch.query_params = extract_query_params(&url);
        self.scratch.url = url;
        self
    }

    #[must_use]
    pub fn get(self, url: impl Into<String>) -> Self {
        self.method("GET").url(url)
    }

    #[must_use]
    pub fn post(self, url: impl Into<String>) -> Self {
        self.method("POST").url(url)
    }

    #[must_use]
    pub fn put(self, url: impl Into<String>) -> Self {
        self.method("PUT").url(url)
    }

    #[must_use]
    pub fn delete(self, url: impl Into<String>) -> Self {
        self.method("DELETE").url(url)
    }

    #[must_use]
    pub fn patch(self, url: impl Into<String>) -> Self {
        self.method("PATCH").url(url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scratch
            .headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scratch
            .query_params
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.scratch.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.scratch.basic_auth = Some(BasicAuth {
            user: user.into(),
            pass: pass.into(),
        });
        self
    }

    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.scratch.bearer_token = Some(token.into());
        self
    }

    /// Marshals `value` as JSON, sets the body, and sets
    /// `Content-Type: application/json` (§4.G "JSON(value)").
    ///
    /// # Errors
    /// Returns [`Error::Json`] if serialization fails.
    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(value)?;
        self.scratch.body = Some(bytes);
        self.scratch
            .headers
            .entry("Content-Type".to_string())
            .or_default()
            .push("application/json".to_string());
        Ok(self)
    }

    /// Sets the form map and `Content-Type:
    /// application/x-www-form-urlencoded` (§4.G "Form(values)").
    #[must_use]
    pub fn form(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        for (key, value) in values {
            self.scratch.form.entry(key).or_default().push(value);
        }
        self.scratch
            .headers
            .entry("Content-Type".to_string())
            .or_default()
            .push("application/x-www-form-urlencoded".to_string());
        self
    }

    /// Installs `{max=3, base=1s, codes=[408, 429, 500, 502, 503, 504]}`
    /// (§4.G "WithDefaultRetry()").
    #[must_use]
    pub fn with_default_retry(mut self) -> Self {
        self.scratch.retry_policy = RetryPolicy::with_default_retry();
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.scratch.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn proxy(mut self, spec: ProxySpec) -> Self {
        self.scratch.proxy = spec;
        self
    }

    #[must_use]
    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.scratch.tls = material;
        self
    }

    #[must_use]
    pub fn cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.scratch.cookie_jar = Some(jar);
        self
    }

    #[must_use]
    pub fn middleware(mut self, entry: MiddlewareFn) -> Self {
        self.scratch.middleware.push(entry);
        self
    }

    #[must_use]
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.scratch.request_id = Some(id.into());
        self
    }

    /// Sets the `Idempotency-Key` header value (§9 "Retry on non-idempotent
    /// methods").
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.scratch.idempotency_key = Some(key.into());
        self
    }

    /// Sets the request identifier threaded through lifecycle hooks and
    /// tracing spans.
    #[must_use]
    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.scratch.trace_id = Some(id.into());
        self
    }

    /// Stores a context to be passed at execution (§4.G "WithContext(ctx)").
    #[must_use]
    pub fn with_context(mut self, ctx: RequestContext) -> Self {
        self.scratch.context = Some(ctx);
        self
    }

    /// Wraps the stored or default context in a timeout-bearing context and
    /// stashes the associated cancel for later cleanup (§4.G
    /// "WithTimeout(d)"). The timeout itself is enforced by the engine via
    /// `RequestConfig::deadline`; this also arms the notifier `cleanup`
    /// fires early, matching the builder's cancel-stashing contract.
    #[must_use]
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.scratch.deadline = Some(duration);
        if self.scratch.context.is_none() {
            self.scratch.context = Some(RequestContext::new());
        }
        self.cancel = self.scratch.context.as_ref().map(|ctx| ctx.cancelled.clone());
        self
    }

    /// `QuickTimeout()`: 5 seconds (§4.G).
    #[must_use]
    pub fn quick_timeout(self) -> Self {
        self.with_timeout(Duration::from_secs(5))
    }

    /// `SlowTimeout()`: 2 minutes (§4.G).
    #[must_use]
    pub fn slow_timeout(self) -> Self {
        self.with_timeout(Duration::from_secs(120))
    }

    /// Invokes the stashed cancel notifier, if any (§4.G "Cleanup()").
    pub fn cleanup(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.notify_waiters();
        }
    }

    /// Returns a clone of the scratch configuration so the builder can be
    /// reused (§4.G "Build() returns a *clone*").
    #[must_use]
    pub fn build(&self) -> RequestConfig {
        self.scratch.clone()
    }
}
