//! Proxy transport factory (§4.E): builds the network transport for
//! direct, HTTP-proxy, or SOCKS5-proxy modes, including HTTPS-over-HTTPS
//! tunneling with a proxy-facing TLS config independent of the
//! request-facing one.
//!
//! Built directly on `hyper`/`hyper-util` rather than a higher-level HTTP
//! client because CONNECT tunneling with two independent TLS configs, and
//! a SOCKS5 dial raced against a connect deadline, both need control at
//! the connector level that a batteries-included client does not expose.

use crate::error::Error;
use crate::noproxy::NoProxyMatcher;
use crate::tls::TlsConfigurator;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Credentials for a proxy that requires authentication.
#[derive(Debug, Clone, Default)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// The proxy configuration half of a request (§3 "Proxy" field group).
#[derive(Debug, Clone, Default)]
pub struct ProxySpec {
    /// `None` selects direct transport.
    pub url: Option<url::Url>,
    pub bypass: Vec<String>,
    /// Proxy-facing TLS material, entirely independent of the request's
    /// own TLS material (§9 "HTTPS-over-HTTPS proxy").
    pub proxy_tls: crate::tls::TlsMaterial,
}

impl ProxySpec {
    fn credentials(&self) -> Option<ProxyCredentials> {
        let url = self.url.as_ref()?;
        if url.username().is_empty() {
            return None;
        }
        Some(ProxyCredentials {
            username: url.username().to_string(),
            password: url.password().unwrap_or_default().to_string(),
        })
    }
}

/// A boxed, type-erased duplex byte stream — the common currency this
/// connector hands to hyper regardless of which mode produced it.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}
type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Wraps a boxed stream so it satisfies hyper's `Connection` trait.
struct ProxiedStream(TokioIo<BoxedStream>);

impl AsyncRead for ProxiedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxiedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Connection for ProxiedStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Connection-pool knobs applied uniformly regardless of mode (§4.E).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Direct,
    Http,
    Socks5,
}

/// A `tower_service::Service<Uri>` that dials direct, through an HTTP
/// proxy (with CONNECT tunneling for HTTPS targets), or through a SOCKS5
/// proxy, consulting the no-proxy matcher on every call.
#[derive(Clone)]
pub struct ProxyConnector {
    mode: Mode,
    proxy_host: Option<String>,
    proxy_port: u16,
    /// Whether the proxy URL itself was `https://`, i.e. the proxy
    /// connection needs its own TLS handshake before CONNECT is written
    /// (§9 "HTTPS-over-HTTPS proxy").
    proxy_is_https: bool,
    credentials: Option<Arc<ProxyCredentials>>,
    no_proxy: Arc<NoProxyMatcher>,
    request_tls: Arc<rustls::ClientConfig>,
    proxy_tls: Arc<rustls::ClientConfig>,
    connect_timeout: Duration,
    sni_override: Option<String>,
}

impl ProxyConnector {
    /// Builds the connector for `spec`, selecting direct/HTTP/SOCKS5 mode
    /// from the proxy URL's scheme (§4.E).
    ///
    /// # Errors
    /// Returns [`Error::setup_error`] if the proxy URL's scheme is
    /// unrecognized, or if either TLS configuration fails to build.
    pub fn build(
        spec: &ProxySpec,
        request_tls: &crate::tls::TlsMaterial,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let no_proxy = Arc::new(NoProxyMatcher::compile(&spec.bypass)?);
        let request_tls_cfg = TlsConfigurator::build(request_tls)?;

        let Some(url) = &spec.url else {
            return Ok(Self {
                mode: Mode::Direct,
                proxy_host: None,
                proxy_port: 0,
                proxy_is_https: false,
                credentials: None,
                no_proxy,
                request_tls: request_tls_cfg.clone(),
                proxy_tls: request_tls_cfg,
                connect_timeout,
                sni_override: request_tls.sni_override.clone(),
            });
        };

        let mode = match url.scheme() {
            "http" | "https" => Mode::Http,
            "socks5" | "socks5h" => Mode::Socks5,
            other => return Err(Error::setup_error(format!("unsupported proxy scheme '{other}'"))),
        };
        let proxy_tls_cfg = TlsConfigurator::build(&spec.proxy_tls)?;

        Ok(Self {
            mode,
            proxy_host: url.host_str().map(str::to_string),
            proxy_port: url.port_or_known_default().unwrap_or(1080),
            proxy_is_https: url.scheme() == "https",
            credentials: spec.credentials().map(Arc::new),
            no_proxy,
            request_tls: request_tls_cfg,
            proxy_tls: proxy_tls_cfg,
            connect_timeout,
            sni_override: request_tls.sni_override.clone(),
        })
    }

    fn sni_for(&self, target_host: &str) -> Result<rustls::pki_types::ServerName<'static>, Error> {
        let name = self.sni_override.clone().unwrap_or_else(|| target_host.to_string());
        rustls::pki_types::ServerName::try_from(name)
            .map_err(|e| Error::setup_error(format!("invalid SNI host: {e}")))
    }

    async fn connect_direct(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))?
    }

    /// Performs an HTTP CONNECT tunnel through the configured proxy, then
    /// a TLS handshake over it using `self.request_tls` (§4.E steps 1-5).
    ///
    /// When the proxy URL itself is `https://`, the connection to the
    /// proxy is TLS-wrapped with `self.proxy_tls` *before* the CONNECT
    /// request is written, entirely independent of the target's own TLS
    /// handshake performed afterward (§9 "HTTPS-over-HTTPS proxy").
    async fn tunnel_https(&self, target_host: &str, target_port: u16) -> Result<BoxedStream, Error> {
        let proxy_host = self.proxy_host.clone().expect("http mode always has a proxy host");
        let tcp = self
            .connect_direct(&proxy_host, self.proxy_port)
            .await
            .map_err(|e| Error::network_error(format!("connect to proxy failed: {e}")))?;

        let mut proxy_stream: BoxedStream = if self.proxy_is_https {
            let connector = TlsConnector::from(self.proxy_tls.clone());
            let sni = self.sni_for(&proxy_host)?;
            let tls: TlsStream<TcpStream> = connector
                .connect(sni, tcp)
                .await
                .map_err(|e| Error::network_error(format!("TLS handshake with proxy failed: {e}")))?;
            Box::pin(tls)
        } else {
            Box::pin(tcp)
        };

        let mut request = format!(
            "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
        );
        if let Some(creds) = &self.credentials {
            let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
            request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
        }
        request.push_str("\r\n");

        proxy_stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| Error::network_error(format!("CONNECT write failed: {e}")))?;

        let status = read_connect_status(&mut proxy_stream).await?;
        if status != 200 {
            return Err(Error::connect_tunnel_failed(status));
        }

        let connector = TlsConnector::from(self.request_tls.clone());
        let sni = self.sni_for(target_host)?;
        let stream = connector
            .connect(sni, proxy_stream)
            .await
            .map_err(|e| Error::network_error(format!("TLS handshake over tunnel failed: {e}")))?;
        Ok(Box::pin(stream))
    }

    async fn connect_http_proxy(&self, target: &ParsedTarget) -> Result<BoxedStream, Error> {
        if target.scheme == "https" {
            return self.tunnel_https(&target.host, target.port).await;
        }
        // Plain HTTP through an HTTP proxy: no CONNECT, the proxy relays
        // the absolute-form request line itself (handled by the caller's
        // request builder, not this connector).
        let proxy_host = self.proxy_host.clone().expect("http mode always has a proxy host");
        let tcp = self
            .connect_direct(&proxy_host, self.proxy_port)
            .await
            .map_err(|e| Error::network_error(format!("connect to proxy failed: {e}")))?;
        Ok(Box::pin(tcp))
    }

    async fn connect_socks5(&self, target: &ParsedTarget) -> Result<BoxedStream, Error> {
        let proxy_host = self.proxy_host.clone().expect("socks5 mode always has a proxy host");
        let proxy_addr = (proxy_host.as_str(), self.proxy_port);

        let dial = async {
            if let Some(creds) = &self.credentials {
                tokio_socks::tcp::Socks5Stream::connect_with_password(
                    proxy_addr,
                    (target.host.as_str(), target.port),
                    &creds.username,
                    &creds.password,
                )
                .await
            } else {
                tokio_socks::tcp::Socks5Stream::connect(proxy_addr, (target.host.as_str(), target.port))
                    .await
            }
        };

        // Race the SOCKS5 dial against the connect deadline (§4.E mode 3).
        let socket = timeout(self.connect_timeout, dial)
            .await
            .map_err(|_| Error::network_error("SOCKS5 dial timed out"))?
            .map_err(|e| Error::network_error(format!("SOCKS5 dial failed: {e}")))?;
        let tcp = socket.into_inner();

        if target.scheme == "https" {
            let connector = TlsConnector::from(self.request_tls.clone());
            let sni = self.sni_for(&target.host)?;
            let stream = connector
                .connect(sni, tcp)
                .await
                .map_err(|e| Error::network_error(format!("TLS handshake failed: {e}")))?;
            Ok(Box::pin(stream))
        } else {
            Ok(Box::pin(tcp))
        }
    }

    async fn connect_for_target(&self, uri: Uri) -> Result<ProxiedStream, Error> {
        let target = ParsedTarget::from_uri(&uri)?;
        let bypass = self.no_proxy.bypasses(&target.host, target.port);

        let stream = match (self.mode, bypass) {
            (Mode::Direct, _) | (_, true) => {
                let tcp = self
                    .connect_direct(&target.host, target.port)
                    .await
                    .map_err(|e| Error::network_error(format!("connect failed: {e}")))?;
                if target.scheme == "https" {
                    let connector = TlsConnector::from(self.request_tls.clone());
                    let sni = self.sni_for(&target.host)?;
                    let tls: TlsStream<TcpStream> = connector
                        .connect(sni, tcp)
                        .await
                        .map_err(|e| Error::network_error(format!("TLS handshake failed: {e}")))?;
                    Box::pin(tls) as BoxedStream
                } else {
                    Box::pin(tcp) as BoxedStream
                }
            }
            (Mode::Http, false) => self.connect_http_proxy(&target).await?,
            (Mode::Socks5, false) => self.connect_socks5(&target).await?,
        };

        Ok(ProxiedStream(TokioIo::new(stream)))
    }
}

struct ParsedTarget {
    scheme: String,
    host: String,
    port: u16,
}

impl ParsedTarget {
    fn from_uri(uri: &Uri) -> Result<Self, Error> {
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let host = uri
            .host()
            .ok_or_else(|| Error::invalid_url(uri.to_string()))?
            .to_string();
        let port = uri
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        Ok(Self { scheme, host, port })
    }
}

async fn read_connect_status(stream: &mut (impl AsyncRead + Unpin)) -> Result<u16, Error> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::network_error(format!("CONNECT read failed: {e}")))?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap_or_default();
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol_error("malformed CONNECT response"))
}

impl tower_service::Service<Uri> for ProxyConnector {
    type Response = ProxiedStream;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.connect_for_target(uri).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mode_for_unset_proxy() {
        let spec = ProxySpec::default();
        let connector = ProxyConnector::build(
            &spec,
            &crate::tls::TlsMaterial::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(connector.mode, Mode::Direct));
    }

    #[test]
    fn unsupported_proxy_scheme_is_a_setup_error() {
        let spec = ProxySpec {
            url: Some(url::Url::parse("ftp://proxy.example.com:21").unwrap()),
            ..Default::default()
        };
        let err = ProxyConnector::build(
            &spec,
            &crate::tls::TlsMaterial::default(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Setup);
    }

    #[test]
    fn parsed_target_defaults_port_from_scheme() {
        let uri: Uri = "https://example.com/path".parse().unwrap();
        let target = ParsedTarget::from_uri(&uri).unwrap();
        assert_eq!(target.port, 443);
        assert_eq!(target.host, "example.com");
    }

    #[test]
    fn https_proxy_url_is_flagged_for_its_own_tls_handshake() {
        let spec = ProxySpec {
            url: Some(url::Url::parse("https://secure-proxy.example.com:443").unwrap()),
            ..Default::default()
        };
        let connector = ProxyConnector::build(
            &spec,
            &crate::tls::TlsMaterial::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(connector.proxy_is_https);
    }

    #[test]
    fn plain_http_proxy_url_does_not_need_its_own_tls_handshake() {
        let spec = ProxySpec {
            url: Some(url::Url::parse("http://proxy.example.com:8080").unwrap()),
            ..Default::default()
        };
        let connector = ProxyConnector::build(
            &spec,
            &crate::tls::TlsMaterial::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!connector.proxy_is_https);
    }
}
