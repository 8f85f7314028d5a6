//! No-proxy matcher: decides whether a target host bypasses the configured
//! proxy (§4.D). Patterns are tried in order; the first match wins.

use crate::error::Error;
use ipnet::IpNet;
use std::net::IpAddr;
use std::net::ToSocketAddrs;

#[derive(Debug, Clone)]
enum PatternKind {
    Wildcard,
    Cidr(IpNet),
    Domain { host: String },
}

#[derive(Debug, Clone)]
struct Pattern {
    kind: PatternKind,
    port: Option<u16>,
}

/// A compiled list of no-proxy patterns, ready to test target URLs against.
#[derive(Debug, Clone, Default)]
pub struct NoProxyMatcher {
    patterns: Vec<Pattern>,
}

impl NoProxyMatcher {
    /// Compiles a list of raw pattern strings (§3 "No-proxy pattern").
    ///
    /// # Errors
    /// Returns [`Error::invalid_cidr`] if a pattern contains a `/` but does
    /// not parse as a CIDR block.
    pub fn compile(raw_patterns: &[String]) -> Result<Self, Error> {
        let mut patterns = Vec::new();
        for raw in raw_patterns {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "*" {
                patterns.push(Pattern {
                    kind: PatternKind::Wildcard,
                    port: None,
                });
                continue;
            }

            let (host_part, port) = split_host_port(trimmed);

            if host_part.contains('/') {
                let net: IpNet = host_part
                    .parse()
                    .map_err(|_| Error::invalid_cidr(raw.clone()))?;
                patterns.push(Pattern {
                    kind: PatternKind::Cidr(net),
                    port,
                });
            } else {
                let host = host_part.trim_start_matches('.').to_ascii_lowercase();
                patterns.push(Pattern {
                    kind: PatternKind::Domain { host },
                    port,
                });
            }
        }
        Ok(Self { patterns })
    }

    /// Returns `true` if `host`/`port` should bypass the proxy.
    #[must_use]
    pub fn bypasses(&self, host: &str, port: u16) -> bool {
        let host_lower = host.to_ascii_lowercase();
        self.patterns
            .iter()
            .any(|pattern| self.matches(pattern, &host_lower, port))
    }

    fn matches(&self, pattern: &Pattern, host: &str, port: u16) -> bool {
        if let Some(required_port) = pattern.port {
            if required_port != port {
                return false;
            }
        }

        match &pattern.kind {
            PatternKind::Wildcard => true,
            PatternKind::Cidr(net) => resolve_ip(host).is_some_and(|ip| net.contains(&ip)),
            PatternKind::Domain { host: pattern_host } => {
                // Per §8's testable law, both `example.com` and `.example.com`
                // match the bare domain and any subdomain of it.
                host == pattern_host || host.ends_with(&format!(".{pattern_host}"))
            }
        }
    }
}

/// Splits `host[:port]`, respecting bracketed IPv6 literals (`[::1]:8080`).
fn split_host_port(pattern: &str) -> (String, Option<u16>) {
    if let Some(rest) = pattern.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let after = &rest[end + 1..];
            let port = after.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host.to_string(), port);
        }
    }

    // A bare IPv4/CIDR/domain may itself contain no colon, or exactly one
    // trailing `:port`. Guard against swallowing a CIDR's `/nn` suffix or a
    // bare IPv6 address (which contains multiple colons and no port here).
    if pattern.matches(':').count() == 1 {
        if let Some((host, port_str)) = pattern.rsplit_once(':') {
            if let Ok(port) = port_str.parse() {
                return (host.to_string(), Some(port));
            }
        }
    }
    (pattern.to_string(), None)
}

fn resolve_ip(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    // DNS lookup is a blocking operation; per §4.D callers may cache at
    // their discretion. This matcher does not cache itself.
    (host, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> NoProxyMatcher {
        NoProxyMatcher::compile(&[
            "localhost".to_string(),
            ".internal.com".to_string(),
            "10.0.0.0/8".to_string(),
            "example.com:9000".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn exact_and_subdomain_matches() {
        let m = matcher();
        assert!(m.bypasses("localhost", 80));
        assert!(m.bypasses("api.internal.com", 80));
        assert!(m.bypasses("internal.com", 80));
    }

    #[test]
    fn cidr_match() {
        let m = matcher();
        assert!(m.bypasses("10.1.2.3", 80));
        assert!(!m.bypasses("11.1.2.3", 80));
    }

    #[test]
    fn port_restricted_pattern() {
        let m = matcher();
        assert!(m.bypasses("example.com", 9000));
        assert!(!m.bypasses("example.com", 80));
    }

    #[test]
    fn unrelated_host_does_not_bypass() {
        let m = matcher();
        assert!(!m.bypasses("other.com", 80));
    }

    #[test]
    fn wildcard_matches_everything() {
        let m = NoProxyMatcher::compile(&["*".to_string()]).unwrap();
        assert!(m.bypasses("anything.example", 1234));
    }

    #[test]
    fn no_proxy_exact_match_law() {
        // §8 "No-proxy exact-match": example.com matches example.com and
        // sub.example.com; .example.com matches both too.
        let exact = NoProxyMatcher::compile(&["example.com".to_string()]).unwrap();
        assert!(exact.bypasses("example.com", 80));
        assert!(exact.bypasses("sub.example.com", 80));

        let dotted = NoProxyMatcher::compile(&[".example.com".to_string()]).unwrap();
        assert!(dotted.bypasses("example.com", 80));
        assert!(dotted.bypasses("sub.example.com", 80));
    }

    #[test]
    fn no_proxy_cidr_law() {
        let m = NoProxyMatcher::compile(&["192.168.1.0/24".to_string()]).unwrap();
        assert!(m.bypasses("192.168.1.1", 80));
        assert!(m.bypasses("192.168.1.254", 80));
        assert!(!m.bypasses("192.168.2.1", 80));
    }

    #[test]
    fn invalid_cidr_is_an_error() {
        assert!(NoProxyMatcher::compile(&["10.0.0.0/abc".to_string()]).is_err());
    }
}
