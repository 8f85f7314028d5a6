//! Cookie jar: a holder of `(name, value, domain, path, expiry, flags)`
//! tuples observing the usual domain/path scoping rules (§3 "Cookie jar").

use crate::error::Error;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp of expiry; `None` means a session cookie.
    pub expires_at: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    fn matches(&self, host: &str, path: &str, secure_context: bool) -> bool {
        if self.secure && !secure_context {
            return false;
        }
        let domain_match = host == self.domain || host.ends_with(&format!(".{}", self.domain));
        let path_match = path == self.path || path.starts_with(&format!("{}/", self.path.trim_end_matches('/')));
        domain_match && path_match
    }
}

/// Thread-safe cookie store (§5 "Cookie jar is expected to be internally
/// thread-safe").
#[derive(Debug, Default)]
pub struct CookieJar {
    // Keyed by (domain, path, name) to allow fast overwrite-on-set.
    cookies: RwLock<HashMap<(String, String, String), Cookie>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or overwrites a cookie (later `set` wins for the same
    /// domain/path/name triple).
    pub fn set(&self, cookie: Cookie) {
        let key = (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone());
        self.cookies.write().expect("cookie jar lock poisoned").insert(key, cookie);
    }

    /// Returns all non-expired cookies applicable to `host`/`path` under
    /// the given scheme (`secure_context` is true for `https://`).
    #[must_use]
    pub fn matching(&self, host: &str, path: &str, secure_context: bool) -> Vec<Cookie> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.cookies
            .read()
            .expect("cookie jar lock poisoned")
            .values()
            .filter(|c| !c.is_expired(now) && c.matches(host, path, secure_context))
            .cloned()
            .collect()
    }

    /// Renders the applicable cookies as a `name=value; name2=value2` header value.
    #[must_use]
    pub fn header_value(&self, host: &str, path: &str, secure_context: bool) -> Option<String> {
        let matches = self.matching(host, path, secure_context);
        if matches.is_empty() {
            return None;
        }
        Some(
            matches
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Parses a `Set-Cookie` header value and stores the result, defaulting
    /// domain/path to the request host/path when not specified.
    pub fn store_set_cookie(&self, header_value: &str, default_domain: &str, default_path: &str) {
        if let Some(cookie) = parse_set_cookie(header_value, default_domain, default_path) {
            self.set(cookie);
        }
    }

    /// Loads a Netscape-format cookie file (tab-separated: domain, subdomain
    /// flag, path, secure flag, expiry, name, value) into the jar.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn load_file(&self, path: &Path) -> Result<(), Error> {
        let contents = std::fs::read_to_string(path)?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 7 {
                continue;
            }
            let expires_at = fields[4].parse::<u64>().ok().filter(|&e| e != 0);
            self.set(Cookie {
                domain: fields[0].trim_start_matches('.').to_string(),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("true"),
                expires_at,
                name: fields[5].to_string(),
                value: fields[6].to_string(),
                http_only: false,
            });
        }
        Ok(())
    }

    /// Writes the jar to `path` in Netscape format via an atomic rename
    /// (§6 "Persisted state").
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the write fails.
    pub async fn save_file(&self, path: &Path) -> Result<(), Error> {
        let mut out = String::from("# Netscape HTTP Cookie File\n");
        for cookie in self.cookies.read().expect("cookie jar lock poisoned").values() {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                cookie.domain,
                "TRUE",
                cookie.path,
                if cookie.secure { "TRUE" } else { "FALSE" },
                cookie.expires_at.unwrap_or(0),
                cookie.name,
                cookie.value,
            ));
        }
        crate::atomic::atomic_write(path, out.as_bytes()).await?;
        Ok(())
    }
}

fn parse_set_cookie(header_value: &str, default_domain: &str, default_path: &str) -> Option<Cookie> {
    let mut parts = header_value.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;

    let mut cookie = Cookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        domain: default_domain.to_string(),
        path: default_path.to_string(),
        expires_at: None,
        secure: false,
        http_only: false,
    };

    for attr in parts {
        let attr = attr.trim();
        if let Some((key, val)) = attr.split_once('=') {
            match key.trim().to_lowercase().as_str() {
                "domain" => cookie.domain = val.trim().trim_start_matches('.').to_string(),
                "path" => cookie.path = val.trim().to_string(),
                "max-age" => {
                    if let Ok(secs) = val.trim().parse::<i64>() {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map_or(0, |d| d.as_secs() as i64);
                        cookie.expires_at = Some((now + secs).max(0) as u64);
                    }
                }
                "expires" => {
                    if let Ok(when) = httpdate::parse_http_date(val.trim()) {
                        cookie.expires_at = when
                            .duration_since(UNIX_EPOCH)
                            .ok()
                            .map(|d| d.as_secs());
                    }
                }
                _ => {}
            }
        } else {
            match attr.to_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_and_path_scoping() {
        let jar = CookieJar::new();
        jar.set(Cookie {
            name: "session".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/api".into(),
            expires_at: None,
            secure: false,
            http_only: false,
        });

        assert!(jar.header_value("example.com", "/api/users", false).is_some());
        assert!(jar.header_value("sub.example.com", "/api", false).is_some());
        assert!(jar.header_value("other.com", "/api", false).is_none());
        assert!(jar.header_value("example.com", "/other", false).is_none());
    }

    #[test]
    fn secure_cookie_requires_secure_context() {
        let jar = CookieJar::new();
        jar.set(Cookie {
            name: "s".into(),
            value: "v".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires_at: None,
            secure: true,
            http_only: false,
        });
        assert!(jar.header_value("example.com", "/", false).is_none());
        assert!(jar.header_value("example.com", "/", true).is_some());
    }

    #[test]
    fn expired_cookies_are_excluded() {
        let jar = CookieJar::new();
        jar.set(Cookie {
            name: "old".into(),
            value: "v".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires_at: Some(1),
            secure: false,
            http_only: false,
        });
        assert!(jar.header_value("example.com", "/", false).is_none());
    }

    #[test]
    fn parses_set_cookie_header() {
        let cookie = parse_set_cookie(
            "id=42; Domain=.example.com; Path=/; Secure; HttpOnly",
            "fallback.com",
            "/",
        )
        .unwrap();
        assert_eq!(cookie.name, "id");
        assert_eq!(cookie.value, "42");
        assert_eq!(cookie.domain, "example.com");
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[tokio::test]
    async fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let jar = CookieJar::new();
        jar.set(Cookie {
            name: "a".into(),
            value: "1".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires_at: None,
            secure: false,
            http_only: false,
        });
        jar.save_file(&path).await.unwrap();

        let loaded = CookieJar::new();
        loaded.load_file(&path).unwrap();
        assert!(loaded.header_value("example.com", "/", false).is_some());
    }
}
