//! Option parser: consumes a token stream and produces an option map,
//! then a typed [`crate::request::RequestConfig`] (§4.C).
//!
//! The state machine has exactly two states, `AwaitFlag` and
//! `CollectValue`. A bare (non-flag) value seen in `AwaitFlag` accumulates
//! under the synthetic `URL` key. Unknown flags are recognized by the
//! tokenizer (anything starting with `-`) but silently ignored by the flag
//! table below — this keeps user-pasted curl commands working even when
//! they use flags this crate does not model (§9 "Unknown flags").

use crate::error::Error;
use crate::tokenizer::{tokenize, Token};
use crate::variables::VariableResolver;
use indexmap::IndexMap;

/// The synthetic key under which a trailing bare value (the target URL) is stored.
pub const URL_KEY: &str = "URL";

/// Canonical semantic keys a recognized flag resolves to.
pub mod keys {
    pub const METHOD: &str = "method";
    pub const HEADER: &str = "header";
    pub const DATA: &str = "data";
    pub const FORM: &str = "form";
    pub const USER: &str = "user";
    pub const PROXY: &str = "proxy";
    pub const MAX_TIME: &str = "max-time";
    pub const CONNECT_TIMEOUT: &str = "connect-timeout";
    pub const LOCATION: &str = "location";
    pub const MAX_REDIRS: &str = "max-redirs";
    pub const COMPRESSED: &str = "compressed";
    pub const CERT: &str = "cert";
    pub const KEY: &str = "key";
    pub const CACERT: &str = "cacert";
    pub const INSECURE: &str = "insecure";
    pub const USER_AGENT: &str = "user-agent";
    pub const HTTP2: &str = "http2";
    pub const OUTPUT: &str = "output";
    pub const SILENT: &str = "silent";
    pub const VERBOSE: &str = "verbose";
    pub const INCLUDE: &str = "include";
    pub const COOKIE: &str = "cookie";
    pub const COOKIE_JAR: &str = "cookie-jar";
    pub const REFERER: &str = "referer";
    pub const RETRY: &str = "retry";
    pub const RETRY_MAX_TIME: &str = "retry-max-time";
    pub const PROXY_CERT: &str = "proxy-cert";
    pub const PROXY_KEY: &str = "proxy-key";
    pub const PROXY_CACERT: &str = "proxy-cacert";
    pub const PROXY_INSECURE: &str = "proxy-insecure";
}

/// Header flags, etc. can repeat; the option map stores one joined string
/// per key as specified, so repeats of a multi-value flag (`-H`) are
/// disambiguated downstream by splitting on the recorded occurrence order.
/// To keep that possible without changing the map's value type, repeated
/// flags are appended to the prior value joined by a NUL separator — an
/// implementation detail local to this module and `RequestConfig::from_options`.
pub const MULTI_VALUE_SEP: char = '\u{0}';

/// Maps a flag token's text (e.g. `"-X"`, `"--request"`) to its canonical
/// semantic key. Returns `None` for an unrecognized flag (silently ignored).
fn resolve_flag(flag: &str) -> Option<&'static str> {
    Some(match flag {
        "-X" | "--request" => keys::METHOD,
        "-H" | "--header" => keys::HEADER,
        "-d" | "--data" | "--data-ascii" | "--data-binary" => keys::DATA,
        "-F" | "--form" => keys::FORM,
        "-u" | "--user" => keys::USER,
        "-x" | "--proxy" => keys::PROXY,
        "--max-time" => keys::MAX_TIME,
        "--connect-timeout" => keys::CONNECT_TIMEOUT,
        "-L" | "--location" => keys::LOCATION,
        "--max-redirs" => keys::MAX_REDIRS,
        "--compressed" => keys::COMPRESSED,
        "--cert" => keys::CERT,
        "--key" => keys::KEY,
        "--cacert" => keys::CACERT,
        "-k" | "--insecure" => keys::INSECURE,
        "-A" | "--user-agent" => keys::USER_AGENT,
        "--http2" => keys::HTTP2,
        "-o" | "--output" => keys::OUTPUT,
        "-s" | "--silent" => keys::SILENT,
        "-v" | "--verbose" => keys::VERBOSE,
        "-i" | "--include" => keys::INCLUDE,
        "-b" | "--cookie" => keys::COOKIE,
        "-c" | "--cookie-jar" => keys::COOKIE_JAR,
        "-e" | "--referer" => keys::REFERER,
        "--retry" => keys::RETRY,
        "--retry-max-time" => keys::RETRY_MAX_TIME,
        "--proxy-cert" => keys::PROXY_CERT,
        "--proxy-key" => keys::PROXY_KEY,
        "--proxy-cacert" => keys::PROXY_CACERT,
        "--proxy-insecure" => keys::PROXY_INSECURE,
        _ => return None,
    })
}

/// Flags that take no value (booleans); their presence alone sets the key
/// to an empty string rather than consuming the following token as a value.
fn is_boolean_flag(canonical: &str) -> bool {
    matches!(
        canonical,
        keys::LOCATION
            | keys::COMPRESSED
            | keys::INSECURE
            | keys::HTTP2
            | keys::SILENT
            | keys::VERBOSE
            | keys::INCLUDE
            | keys::PROXY_INSECURE
    )
}

/// Ordered key → joined-string option map produced by parsing a token stream.
pub type OptionMap = IndexMap<String, String>;

enum ParseState {
    AwaitFlag,
    CollectValue {
        canonical: &'static str,
        buffer: String,
    },
}

/// Parses a token stream into an [`OptionMap`], resolving `VarRef` tokens
/// through `resolver`.
///
/// # Errors
/// Returns [`Error::unresolved_variable`] if `resolver` is strict and a
/// referenced name is absent.
pub fn parse_tokens(tokens: &[Token], resolver: &VariableResolver) -> Result<OptionMap, Error> {
    let mut map = OptionMap::new();
    let mut state = ParseState::AwaitFlag;
    let mut tokens = tokens.iter().peekable();

    // The known curl-word before option resolution.
    if let Some(Token::Literal(lit)) = tokens.peek() {
        if lit == "curl" {
            tokens.next();
        }
    }

    let resolve = |name: &str| -> Result<String, Error> {
        resolver
            .resolve(name)
            .or_else(|| (!resolver.is_strict()).then(String::new))
            .ok_or_else(|| Error::unresolved_variable(name))
    };

    for token in tokens {
        match token {
            Token::Flag(text) => {
                if let ParseState::CollectValue { canonical, buffer } = &state {
                    commit(&mut map, canonical, buffer);
                }
                match resolve_flag(text) {
                    Some(canonical) if is_boolean_flag(canonical) => {
                        commit(&mut map, canonical, "");
                        state = ParseState::AwaitFlag;
                    }
                    Some(canonical) => {
                        state = ParseState::CollectValue {
                            canonical,
                            buffer: String::new(),
                        };
                    }
                    None => {
                        state = ParseState::AwaitFlag;
                    }
                }
            }
            Token::Literal(text) => match &mut state {
                ParseState::AwaitFlag => append(&mut map, URL_KEY, text),
                ParseState::CollectValue { buffer, .. } => buffer.push_str(text),
            },
            Token::VarRef(name) => {
                let value = resolve(name)?;
                match &mut state {
                    ParseState::AwaitFlag => append(&mut map, URL_KEY, &value),
                    ParseState::CollectValue { buffer, .. } => buffer.push_str(&value),
                }
            }
        }
    }

    if let ParseState::CollectValue { canonical, buffer } = &state {
        commit(&mut map, canonical, buffer);
    }

    // Trim one layer of surrounding quotes from every committed value.
    for value in map.values_mut() {
        *value = trim_quotes(value);
    }

    Ok(map)
}

/// Tokenizes and parses a full command string in one call.
///
/// # Errors
/// See [`tokenize`] and [`parse_tokens`].
pub fn parse_command(command: &str, resolver: &VariableResolver) -> Result<OptionMap, Error> {
    let tokens = tokenize(command)?;
    parse_tokens(&tokens, resolver)
}

/// Parses an already-tokenized argv-style argument list (the "args" entry
/// point form). Each element is treated as a single pre-quoted field, so
/// no quote/escape scanning happens — only variable expansion.
///
/// # Errors
/// See [`parse_tokens`].
pub fn parse_args(args: &[String], resolver: &VariableResolver) -> Result<OptionMap, Error> {
    let mut tokens = Vec::new();
    for arg in args {
        if arg.starts_with('-') && arg.len() >= 2 && !arg.contains('$') {
            tokens.push(Token::Flag(arg.clone()));
        } else if arg == "curl" {
            tokens.push(Token::Literal(arg.clone()));
        } else {
            tokens.push(Token::Literal(arg.clone()));
        }
    }
    parse_tokens(&tokens, resolver)
}

fn commit(map: &mut OptionMap, canonical: &str, value: &str) {
    append(map, canonical, value);
}

/// A flag repeated on the command line (e.g. two `-H` headers) accumulates
/// with a NUL separator; `RequestConfig::from_options` splits on it again.
fn append(map: &mut OptionMap, key: &str, value: &str) {
    map.entry(key.to_string())
        .and_modify(|existing| {
            existing.push(MULTI_VALUE_SEP);
            existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}

fn trim_quotes(value: &str) -> String {
    let trimmed = value.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"'))
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_resolver() -> VariableResolver {
        VariableResolver::environment()
    }

    #[test]
    fn scenario_1_post_with_literal_body() {
        let map = parse_command(
            "curl -X POST -d '{\"key\":\"value\"}' https://api.example.com/data",
            &env_resolver(),
        )
        .unwrap();
        assert_eq!(map.get(keys::METHOD).unwrap(), "POST");
        assert_eq!(map.get(keys::DATA).unwrap(), "{\"key\":\"value\"}");
        assert_eq!(map.get(URL_KEY).unwrap(), "https://api.example.com/data");
    }

    #[test]
    fn scenario_2_variable_substitution() {
        let mut vars = HashMap::new();
        vars.insert("POST_DATA".to_string(), "{\"k\":\"v\"}".to_string());
        vars.insert("API_URL".to_string(), "https://api.example.com".to_string());
        let resolver = VariableResolver::explicit(vars);

        let map = parse_command("curl -X POST -d '$POST_DATA' $API_URL/data", &resolver).unwrap();
        assert_eq!(map.get(keys::DATA).unwrap(), "{\"k\":\"v\"}");
        assert_eq!(map.get(URL_KEY).unwrap(), "https://api.example.com/data");
    }

    #[test]
    fn strict_mode_fails_on_unresolved_variable() {
        let resolver = VariableResolver::explicit(HashMap::new());
        let result = parse_command("curl -d $MISSING https://example.com", &resolver);
        assert!(result.is_err());
    }

    #[test]
    fn repeated_header_flags_join_with_sentinel() {
        let map = parse_command(
            "-H 'A: 1' -H 'B: 2' https://example.com",
            &env_resolver(),
        )
        .unwrap();
        let joined = map.get(keys::HEADER).unwrap();
        assert_eq!(joined.matches(MULTI_VALUE_SEP).count(), 1);
        assert!(joined.contains("A: 1"));
        assert!(joined.contains("B: 2"));
    }

    #[test]
    fn boolean_flags_do_not_consume_the_next_token() {
        let map = parse_command("-L -k https://example.com", &env_resolver()).unwrap();
        assert_eq!(map.get(keys::LOCATION).unwrap(), "");
        assert_eq!(map.get(keys::INSECURE).unwrap(), "");
        assert_eq!(map.get(URL_KEY).unwrap(), "https://example.com");
    }

    #[test]
    fn unknown_flags_are_silently_ignored() {
        let map = parse_command("--some-unknown-flag value https://example.com", &env_resolver())
            .unwrap();
        assert!(!map.contains_key("some-unknown-flag"));
        assert_eq!(map.get(URL_KEY).unwrap(), "valuehttps://example.com");
    }

    #[test]
    fn parse_idempotence() {
        let resolver = env_resolver();
        let map1 = parse_command("-X POST -d 'body' https://example.com/x", &resolver).unwrap();
        // Re-emit as a canonical command and re-parse.
        let reemitted = format!(
            "-X {} -d '{}' {}",
            map1.get(keys::METHOD).unwrap(),
            map1.get(keys::DATA).unwrap(),
            map1.get(URL_KEY).unwrap()
        );
        let map2 = parse_command(&reemitted, &resolver).unwrap();
        assert_eq!(map1, map2);
    }
}
