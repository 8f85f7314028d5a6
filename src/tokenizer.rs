//! Tokenizer: splits a curl-compatible command string into flags, literal
//! values, and variable references (§4.B).
//!
//! The walk is a single pass over the characters, tracking single-quote,
//! double-quote, and backslash-escape state. Quote characters are kept in
//! the emitted literal text; the option parser strips one layer of
//! surrounding quotes at value-commit time (§4.C).

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Flag(String),
    Literal(String),
    VarRef(String),
}

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("static regex is valid"));

/// Joins multi-line input (`\`-continued lines) and strips whole-line
/// `#` comments before the character-level scan begins.
fn preprocess(input: &str) -> String {
    let joined = input.replace("\r\n", "\n").replace("\\\n", " ");
    joined
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a command string into raw whitespace-delimited fields, honoring
/// quotes and backslash escapes. Each field still carries its quote
/// characters; classification into Flag/Literal/VarRef happens afterward.
fn split_fields(input: &str) -> Result<Vec<String>, Error> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut has_content = false;

    for ch in input.chars() {
        if escaped {
            // The escape is preserved verbatim alongside the escaped
            // character; downstream consumers decide whether to collapse it.
            current.push('\\');
            current.push(ch);
            escaped = false;
            has_content = true;
            continue;
        }

        match ch {
            '\\' if !in_single => {
                escaped = true;
                has_content = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
                has_content = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
                has_content = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_content {
                    fields.push(std::mem::take(&mut current));
                    has_content = false;
                }
            }
            c => {
                current.push(c);
                has_content = true;
            }
        }
    }

    if in_single || in_double || escaped {
        return Err(Error::unmatched_quote());
    }

    if has_content {
        fields.push(current);
    }

    Ok(fields)
}

/// Splits a single field into `Literal`/`VarRef` tokens at every
/// `$NAME`/`${NAME}` boundary found in it.
fn tokenize_variables(field: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;

    for m in VAR_PATTERN.find_iter(field) {
        if m.start() > last_end {
            tokens.push(Token::Literal(field[last_end..m.start()].to_string()));
        }
        let caps = VAR_PATTERN.captures(m.as_str()).expect("matched above");
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .expect("pattern always captures one group")
            .as_str();
        tokens.push(Token::VarRef(name.to_string()));
        last_end = m.end();
    }

    if last_end < field.len() {
        tokens.push(Token::Literal(field[last_end..].to_string()));
    }

    if tokens.is_empty() {
        tokens.push(Token::Literal(String::new()));
    }

    tokens
}

/// Tokenizes a (possibly multi-line) curl-compatible command string.
///
/// # Errors
/// Returns [`Error::unmatched_quote`] if the input ends while still inside
/// a quoted region.
pub fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let preprocessed = preprocess(input);
    let fields = split_fields(&preprocessed)?;

    let mut tokens = Vec::new();
    for field in fields {
        let has_var = VAR_PATTERN.is_match(&field);
        if !has_var && field.starts_with('-') && field.len() >= 2 {
            tokens.push(Token::Flag(field));
        } else {
            tokens.extend(tokenize_variables(&field));
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_flags_and_values() {
        let tokens = tokenize("-X POST https://api.example.com/data").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Flag("-X".into()),
                Token::Literal("POST".into()),
                Token::Literal("https://api.example.com/data".into()),
            ]
        );
    }

    #[test]
    fn quoted_value_retains_quotes() {
        let tokens = tokenize(r#"-d '{"key":"value"}'"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Flag("-d".into()),
                Token::Literal(r#"'{"key":"value"}'"#.into()),
            ]
        );
    }

    #[test]
    fn unmatched_quote_is_an_error() {
        assert!(tokenize("-d 'unterminated").is_err());
    }

    #[test]
    fn variable_reference_forms() {
        let tokens = tokenize("-d $POST_DATA ${API_URL}/data").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Flag("-d".into()),
                Token::VarRef("POST_DATA".into()),
                Token::VarRef("API_URL".into()),
                Token::Literal("/data".into()),
            ]
        );
    }

    #[test]
    fn leading_curl_word_is_just_a_literal_token() {
        // Consuming the literal "curl" word is the option parser's job (§4.C);
        // the tokenizer just emits it like any other literal.
        let tokens = tokenize("curl https://example.com").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Literal("curl".into()),
                Token::Literal("https://example.com".into()),
            ]
        );
    }

    #[test]
    fn multiline_continuation_and_comments() {
        let cmd = "curl -X POST \\\n  -d 'x' \\\n# a comment line\nhttps://example.com";
        let tokens = tokenize(cmd).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Literal("curl".into()),
                Token::Flag("-X".into()),
                Token::Literal("POST".into()),
                Token::Flag("-d".into()),
                Token::Literal("'x'".into()),
                Token::Literal("https://example.com".into()),
            ]
        );
    }

    #[test]
    fn tokenization_is_total_for_balanced_input() {
        // Every well-formed (balanced-quote) command tokenizes without error.
        let cases = [
            "curl https://example.com",
            "-X POST -H 'A: b' -d \"{}\"",
            "-u user:pass -x http://proxy:8080",
        ];
        for c in cases {
            assert!(tokenize(c).is_ok(), "expected {c:?} to tokenize");
        }
    }
}
