//! The CLI surface (§6 "CLI surface"): a thin wrapper over the facade that
//! delegates a curl-compatible command or argv list to the execution
//! engine and writes the response to stdout.

use crate::engine::{self, EngineResponse};
use crate::error::{Error, ErrorKind};
use crate::request::RequestConfig;
use crate::variables::VariableResolver;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

pub mod tracing_init;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A programmable HTTP client that runs curl-compatible commands",
    long_about = "curlkit executes curl-compatible command strings through a single \
                  retrying, proxy- and TLS-aware engine.\n\n\
                  Examples:\n  \
                  curlkit run -- -X POST -d '{\"a\":1}' https://example.com\n  \
                  curlkit run --var HOST=example.com -- https://$HOST/path\n  \
                  curlkit from-file request.curl"
)]
pub struct Cli {
    /// Output errors as structured JSON on stderr instead of plain text.
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Raise the tracing level; repeatable (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the response body echoed to stdout.
    #[arg(short = 'q', long = "silent", global = true)]
    pub silent: bool,

    /// Bind `KEY=VALUE` into the explicit variable map (repeatable). Once
    /// any `--var` is given, the strict with-vars entry point is used
    /// instead of the lenient environment one.
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Write the response body to this path instead of stdout.
    #[arg(short, long, global = true, value_name = "PATH")]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a curl-compatible command given as trailing arguments.
    Run {
        /// The curl-compatible argv, e.g. `-X POST -d @body.json https://host/path`.
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },
    /// Execute a (possibly multi-line) curl-compatible script file.
    FromFile {
        /// Path to the script file.
        path: PathBuf,
    },
}

fn parse_vars(raw: &[String]) -> Result<HashMap<String, String>, Error> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| Error::invalid_config(format!("malformed --var '{entry}', expected KEY=VALUE")))
        })
        .collect()
}

/// Exit code mapping (§6 "Exit codes"): `0` success, `1` configuration or
/// setup error, `2` network/timeout error, `3` retries exhausted.
#[must_use]
pub fn exit_code_for(error: &Error) -> i32 {
    match error.kind() {
        ErrorKind::Configuration | ErrorKind::Setup => 1,
        ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Protocol => 2,
        ErrorKind::Policy => 3,
    }
}

/// Prints `error` to stderr, as structured JSON when `json_errors` is set.
pub fn print_error(error: &Error, json_errors: bool) {
    if json_errors {
        match serde_json::to_string(&error.to_json()) {
            Ok(rendered) => eprintln!("{rendered}"),
            Err(_) => eprintln!("{error}"),
        }
    } else {
        eprintln!("error: {error}");
    }
}

fn build_config(cli: &Cli, vars: HashMap<String, String>) -> Result<RequestConfig, Error> {
    let resolver = if vars.is_empty() {
        VariableResolver::environment()
    } else {
        VariableResolver::explicit(vars)
    };

    let config = match &cli.command {
        Command::Run { args } => RequestConfig::from_args(args, &resolver)?,
        Command::FromFile { path } => {
            let command = std::fs::read_to_string(path)?;
            RequestConfig::from_command(&command, &resolver)?
        }
    };
    config.validate()?;
    Ok(config)
}

/// Prepends a status line and headers to `body`, per `-i`/`--include`.
fn with_included_headers(response: &EngineResponse) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", response.status).into_bytes();
    for (name, values) in &response.headers {
        for value in values {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
    out
}

/// Runs the parsed CLI invocation to completion, writing the response body
/// to a destination and suppressing stdout echo under a precedence where
/// the embedded curl-style `-o`/`-s` flags (parsed as part of the command
/// itself) take priority over the top-level `--output`/`--silent` globals.
///
/// # Errors
/// Returns any error the config build, dispatch, or output write can produce.
pub async fn run(cli: &Cli) -> Result<(), Error> {
    if cli.verbose > 0 {
        tracing_init::init_tracing(cli.verbose);
    }

    let vars = parse_vars(&cli.vars)?;
    let config = build_config(cli, vars)?;

    let output_file = config.output_file.clone().or_else(|| cli.output.as_ref().map(|p| p.display().to_string()));
    let silent = config.silent || cli.silent;
    let include_headers = config.include_headers;

    let response = engine::process(&config).await?;

    let body = if include_headers {
        with_included_headers(&response)
    } else {
        response.body.clone()
    };

    if let Some(destination) = &output_file {
        std::fs::write(destination, &body)?;
    } else if !silent {
        std::io::stdout().write_all(&body)?;
    }

    if !(100..400).contains(&response.status) {
        return Err(Error::protocol_error(format!(
            "request completed with non-success status {}",
            response.status
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_vars() {
        let vars = parse_vars(&["HOST=example.com".to_string(), "PORT=8080".to_string()]).unwrap();
        assert_eq!(vars.get("HOST"), Some(&"example.com".to_string()));
        assert_eq!(vars.get("PORT"), Some(&"8080".to_string()));
    }

    #[test]
    fn rejects_a_var_without_equals() {
        assert!(parse_vars(&["NOEQUALS".to_string()]).is_err());
    }

    #[test]
    fn exit_codes_follow_the_kind_table() {
        assert_eq!(exit_code_for(&Error::invalid_url("x")), 1);
        assert_eq!(exit_code_for(&Error::network_error("boom")), 2);
        assert_eq!(exit_code_for(&Error::deadline_exceeded()), 2);
        assert_eq!(exit_code_for(&Error::retry_limit_exceeded(3, "boom")), 3);
    }
}
