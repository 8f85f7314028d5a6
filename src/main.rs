use clap::Parser;
use curlkit::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    if let Err(error) = cli::run(&cli).await {
        cli::print_error(&error, json_errors);
        std::process::exit(cli::exit_code_for(&error));
    }
}
