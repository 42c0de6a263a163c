//! CLI entry point for bpauto.

use bpauto::cli::{self, Cli};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    // A missing .env file is fine: the API key may come from the environment
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // WARN by default, DEBUG with --debug; RUST_LOG takes precedence
    let default_level = if cli.debug() { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
