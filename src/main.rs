//! Export Catalog - browse the storefront's products and reviews
//!
//! A command-line client for the export business's catalog database: product
//! listings through the shared cache, product detail, the public review feed
//! and dashboard statistics.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use export_catalog::app::{App, AppError};
use export_catalog::cli::{log_filter, parse_environment_arg, Cli};
use export_catalog::config::Settings;

/// Sets up logging to stderr, honouring `RUST_LOG` over the `-v` count
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Loads settings, applies CLI overrides and runs the command
async fn run(cli: &Cli) -> Result<String, AppError> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(env) = &cli.environment {
        settings.environment = parse_environment_arg(env)?;
    }

    let app = App::from_settings(settings, cli.fixture.as_deref())?;
    app.run(&cli.command).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(output) => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
