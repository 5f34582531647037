//! InfraCheck CLI - Main Entry Point
//!
//! Runs apply → validate → destroy lifecycle scenarios against Terraform
//! configurations. Exit status: 0 all passed, 1 a run failed, 2 the
//! harness itself could not run.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{run, validate};

/// InfraCheck - Terraform lifecycle validation
#[derive(Parser)]
#[command(name = "infracheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format for the results summary
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output (engine output lines are logged at debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run lifecycle scenarios (apply, validate one output, destroy)
    Run(run::RunArgs),

    /// Check scenario files without invoking the engine
    Validate(validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Validate(args) => validate::execute(args, cli.format),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}
