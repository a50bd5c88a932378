//! uml CLI - batched PlantUML rendering.
//!
//! Provides commands for:
//! - `render`: Render diagram files through the artifact cache

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::RenderArgs;
use output::Output;

/// uml - batched PlantUML rendering.
#[derive(Parser)]
#[command(name = "uml", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render diagram files and print artifact paths.
    Render(RenderArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    let verbose = matches!(&cli.command, Commands::Render(args) if args.verbose);

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, EnvFilter::DEFAULT_ENV))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Render(args) => args.execute(),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}

/// `--verbose` enables INFO level, otherwise use `env_var` or default to WARN.
fn log_filter(verbose: bool, env_var: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_env(env_var).unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}
