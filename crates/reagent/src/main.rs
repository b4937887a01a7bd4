//! reagent - reasoning-action agent for your terminal

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{init_command, run_command, status_command, tools_command, RunOptions};

/// reagent - reasoning-action agent for your terminal
#[derive(Parser)]
#[command(name = "reagent")]
#[command(about = "◆ A reasoning-action agent engine with guarded tool calls")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and workspace
    Init,
    /// Show configuration status
    Status,
    /// List the tools available to the agent
    Tools,
    /// Run a task through the reasoning loop
    Run {
        /// Task for the agent
        #[arg(short, long)]
        message: String,
        /// Ask before every tool call
        #[arg(short, long)]
        confirm: bool,
        /// Override the iteration bound
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Keep going until the model answers or marks an action done
        #[arg(long)]
        until_done: bool,
        /// Print model output as it streams
        #[arg(long)]
        stream: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

/// `--verbose` forces debug; otherwise `RUST_LOG`, falling back to warn
fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

fn init_tracing(verbose: bool) {
    let filter = filter(verbose);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(matches!(cli.command, Commands::Run { verbose: true, .. }));

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Status => status_command().await,
        Commands::Tools => tools_command().await,
        Commands::Run {
            message,
            confirm,
            max_iterations,
            until_done,
            stream,
            json,
            verbose,
        } => {
            run_command(RunOptions {
                message,
                confirm,
                max_iterations,
                until_done,
                stream,
                json,
                verbose,
            })
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}
