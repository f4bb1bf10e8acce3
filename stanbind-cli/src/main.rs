mod commands;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stanbind")]
#[command(author, version, about = "Compile and evaluate Stan models", long_about = None)]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a Stan program, or reuse its cached module
    Compile(commands::compile::CompileArgs),

    /// Show parameter counts and names of a cached model
    Inspect(commands::inspect::InspectArgs),

    /// Evaluate the log density of a cached model
    LogProb(commands::log_prob::LogProbArgs),

    /// List cached models
    List,

    /// Remove cached models
    Clean(commands::clean::CleanArgs),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Compile(args) => commands::compile::execute(args),
        Commands::Inspect(args) => commands::inspect::execute(args),
        Commands::LogProb(args) => commands::log_prob::execute(args),
        Commands::List => commands::list::execute(),
        Commands::Clean(args) => commands::clean::execute(args),
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
