mod commands;
mod daemon;
mod notifier;
mod watcher;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "icswatch")]
#[command(version)]
#[command(
    about = "Watch local .ics calendar directories and raise desktop notifications before events start"
)]
struct Cli {
    /// Path to an alternative configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (the default when no command is given)
    Run,
    /// Write a default configuration and notification templates
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(cli.config).await,
        Commands::Init => commands::init::run(),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
