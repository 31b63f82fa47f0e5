use anyhow::Result;
use clap::{Parser, Subcommand};

mod cli;

use cli::completions::CompletionsCommand;
use cli::config::ConfigCommand;
use cli::inspect::InspectCommand;
use cli::run::RunCommand;
use cli::sample::SampleCommand;
use cli::serve::ServeCommand;

#[derive(Parser)]
#[command(name = "naclbox")]
#[command(about = "Load x86-64 ELF images into a fixed-address sandbox region and call them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunCommand),
    Inspect(InspectCommand),
    Sample(SampleCommand),
    Serve(ServeCommand),
    Config(ConfigCommand),
    Completions(CompletionsCommand),
}

fn main() -> Result<()> {
    // Initialize logging with INFO level by default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Inspect(cmd) => cmd.execute(),
        Commands::Sample(cmd) => cmd.execute(),
        Commands::Serve(cmd) => cmd.execute(),
        Commands::Config(cmd) => cmd.execute(),
        Commands::Completions(cmd) => cmd.execute(),
    }
}
