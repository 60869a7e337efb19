use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::config::{cmd_config, ConfigArgs};
use cli::inspect::cmd_inspect;
use cli::run::{cmd_run, RunArgs};
use cli::ModelArgs;

#[derive(Parser)]
#[command(
    name = "dynres",
    version,
    about = "CIFAR ResNets with dynamic sparse convolution"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Forward a random batch and report mask sparsity
    Run(RunArgs),
    /// Print stage and block layout of a network
    Inspect(ModelArgs),
    /// Write a network configuration as JSON
    Config(ConfigArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Inspect(args) => cmd_inspect(args),
        Command::Config(args) => cmd_config(args),
    }
}
