pub mod config;
pub mod inspect;
pub mod run;

use std::path::PathBuf;
use std::process;

use burn::config::Config;
use clap::Args;
use dynres::ResNetConfig;

/// Network selection shared by every subcommand.
#[derive(Args)]
pub struct ModelArgs {
    /// Network depth: 8, 14, 20, 26 or 32
    #[arg(short, long, default_value = "20")]
    pub depth: usize,
    /// Execute blocks through masking units
    #[arg(long)]
    pub sparse: bool,
    /// Number of output classes
    #[arg(long, default_value = "10")]
    pub classes: usize,
    /// Load the network configuration from a JSON file instead of a preset
    #[arg(long, value_name = "PATH", conflicts_with_all = ["depth", "sparse", "classes"])]
    pub config: Option<PathBuf>,
}

/// Resolve the network configuration, exiting on invalid input.
pub fn resolve_config(args: &ModelArgs) -> ResNetConfig {
    let config = match &args.config {
        Some(path) => match ResNetConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: cannot load '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => match ResNetConfig::preset(args.depth, args.sparse) {
            Ok(config) => config.with_num_classes(args.classes),
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        },
    };

    if let Err(e) = config.validate() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
    config
}
