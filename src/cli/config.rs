use std::path::PathBuf;
use std::process;

use burn::config::Config;
use clap::Args;

use super::{resolve_config, ModelArgs};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Output JSON file
    #[arg(short, long, default_value = "resnet.json")]
    pub output: PathBuf,
}

pub fn cmd_config(args: ConfigArgs) {
    let config = resolve_config(&args.model);
    if let Err(e) = config.save(&args.output) {
        eprintln!("error: cannot write '{}': {}", args.output.display(), e);
        process::exit(1);
    }
    eprintln!(
        "wrote resnet{} configuration to {}",
        config.depth(),
        args.output.display()
    );
}
