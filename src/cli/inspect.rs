use std::process;

use burn::backend::NdArray;
use burn::module::Module;
use dynres::model::{Execution, Shortcut};

use super::{resolve_config, ModelArgs};

pub fn cmd_inspect(args: ModelArgs) {
    let config = resolve_config(&args);
    let model = match config.init::<NdArray>(&Default::default()) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    println!(
        "resnet{}: {} blocks, {} classes, {} parameters",
        config.depth(),
        model.num_blocks(),
        config.num_classes,
        model.num_params(),
    );
    for (s, stage) in model.stages().iter().enumerate() {
        println!("stage {}", s + 1);
        for (b, block) in stage.blocks().iter().enumerate() {
            let [inp, out] = block.channels();
            let shortcut = match block.shortcut() {
                Shortcut::Identity => "identity",
                Shortcut::Projection => "projection",
            };
            let mode = match block.execution() {
                Execution::Dense => "dense",
                Execution::Sparse(unit) if unit.is_all_active() => "sparse (all active)",
                Execution::Sparse(_) => "sparse",
            };
            println!(
                "  block {}: {:>2} -> {:>2}  {:<10}  {}",
                b + 1,
                inp,
                out,
                shortcut,
                mode
            );
        }
    }
}
