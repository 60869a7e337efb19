use std::process;
use std::time::Instant;

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use clap::Args;
use dynres::{Metadata, ResNetConfig, SparsityConfig};

use super::{resolve_config, ModelArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Number of random 32x32 images in the batch
    #[arg(short, long, default_value = "4")]
    pub batch: usize,
    /// Use the GPU backend (default: CPU ndarray)
    #[arg(long)]
    pub gpu: bool,
    /// Print the sparsity report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn cmd_run(args: RunArgs) {
    let config = resolve_config(&args.model);
    if args.batch == 0 {
        eprintln!("error: batch must contain at least one image");
        process::exit(1);
    }

    if args.gpu {
        run_on::<Wgpu>(&config, &args, &WgpuDevice::default());
    } else {
        run_on::<NdArray>(&config, &args, &Default::default());
    }
}

/// Build the network and run one random batch through it.
fn forward_random<B: Backend>(
    config: &ResNetConfig,
    batch: usize,
    device: &B::Device,
) -> dynres::Result<(Tensor<B, 2>, Metadata<B>)> {
    let model = config.init::<B>(device)?;
    let meta = if config.sparse {
        Some(SparsityConfig::new().init::<B>()?)
    } else {
        None
    };
    let images = Tensor::<B, 4>::random([batch, 3, 32, 32], Distribution::Normal(0.0, 1.0), device);
    Ok(model.forward(images, meta)?)
}

fn run_on<B: Backend>(config: &ResNetConfig, args: &RunArgs, device: &B::Device) {
    let start = Instant::now();
    let (logits, meta) = match forward_random::<B>(config, args.batch, device) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    eprintln!(
        "resnet{} ({}): logits {:?} in {:.1}ms",
        config.depth(),
        if config.sparse { "sparse" } else { "dense" },
        logits.dims(),
        elapsed.as_secs_f64() * 1000.0,
    );

    let Some(ctx) = meta else {
        return;
    };
    let report = ctx.report();
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: cannot serialize report: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", report);
    }
}
