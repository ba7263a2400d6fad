use burn::{backend::Autodiff, config::Config};
use clap::Parser;
use std::{error::Error, path::PathBuf};
use vsr::{train, TrainingConfig};

#[cfg(feature = "wgpu")]
type Backend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "wgpu"))]
type Backend = burn::backend::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train an SRGAN-style super-resolution model", long_about = None)]
struct Cli {
    /// Training configuration (JSON); defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of high-resolution training images
    train_dir: PathBuf,

    /// Directory of high-resolution validation images
    valid_dir: PathBuf,

    /// Output directory for checkpoints and samples
    #[arg(short, long, default_value = "/tmp/vsr")]
    out_dir: PathBuf,

    /// Continue from the checkpoints in the output directory
    #[arg(long)]
    resume: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .init();

    let config = match &cli.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::new(),
    };
    log::info!("training with {config}");

    let device = Default::default();
    train::<Autodiff<Backend>>(
        config,
        &cli.train_dir,
        &cli.valid_dir,
        &cli.out_dir,
        &device,
        cli.resume,
    )
}
