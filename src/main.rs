//! Brain-tumour MRI fine-tuning CLI
//!
//! Running the binary without a subcommand fine-tunes with the built-in
//! defaults; `train --config` reads a TOML run configuration instead.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use mri_finetune::backend::{backend_name, default_device, TrainingBackend};
use mri_finetune::pipeline;
use mri_finetune::tracking::FileTracker;
use mri_finetune::utils::logging::{init_logging, LogConfig};
use mri_finetune::RunConfig;

/// Fine-tune a pretrained ResNet-18 on brain-tumour MRI scans
#[derive(Parser, Debug)]
#[command(name = "mri_finetune")]
#[command(version)]
#[command(about = "Fine-tune ResNet-18 on brain-tumour MRI with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute (defaults to `train`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fine-tune and log the run
    Train {
        /// TOML run configuration; built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local dataset root holding Training/ and Testing/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Print class statistics of both partitions
    Stats {
        /// TOML run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local dataset root holding Training/ and Testing/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Write the default configuration as TOML
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "mri_finetune.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command.unwrap_or(Commands::Train {
        config: None,
        data_dir: None,
        epochs: None,
    }) {
        Commands::Train {
            config,
            data_dir,
            epochs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if data_dir.is_some() {
                config.dataset.root = data_dir;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            cmd_train(&config)?;
        }

        Commands::Stats { config, data_dir } => {
            let mut config = load_config(config.as_deref())?;
            if data_dir.is_some() {
                config.dataset.root = data_dir;
            }
            cmd_stats(&config)?;
        }

        Commands::InitConfig { output } => {
            RunConfig::default()
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("{} {}", "Wrote default configuration to".green(), output.display());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RunConfig::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))
        }
        None => Ok(RunConfig::default()),
    }
}

fn cmd_train(config: &RunConfig) -> Result<()> {
    info!("Backend: {}", backend_name());

    println!("{}", "Configuration:".cyan().bold());
    println!("  Dataset: {}", config.dataset.handle);
    println!("  Epochs: {}", config.training.epochs);
    println!("  Batch size: {}", config.dataset.batch_size);
    println!(
        "  Optimizer: {} (lr {})",
        config.training.optimizer, config.training.learning_rate
    );
    println!("  Tracking: {}", config.tracking.tracking_dir.display());
    println!();

    let device = default_device();
    let mut tracker = FileTracker::new(
        &config.tracking.tracking_dir,
        &config.tracking.experiment_name,
    );

    let outcome = pipeline::run::<TrainingBackend, _>(config, &device, &mut tracker)
        .context("Fine-tuning run failed")?;

    println!();
    println!("{}", "Run finished".green().bold());
    println!("  Run: {}", outcome.run_id);
    println!("  Weights: {}", outcome.weights_path.display());

    Ok(())
}

fn cmd_stats(config: &RunConfig) -> Result<()> {
    let folder = pipeline::open_dataset(config).context("Failed to open dataset")?;

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Classes: {}", folder.classes.names().join(", "));
    pipeline::print_stats(&folder);

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   Brain-tumour MRI classification
   ResNet-18 fine-tuning with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}
