//! End-to-end fine-tuning run
//!
//! Resolves the dataset, builds loaders and the model, and runs the loop
//! inside one tracked run. The model summary is logged before training
//! starts; the best weights are written and logged once training finishes.

use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::record::CompactRecorder;
use burn::tensor::backend::{AutodiffBackend, Backend};
use colored::Colorize;
use tracing::info;

use crate::config::RunConfig;
use crate::dataset::{provider_for, ImageFolder, Partition, PartitionLoaders};
use crate::model::{build_model, ModelSummary};
use crate::tracking::{with_run, ExperimentTracker, ModelMetadata};
use crate::training::{fine_tune, TrainingReport};
use crate::utils::error::Result;

pub const SUMMARY_FILE: &str = "model_summary.txt";
/// Written by `CompactRecorder`, which appends `.mpk`
pub const BEST_MODEL_STEM: &str = "best_model";
pub const HISTORY_FILE: &str = "training_history.json";
/// Artifact path of the logged model
pub const MODEL_ARTIFACT: &str = "model";

/// What a finished run leaves behind
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub class_names: Vec<String>,
    pub report: TrainingReport,
    pub weights_path: PathBuf,
    pub summary_path: PathBuf,
}

/// Resolve and scan the dataset named in `config`
pub fn open_dataset(config: &RunConfig) -> Result<ImageFolder> {
    let provider = provider_for(&config.dataset.handle, config.dataset.root.as_deref());
    info!("Resolving dataset via {}", provider.describe());
    let root = provider.resolve()?;

    ImageFolder::open(
        &root,
        &config.dataset.train_partition,
        &config.dataset.test_partition,
    )
}

/// Print per-partition class statistics
pub fn print_stats(folder: &ImageFolder) {
    println!("{} {}", "Dataset root:".bold(), folder.root.display());
    for partition in Partition::ALL {
        folder.partition(partition).stats(&folder.classes).print();
    }
}

/// Fine-tune on the configured dataset and record everything in `tracker`
pub fn run<B, T>(config: &RunConfig, device: &B::Device, tracker: &mut T) -> Result<RunOutcome>
where
    B: AutodiffBackend,
    T: ExperimentTracker + ?Sized,
{
    config.validate()?;

    let folder = open_dataset(config)?;
    print_stats(&folder);

    let loaders = PartitionLoaders::<B>::from_folder(&folder, config, device);
    let num_classes = folder.num_classes();
    let model = build_model::<B>(&config.model, num_classes, device)?;

    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)?;

    let summary = ModelSummary::of::<B, _>(&model, &config.model.architecture, num_classes)
        .with_shapes(model.parameter_shapes());
    let summary_path = output_dir.join(SUMMARY_FILE);
    summary.write(&summary_path)?;
    info!(
        "Model: {} with {} parameters",
        summary.architecture, summary.num_params
    );

    let run_name = config.tracking.run_name.as_deref();
    with_run(tracker, run_name, |tracker, run| {
        info!("Tracking run {} ({})", run.run_name, run.run_id);
        tracker.log_params(&config.params())?;
        tracker.log_artifact(&summary_path)?;

        let (model, report) = fine_tune(model, &loaders, &config.training, tracker)?;

        let history_path = output_dir.join(HISTORY_FILE);
        report.save_json(&history_path)?;
        tracker.log_artifact(&history_path)?;

        let weights_path = save_best::<B::InnerBackend, _>(&model.valid(), &output_dir)?;
        let metadata = ModelMetadata {
            architecture: config.model.architecture.clone(),
            num_classes,
            class_names: folder.classes.names().to_vec(),
            image_size: config.dataset.image_size,
            format: "burn-compact-mpk".to_string(),
        };
        tracker.log_model(&weights_path, MODEL_ARTIFACT, &metadata)?;

        println!(
            "{} {:.4} (epoch {})",
            "Best Testing accuracy:".green().bold(),
            report.best_accuracy,
            report
                .best_epoch
                .map_or_else(|| "initial".to_string(), |e| e.to_string())
        );

        Ok(RunOutcome {
            run_id: run.run_id.clone(),
            class_names: metadata.class_names,
            report,
            weights_path,
            summary_path: summary_path.clone(),
        })
    })
}

/// Write `model` as `<output_dir>/best_model.mpk`
fn save_best<B, M>(model: &M, output_dir: &Path) -> Result<PathBuf>
where
    B: Backend,
    M: Module<B>,
{
    let stem = output_dir.join(BEST_MODEL_STEM);
    model.clone().save_file(&stem, &CompactRecorder::new())?;
    let path = stem.with_extension("mpk");
    info!("Saved best weights to {}", path.display());
    Ok(path)
}
