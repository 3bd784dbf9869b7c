//! Optimisation loop
//!
//! Each epoch runs a Training pass (gradients on, learning-rate schedule
//! advanced afterwards) followed by a Testing pass on the inference copy of
//! the model. Epoch metrics go to the experiment tracker as soon as each pass
//! finishes, and the weights of the best Testing epoch are restored before
//! returning.

use std::path::Path;
use std::time::Instant;

use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::best::BestState;
use super::metrics::{PhaseMetrics, RunningMetrics};
use super::optimizer::{adam_config, sgd_config};
use super::scheduler::{LRScheduler, ScheduleState};
use crate::config::{OptimizerType, TrainingConfig};
use crate::dataset::{ClassificationBatch, ClassificationLoader, Partition, PartitionLoaders};
use crate::model::ImageClassifier;
use crate::tracking::{
    ExperimentTracker, TESTING_ACCURACY, TESTING_LOSS, TRAINING_ACCURACY, TRAINING_LOSS,
};
use crate::utils::error::{Error, Result};
use crate::utils::TrainingLogger;

/// Settings of one optimisation loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub epochs: usize,
    pub scheduler: LRScheduler,
    /// Draw per-pass progress bars
    pub show_progress: bool,
}

impl LoopConfig {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            scheduler: LRScheduler::from_config(config.learning_rate, &config.lr_schedule),
            show_progress: config.show_progress,
        }
    }
}

/// Metrics of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Rate used for this epoch's Training pass
    pub learning_rate: f64,
    pub training: PhaseMetrics,
    pub testing: PhaseMetrics,
    /// Best Testing accuracy after this epoch
    pub best_accuracy: f64,
    pub improved: bool,
}

/// Outcome of a finished loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub history: Vec<EpochRecord>,
    /// Epoch whose weights were restored; `None` keeps the initial weights
    pub best_epoch: Option<usize>,
    pub best_accuracy: f64,
    pub elapsed_secs: f64,
}

impl TrainingReport {
    /// Write the per-epoch history as JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Fine-tune `model` with the optimizer named in `config`
pub fn fine_tune<B, M, T>(
    model: M,
    loaders: &PartitionLoaders<B>,
    config: &TrainingConfig,
    tracker: &mut T,
) -> Result<(M, TrainingReport)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    T: ExperimentTracker + ?Sized,
{
    let loop_config = LoopConfig::from_config(config);
    info!(
        "Optimizer: {} | Schedule: {}",
        config.optimizer,
        loop_config.scheduler.description()
    );

    match config.optimizer {
        OptimizerType::Sgd => {
            let optimizer = SgdConfig::init::<B, M>(&sgd_config(config));
            train_model(model, optimizer, loaders, &loop_config, tracker)
        }
        OptimizerType::Adam => {
            let optimizer = AdamConfig::init::<B, M>(&adam_config(config));
            train_model(model, optimizer, loaders, &loop_config, tracker)
        }
    }
}

/// Run the epoch loop and return the model holding the best Testing weights
///
/// The best snapshot starts as the initial weights at accuracy 0.0, so a run
/// whose Testing accuracy never rises above zero returns the initial weights,
/// even though the optimizer updated them along the way.
pub fn train_model<B, M, O, T>(
    mut model: M,
    mut optimizer: O,
    loaders: &PartitionLoaders<B>,
    config: &LoopConfig,
    tracker: &mut T,
) -> Result<(M, TrainingReport)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
    T: ExperimentTracker + ?Sized,
{
    let start = Instant::now();
    let training_size = loaders.dataset_size(Partition::Training);
    let testing_size = loaders.dataset_size(Partition::Testing);

    let mut schedule = ScheduleState::new(config.scheduler.clone());
    let mut best = BestState::new(model.clone().into_record());
    let mut logger = TrainingLogger::new(config.epochs);
    let mut history = Vec::with_capacity(config.epochs);

    info!(
        "Fine-tuning for {} epochs ({} Training / {} Testing images)",
        config.epochs, training_size, testing_size
    );

    for epoch in 0..config.epochs {
        let learning_rate = schedule.current_lr();
        logger.start_epoch(epoch, learning_rate);

        let progress = phase_progress(Partition::Training, training_size, config.show_progress);
        let (trained, training) = train_pass(
            model,
            &mut optimizer,
            &loaders.training,
            learning_rate,
            training_size,
            &progress,
        )?;
        model = trained;
        progress.finish_and_clear();
        schedule.step();

        logger.log_phase(Partition::Training.name(), training.loss, training.accuracy);
        tracker.log_metric(TRAINING_LOSS, training.loss, epoch)?;
        tracker.log_metric(TRAINING_ACCURACY, training.accuracy, epoch)?;

        let progress = phase_progress(Partition::Testing, testing_size, config.show_progress);
        let testing = evaluate_pass(&model.valid(), &loaders.testing, testing_size, &progress)?;
        progress.finish_and_clear();

        logger.log_phase(Partition::Testing.name(), testing.loss, testing.accuracy);
        tracker.log_metric(TESTING_LOSS, testing.loss, epoch)?;
        tracker.log_metric(TESTING_ACCURACY, testing.accuracy, epoch)?;

        let improved = best.offer(epoch, testing.accuracy, || model.clone().into_record());
        if improved {
            logger.log_new_best(testing.accuracy);
        }
        logger.end_epoch();

        history.push(EpochRecord {
            epoch,
            learning_rate,
            training,
            testing,
            best_accuracy: best.accuracy(),
            improved,
        });
    }

    logger.log_complete(best.accuracy());

    let best_epoch = best.epoch();
    let best_accuracy = best.accuracy();
    let model = model.load_record(best.into_state());

    match best_epoch {
        Some(epoch) => debug!("Restored weights from epoch {}", epoch),
        None => debug!("No epoch beat the initial weights; keeping them"),
    }

    Ok((
        model,
        TrainingReport {
            history,
            best_epoch,
            best_accuracy,
            elapsed_secs: start.elapsed().as_secs_f64(),
        },
    ))
}

/// Loss and accuracy of `model` over one pass of `loader`, without gradients
pub fn evaluate<B, M>(model: &M, loader: &ClassificationLoader<B>) -> Result<PhaseMetrics>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    evaluate_pass(model, loader, loader.num_items(), &ProgressBar::hidden())
}

fn train_pass<B, M, O>(
    mut model: M,
    optimizer: &mut O,
    loader: &ClassificationLoader<B>,
    learning_rate: f64,
    dataset_size: usize,
    progress: &ProgressBar,
) -> Result<(M, PhaseMetrics)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    O: Optimizer<M, B>,
{
    let mut metrics = RunningMetrics::new();

    for batch in loader.iter() {
        let batch_size = batch.len();
        let logits = model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        let correct = count_correct(logits, batch.targets);
        metrics.update(loss_value, correct, batch_size);

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optimizer.step(learning_rate, model, grads);

        progress.inc(batch_size as u64);
        progress.set_message(format!("loss {:.4}", metrics.mean_loss()));
    }

    check_coverage(Partition::Training, metrics.samples(), dataset_size)?;
    Ok((model, metrics.finish(Partition::Training, dataset_size)))
}

fn evaluate_pass<B, M>(
    model: &M,
    loader: &ClassificationLoader<B>,
    dataset_size: usize,
    progress: &ProgressBar,
) -> Result<PhaseMetrics>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let mut metrics = RunningMetrics::new();

    for batch in loader.iter() {
        let ClassificationBatch { images, targets } = batch;
        let batch_size = targets.dims()[0];
        let logits = model.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());

        let loss_value: f64 = loss.into_scalar().elem();
        let correct = count_correct(logits, targets);
        metrics.update(loss_value, correct, batch_size);

        progress.inc(batch_size as u64);
    }

    check_coverage(Partition::Testing, metrics.samples(), dataset_size)?;
    Ok(metrics.finish(Partition::Testing, dataset_size))
}

fn count_correct<B: Backend>(
    logits: burn::tensor::Tensor<B, 2>,
    targets: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// A pass must see every sample exactly once; anything else means images
/// were dropped while loading
fn check_coverage(partition: Partition, seen: usize, expected: usize) -> Result<()> {
    if seen != expected {
        return Err(Error::Training(format!(
            "{} pass yielded {} of {} images; check the log for unreadable files",
            partition, seen, expected
        )));
    }
    Ok(())
}

fn phase_progress(partition: Partition, len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} {prefix:>8} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_prefix(partition.name());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::data::dataset::InMemDataset;
    use burn::module::Param;
    use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
    use burn::nn::{Linear, LinearConfig};
    use burn::optim::SgdConfig;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    use crate::dataset::{build_loader, ImageItem, ImageTransform, LoaderOptions};
    use crate::tracking::{InMemoryTracker, RunStatus};

    type TestBackend = Autodiff<NdArray>;

    #[derive(Module, Debug)]
    struct TinyNet<B: Backend> {
        pool: AdaptiveAvgPool2d,
        fc: Linear<B>,
    }

    impl<B: Backend> TinyNet<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
                fc: LinearConfig::new(3, 2).init(device),
            }
        }
    }

    impl<B: Backend> ImageClassifier<B> for TinyNet<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let x = self.pool.forward(images).flatten::<2>(1, 3);
            self.fc.forward(x)
        }

        fn num_classes(&self) -> usize {
            self.fc.weight.dims()[1]
        }
    }

    /// Dark images are class 0, bright images class 1
    fn items(n: usize) -> Vec<ImageItem> {
        (0..n)
            .map(|i| {
                let label = i % 2;
                let value = if label == 0 { 10 } else { 245 };
                ImageItem::new(RgbImage::from_pixel(12, 12, Rgb([value, value, value])), label)
            })
            .collect()
    }

    fn loaders(train: usize, test: usize) -> PartitionLoaders<TestBackend> {
        loaders_over(items(train), items(test))
    }

    fn loaders_over(
        train: Vec<ImageItem>,
        test: Vec<ImageItem>,
    ) -> PartitionLoaders<TestBackend> {
        let device = Default::default();
        let options = |shuffle_seed| LoaderOptions {
            batch_size: 4,
            num_workers: 0,
            shuffle_seed,
            transform_seed: 7,
        };
        PartitionLoaders::new(
            build_loader::<TestBackend, _>(
                InMemDataset::new(train),
                ImageTransform::training(8),
                &options(Some(42)),
                &device,
            ),
            build_loader::<NdArray, _>(
                InMemDataset::new(test),
                ImageTransform::testing(10, 8),
                &options(None),
                &device,
            ),
        )
    }

    fn loop_config(epochs: usize, scheduler: LRScheduler) -> LoopConfig {
        LoopConfig {
            epochs,
            scheduler,
            show_progress: false,
        }
    }

    fn train(
        epochs: usize,
        scheduler: LRScheduler,
        tracker: &mut InMemoryTracker,
    ) -> Result<(TinyNet<TestBackend>, TrainingReport)> {
        let model = TinyNet::<TestBackend>::new(&Default::default());
        let optimizer = SgdConfig::new().init::<TestBackend, TinyNet<TestBackend>>();
        train_model(
            model,
            optimizer,
            &loaders(8, 6),
            &loop_config(epochs, scheduler),
            tracker,
        )
    }

    fn started_tracker(tracker: InMemoryTracker) -> InMemoryTracker {
        let mut tracker = tracker;
        tracker.start_run(Some("test")).unwrap();
        tracker
    }

    #[test]
    fn test_metrics_logged_per_epoch_in_phase_order() {
        let mut tracker = started_tracker(InMemoryTracker::new());
        let (_, report) = train(10, LRScheduler::constant(0.5), &mut tracker).unwrap();

        let metrics = tracker.metrics();
        assert_eq!(metrics.len(), 40);
        for (epoch, chunk) in metrics.chunks(4).enumerate() {
            let keys: Vec<&str> = chunk.iter().map(|(k, _, _)| *k).collect();
            assert_eq!(
                keys,
                vec![TRAINING_LOSS, TRAINING_ACCURACY, TESTING_LOSS, TESTING_ACCURACY]
            );
            assert!(chunk.iter().all(|(_, _, step)| *step == epoch));
        }

        assert_eq!(report.history.len(), 10);
        for record in &report.history {
            assert_eq!(record.training.batches, 2);
            assert_eq!(record.training.samples, 8);
            assert_eq!(record.testing.samples, 6);
            assert!((0.0..=1.0).contains(&record.testing.accuracy));
        }
    }

    #[test]
    fn test_best_accuracy_is_monotone_and_restored() {
        let mut tracker = started_tracker(InMemoryTracker::new());
        let (model, report) = train(10, LRScheduler::constant(0.5), &mut tracker).unwrap();

        let bests: Vec<f64> = report.history.iter().map(|r| r.best_accuracy).collect();
        assert!(bests.windows(2).all(|w| w[1] >= w[0]));

        let max_testing = report
            .history
            .iter()
            .map(|r| r.testing.accuracy)
            .fold(0.0, f64::max);
        assert!((report.best_accuracy - max_testing).abs() < 1e-12);
        assert!(report.best_epoch.is_some());

        let loaders = loaders(8, 6);
        let restored = evaluate(&model.valid(), &loaders.testing).unwrap();
        assert!((restored.accuracy - report.best_accuracy).abs() < 1e-12);
    }

    #[test]
    fn test_zero_epochs_returns_initial_weights() {
        let device = Default::default();
        let model = TinyNet::<TestBackend>::new(&device);
        let before = model.fc.weight.val().into_data().to_vec::<f32>().unwrap();

        let mut tracker = started_tracker(InMemoryTracker::new());
        let optimizer = SgdConfig::new().init::<TestBackend, TinyNet<TestBackend>>();
        let (model, report) = train_model(
            model,
            optimizer,
            &loaders(8, 6),
            &loop_config(0, LRScheduler::constant(0.1)),
            &mut tracker,
        )
        .unwrap();

        let after = model.fc.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(before, after);
        assert!(report.history.is_empty());
        assert_eq!(report.best_epoch, None);
        assert_eq!(report.best_accuracy, 0.0);
        assert!(tracker.metrics().is_empty());
    }

    #[test]
    fn test_never_correct_restores_initial_weights_after_training() {
        let device = Default::default();
        let mut model = TinyNet::<TestBackend>::new(&device);
        // Bias far toward class 0 while every image is labelled 1
        model.fc.bias = Some(Param::from_tensor(Tensor::from_floats(
            [20.0f32, -20.0],
            &device,
        )));
        let weight_before = model.fc.weight.val().into_data().to_vec::<f32>().unwrap();
        let bias_before = model.fc.bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();

        let bright = |n: usize| -> Vec<ImageItem> {
            (0..n)
                .map(|_| ImageItem::new(RgbImage::from_pixel(12, 12, Rgb([245, 245, 245])), 1))
                .collect()
        };

        let mut tracker = started_tracker(InMemoryTracker::new());
        let optimizer = SgdConfig::new().init::<TestBackend, TinyNet<TestBackend>>();
        let (model, report) = train_model(
            model,
            optimizer,
            &loaders_over(bright(8), bright(4)),
            &loop_config(3, LRScheduler::constant(0.05)),
            &mut tracker,
        )
        .unwrap();

        assert_eq!(report.history.len(), 3);
        assert!(report.history.iter().all(|r| r.testing.accuracy == 0.0));
        assert_eq!(report.best_epoch, None);
        assert_eq!(report.best_accuracy, 0.0);

        // The optimizer did move the weights between epochs
        let first = report.history[0].training.loss;
        let last = report.history[2].training.loss;
        assert!(last < first, "training loss {} did not drop below {}", last, first);

        let weight_after = model.fc.weight.val().into_data().to_vec::<f32>().unwrap();
        let bias_after = model.fc.bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(weight_before, weight_after);
        assert_eq!(bias_before, bias_after);
    }

    #[test]
    fn test_learning_rate_follows_step_schedule() {
        let mut tracker = started_tracker(InMemoryTracker::new());
        let (_, report) = train(5, LRScheduler::step_decay(0.1, 0.1, 2), &mut tracker).unwrap();

        let rates: Vec<f64> = report.history.iter().map(|r| r.learning_rate).collect();
        let expected = [0.1, 0.1, 0.01, 0.01, 0.001];
        for (rate, want) in rates.iter().zip(expected) {
            assert!((rate - want).abs() < 1e-12, "{} != {}", rate, want);
        }
    }

    #[test]
    fn test_tracker_failure_aborts_loop() {
        let mut tracker = started_tracker(InMemoryTracker::failing_after(5));
        let result = train(10, LRScheduler::constant(0.1), &mut tracker);

        assert!(matches!(result, Err(Error::Tracking(_))));
        assert_eq!(tracker.metrics().len(), 5);

        tracker.end_run(RunStatus::Failed).unwrap();
        assert_eq!(tracker.final_status(), Some(RunStatus::Failed));
    }

    #[test]
    fn test_missing_samples_are_reported() {
        assert!(check_coverage(Partition::Training, 8, 8).is_ok());
        let err = check_coverage(Partition::Testing, 5, 6).unwrap_err();
        assert!(err.to_string().contains("5 of 6"));
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut tracker = started_tracker(InMemoryTracker::new());
        let (_, report) = train(2, LRScheduler::constant(0.1), &mut tracker).unwrap();

        report.save_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: TrainingReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.history.len(), 2);
    }
}
