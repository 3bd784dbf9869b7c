//! Batch loaders for the Training and Testing partitions
//!
//! Loaders are lazy and restartable: every call to `iter()` is a fresh pass
//! over the partition. The Training loader reshuffles on each pass.

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::debug;

use super::burn_dataset::{ClassificationBatch, ClassificationBatcher, ImageItem, PartitionDataset};
use super::folder::{ImageFolder, Partition};
use super::transform::ImageTransform;
use crate::config::RunConfig;

/// A loader yielding classification batches on backend `B`
pub type ClassificationLoader<B> = Arc<dyn DataLoader<B, ClassificationBatch<B>>>;

/// How one partition is batched
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    /// Worker threads; zero loads on the calling thread
    pub num_workers: usize,
    /// Reshuffle every pass with this seed. `None` leaves the order
    /// unshuffled: file order with zero workers; with more, each worker walks
    /// its own shard in order and their batches interleave.
    pub shuffle_seed: Option<u64>,
    /// Seed for transform randomness
    pub transform_seed: u64,
}

impl LoaderOptions {
    pub fn for_partition(partition: Partition, config: &RunConfig) -> Self {
        Self {
            batch_size: config.dataset.batch_size,
            num_workers: config.dataset.num_workers,
            shuffle_seed: match partition {
                Partition::Training => Some(config.seed),
                Partition::Testing => None,
            },
            transform_seed: match partition {
                Partition::Training => config.seed,
                Partition::Testing => config.seed.wrapping_add(1),
            },
        }
    }
}

/// Build a loader over any dataset of decoded images
pub fn build_loader<B, D>(
    dataset: D,
    transform: ImageTransform,
    options: &LoaderOptions,
    device: &B::Device,
) -> ClassificationLoader<B>
where
    B: Backend,
    D: Dataset<ImageItem> + 'static,
{
    let batcher = ClassificationBatcher::new(transform, options.transform_seed);

    let mut builder = DataLoaderBuilder::<B, ImageItem, ClassificationBatch<B>>::new(batcher)
        .batch_size(options.batch_size)
        .set_device(device.clone());
    if let Some(seed) = options.shuffle_seed {
        builder = builder.shuffle(seed);
    }
    if options.num_workers > 0 {
        builder = builder.num_workers(options.num_workers);
    }

    builder.build(dataset)
}

/// The two loaders an epoch consumes
///
/// Testing batches live on the inner (non-autodiff) backend, so the testing
/// pass never records gradients.
pub struct PartitionLoaders<B: AutodiffBackend> {
    pub training: ClassificationLoader<B>,
    pub testing: ClassificationLoader<B::InnerBackend>,
}

impl<B: AutodiffBackend> Clone for PartitionLoaders<B> {
    fn clone(&self) -> Self {
        Self {
            training: self.training.clone(),
            testing: self.testing.clone(),
        }
    }
}

impl<B: AutodiffBackend> PartitionLoaders<B> {
    pub fn new(
        training: ClassificationLoader<B>,
        testing: ClassificationLoader<B::InnerBackend>,
    ) -> Self {
        Self { training, testing }
    }

    /// Loaders over the scanned image folders
    pub fn from_folder(folder: &ImageFolder, config: &RunConfig, device: &B::Device) -> Self {
        let training = build_loader::<B, _>(
            PartitionDataset::new(&folder.training),
            ImageTransform::for_partition(Partition::Training, &config.dataset),
            &LoaderOptions::for_partition(Partition::Training, config),
            device,
        );
        let testing = build_loader::<B::InnerBackend, _>(
            PartitionDataset::new(&folder.testing),
            ImageTransform::for_partition(Partition::Testing, &config.dataset),
            &LoaderOptions::for_partition(Partition::Testing, config),
            device,
        );

        debug!(
            "Loaders ready: batch size {}, {} workers",
            config.dataset.batch_size, config.dataset.num_workers
        );

        Self { training, testing }
    }

    /// Number of samples one pass over `partition` must yield
    pub fn dataset_size(&self, partition: Partition) -> usize {
        match partition {
            Partition::Training => self.training.num_items(),
            Partition::Testing => self.testing.num_items(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::data::dataset::InMemDataset;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = Autodiff<NdArray>;

    fn items(n: usize) -> Vec<ImageItem> {
        (0..n)
            .map(|i| ImageItem::new(RgbImage::from_pixel(10, 10, Rgb([i as u8 * 20, 0, 0])), i % 2))
            .collect()
    }

    fn options(shuffle_seed: Option<u64>) -> LoaderOptions {
        LoaderOptions {
            batch_size: 4,
            num_workers: 0,
            shuffle_seed,
            transform_seed: 0,
        }
    }

    #[test]
    fn test_batches_cover_partition() {
        let device = Default::default();
        let loader = build_loader::<NdArray, _>(
            InMemDataset::new(items(10)),
            ImageTransform::testing(8, 6),
            &options(None),
            &device,
        );

        let sizes: Vec<usize> = loader.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(loader.num_items(), 10);
    }

    #[test]
    fn test_loader_is_restartable() {
        let device = Default::default();
        let loader = build_loader::<NdArray, _>(
            InMemDataset::new(items(8)),
            ImageTransform::testing(8, 6),
            &options(None),
            &device,
        );

        let first: usize = loader.iter().map(|b| b.len()).sum();
        let second: usize = loader.iter().map(|b| b.len()).sum();
        assert_eq!(first, 8);
        assert_eq!(second, 8);
    }

    #[test]
    fn test_unshuffled_order_is_stable() {
        let device = Default::default();
        let loader = build_loader::<NdArray, _>(
            InMemDataset::new(items(8)),
            ImageTransform::testing(8, 6),
            &options(None),
            &device,
        );

        let labels = |loader: &ClassificationLoader<NdArray>| -> Vec<i64> {
            loader
                .iter()
                .flat_map(|b| b.targets.into_data().to_vec::<i64>().unwrap())
                .collect()
        };
        assert_eq!(labels(&loader), vec![0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(labels(&loader), labels(&loader));
    }

    #[test]
    fn test_training_loader_reshuffles_each_pass() {
        let device = Default::default();
        let distinct: Vec<ImageItem> = (0..32)
            .map(|i| ImageItem::new(RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])), i))
            .collect();
        let loader = build_loader::<NdArray, _>(
            InMemDataset::new(distinct),
            ImageTransform::testing(8, 6),
            &options(Some(42)),
            &device,
        );

        let pass = || -> Vec<i64> {
            loader
                .iter()
                .flat_map(|b| b.targets.into_data().to_vec::<i64>().unwrap())
                .collect()
        };
        let first = pass();
        let second = pass();
        assert_ne!(first, second);

        let (mut first_sorted, mut second_sorted) = (first.clone(), second.clone());
        first_sorted.sort_unstable();
        second_sorted.sort_unstable();
        assert_eq!(first_sorted, (0..32).collect::<Vec<i64>>());
        assert_eq!(first_sorted, second_sorted);
    }

    #[test]
    fn test_training_options_shuffle_testing_does_not() {
        let config = RunConfig::default();
        let train = LoaderOptions::for_partition(Partition::Training, &config);
        let test = LoaderOptions::for_partition(Partition::Testing, &config);
        assert_eq!(train.shuffle_seed, Some(config.seed));
        assert_eq!(test.shuffle_seed, None);
        assert_eq!(train.batch_size, 4);
        assert_eq!(test.num_workers, 4);
    }

    #[test]
    fn test_partition_loaders_report_sizes() {
        let device = Default::default();
        let loaders = PartitionLoaders::<TestBackend>::new(
            build_loader::<TestBackend, _>(
                InMemDataset::new(items(8)),
                ImageTransform::training(6),
                &options(Some(3)),
                &device,
            ),
            build_loader::<NdArray, _>(
                InMemDataset::new(items(3)),
                ImageTransform::testing(8, 6),
                &options(None),
                &device,
            ),
        );
        assert_eq!(loaders.dataset_size(Partition::Training), 8);
        assert_eq!(loaders.dataset_size(Partition::Testing), 3);
    }
}
