//! Burn Dataset and Batcher for image classification
//!
//! `PartitionDataset` decodes images lazily in the loader workers.
//! `ClassificationBatcher` applies the partition transform and stacks the
//! results into `[N, 3, H, W]` image and `[N]` label tensors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{ImageReader, RgbImage};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::error;

use super::folder::{ImageSample, PartitionSamples};
use super::transform::ImageTransform;
use crate::utils::error::{Error, Result};

/// A decoded image and its label
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub image: RgbImage,
    pub label: usize,
}

impl ImageItem {
    pub fn new(image: RgbImage, label: usize) -> Self {
        Self { image, label }
    }
}

/// Decode any supported format into 8-bit RGB
pub fn load_rgb(path: &PathBuf) -> Result<RgbImage> {
    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::ImageLoad(path.clone(), e.to_string()))?;
    Ok(image.to_rgb8())
}

/// One partition, decoded on demand
#[derive(Debug, Clone)]
pub struct PartitionDataset {
    samples: Vec<ImageSample>,
}

impl PartitionDataset {
    pub fn new(partition: &PartitionSamples) -> Self {
        Self {
            samples: partition.samples.clone(),
        }
    }
}

impl Dataset<ImageItem> for PartitionDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.samples.get(index)?;
        match load_rgb(&sample.path) {
            Ok(image) => Some(ImageItem::new(image, sample.label)),
            Err(err) => {
                // The loop compares the sample count of every pass with the
                // partition size, so a dropped item fails the run.
                error!("{}", err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of transformed images with their labels
#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// Shape `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies a partition transform to every item of a batch
///
/// Each batch draws its randomness from a ChaCha8 stream derived from the
/// run seed and a batch counter shared by all clones of the batcher.
#[derive(Clone, Debug)]
pub struct ClassificationBatcher {
    transform: ImageTransform,
    seed: u64,
    batches: Arc<AtomicU64>,
}

impl ClassificationBatcher {
    pub fn new(transform: ImageTransform, seed: u64) -> Self {
        Self {
            transform,
            seed,
            batches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    fn next_rng(&self) -> ChaCha8Rng {
        let index = self.batches.fetch_add(1, Ordering::Relaxed);
        ChaCha8Rng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl<B: Backend> Batcher<B, ImageItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let size = self.transform.output_size() as usize;

        let mut rng = self.next_rng();
        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            images_data.extend(self.transform.apply(item.image, &mut rng));
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ClassificationBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::Rgb;
    use tempfile::tempdir;

    use crate::dataset::folder::Partition;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = ClassificationBatcher::new(ImageTransform::training(8), 42);
        let items = vec![
            ImageItem::new(RgbImage::from_pixel(20, 12, Rgb([10, 20, 30])), 0),
            ImageItem::new(RgbImage::from_pixel(9, 30, Rgb([200, 20, 30])), 1),
            ImageItem::new(RgbImage::from_pixel(16, 16, Rgb([0, 0, 0])), 1),
        ];

        let batch: ClassificationBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.len(), 3);

        let labels: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(labels, vec![0, 1, 1]);
    }

    #[test]
    fn test_batcher_clones_share_counter() {
        let batcher = ClassificationBatcher::new(ImageTransform::training(4), 7);
        let clone = batcher.clone();
        let _ = batcher.next_rng();
        let _ = clone.next_rng();
        assert_eq!(batcher.batches.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_partition_dataset_decodes_lazily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbImage::from_pixel(5, 7, Rgb([1, 2, 3])).save(&path).unwrap();

        let partition = PartitionSamples {
            partition: Partition::Testing,
            dir: dir.path().to_path_buf(),
            samples: vec![ImageSample {
                path: path.clone(),
                label: 2,
            }],
        };
        let dataset = PartitionDataset::new(&partition);
        assert_eq!(dataset.len(), 1);

        let item = dataset.get(0).unwrap();
        assert_eq!(item.label, 2);
        assert_eq!(item.image.dimensions(), (5, 7));
        assert!(dataset.get(1).is_none());

        std::fs::remove_file(&path).unwrap();
        assert!(dataset.get(0).is_none());
    }
}
