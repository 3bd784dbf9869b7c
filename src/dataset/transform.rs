//! Per-partition image transforms
//!
//! Training images get a random scale/aspect crop and a random horizontal
//! flip; Testing images get a deterministic shorter-side resize and centre
//! crop. Both end with conversion to a CHW `f32` buffer normalised with the
//! ImageNet channel statistics the pretrained backbone was trained with.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::folder::Partition;
use crate::config::DatasetConfig;

/// ImageNet mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Attempts at sampling a valid random crop before falling back to a centre crop
const CROP_ATTEMPTS: usize = 10;

/// One geometric step of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    /// Crop a random area fraction and aspect ratio, then resize to `size`
    RandomResizedCrop {
        size: u32,
        scale: (f64, f64),
        ratio: (f64, f64),
    },
    /// Mirror left-right with probability `p`
    RandomHorizontalFlip { p: f64 },
    /// Resize so the shorter side equals `shorter_side`, keeping aspect ratio
    Resize { shorter_side: u32 },
    /// Crop the centre `size`×`size` window, zero-padding smaller images
    CenterCrop { size: u32 },
}

impl TransformStep {
    fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        match *self {
            TransformStep::RandomResizedCrop { size, scale, ratio } => {
                let (x, y, w, h) =
                    random_resized_crop_region(image.width(), image.height(), scale, ratio, rng);
                let region = imageops::crop_imm(&image, x, y, w, h).to_image();
                imageops::resize(&region, size, size, FilterType::Triangle)
            }
            TransformStep::RandomHorizontalFlip { p } => {
                if rng.gen::<f64>() < p {
                    imageops::flip_horizontal(&image)
                } else {
                    image
                }
            }
            TransformStep::Resize { shorter_side } => resize_shorter_side(&image, shorter_side),
            TransformStep::CenterCrop { size } => center_crop(&image, size),
        }
    }

    fn is_random(&self) -> bool {
        matches!(
            self,
            TransformStep::RandomResizedCrop { .. } | TransformStep::RandomHorizontalFlip { .. }
        )
    }
}

/// A geometric pipeline followed by tensor conversion and normalisation
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
    steps: Vec<TransformStep>,
    output_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageTransform {
    pub fn new(steps: Vec<TransformStep>, output_size: u32) -> Self {
        Self {
            steps,
            output_size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// RandomResizedCrop(size) → RandomHorizontalFlip → normalise
    pub fn training(image_size: u32) -> Self {
        Self::new(
            vec![
                TransformStep::RandomResizedCrop {
                    size: image_size,
                    scale: (0.08, 1.0),
                    ratio: (3.0 / 4.0, 4.0 / 3.0),
                },
                TransformStep::RandomHorizontalFlip { p: 0.5 },
            ],
            image_size,
        )
    }

    /// Resize(resize_size) → CenterCrop(image_size) → normalise
    pub fn testing(resize_size: u32, image_size: u32) -> Self {
        Self::new(
            vec![
                TransformStep::Resize {
                    shorter_side: resize_size,
                },
                TransformStep::CenterCrop { size: image_size },
            ],
            image_size,
        )
    }

    pub fn for_partition(partition: Partition, config: &DatasetConfig) -> Self {
        match partition {
            Partition::Training => Self::training(config.image_size),
            Partition::Testing => Self::testing(config.resize_size, config.image_size),
        }
    }

    /// Override the normalisation statistics
    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    /// Side length of the square output
    pub fn output_size(&self) -> u32 {
        self.output_size
    }

    pub fn is_random(&self) -> bool {
        self.steps.iter().any(TransformStep::is_random)
    }

    /// Run the geometric steps; the result is always `output_size` square
    pub fn apply_geometry(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut image = image;
        for step in &self.steps {
            image = step.apply(image, rng);
        }
        if image.width() != self.output_size || image.height() != self.output_size {
            image = imageops::resize(&image, self.output_size, self.output_size, FilterType::Triangle);
        }
        image
    }

    /// Full pipeline: geometry, then CHW `f32` with per-channel normalisation
    pub fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let image = self.apply_geometry(image, rng);
        to_normalized_chw(&image, &self.mean, &self.std)
    }
}

/// Convert to CHW layout, scale to [0, 1], then `(x - mean) / std`
pub fn to_normalized_chw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Vec<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    data
}

/// Sample a crop region `(x, y, w, h)` covering a random fraction of the area
/// with a log-uniform aspect ratio; centre crop when sampling keeps failing.
pub fn random_resized_crop_region(
    width: u32,
    height: u32,
    scale: (f64, f64),
    ratio: (f64, f64),
    rng: &mut ChaCha8Rng,
) -> (u32, u32, u32, u32) {
    let area = width as f64 * height as f64;
    let (log_lo, log_hi) = (ratio.0.ln(), ratio.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(scale.0..=scale.1);
        let aspect = rng.gen_range(log_lo..=log_hi).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    let in_ratio = width as f64 / height as f64;
    let (w, h) = if in_ratio < ratio.0 {
        (width, ((width as f64 / ratio.0).round() as u32).clamp(1, height))
    } else if in_ratio > ratio.1 {
        (((height as f64 * ratio.1).round() as u32).clamp(1, width), height)
    } else {
        (width, height)
    };
    ((width - w) / 2, (height - h) / 2, w, h)
}

/// Resize so the shorter side equals `size`, the longer side scaled and truncated
pub fn resize_shorter_side(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = if w <= h {
        (size, ((size as u64 * h as u64) / w as u64).max(1) as u32)
    } else {
        (((size as u64 * w as u64) / h as u64).max(1) as u32, size)
    };
    if (new_w, new_h) == (w, h) {
        return image.clone();
    }
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

/// Centre crop to `size`×`size`, padding with black when the image is smaller
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();

    let padded;
    let source = if w < size || h < size {
        let (pw, ph) = (w.max(size), h.max(size));
        let mut canvas = RgbImage::from_pixel(pw, ph, Rgb([0, 0, 0]));
        imageops::overlay(
            &mut canvas,
            image,
            ((pw - w) / 2) as i64,
            ((ph - h) / 2) as i64,
        );
        padded = canvas;
        &padded
    } else {
        image
    };

    let (w, h) = source.dimensions();
    let left = ((w - size) as f64 / 2.0).round_ties_even() as u32;
    let top = ((h - size) as f64 / 2.0).round_ties_even() as u32;
    imageops::crop_imm(source, left, top, size, size).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_training_output_shape() {
        let transform = ImageTransform::training(16);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for (w, h) in [(64, 48), (20, 90), (3, 3)] {
            let data = transform.apply(gradient(w, h), &mut rng);
            assert_eq!(data.len(), 3 * 16 * 16);
        }
        assert!(transform.is_random());
    }

    #[test]
    fn test_testing_is_deterministic() {
        let transform = ImageTransform::testing(20, 16);
        assert!(!transform.is_random());

        let mut a = ChaCha8Rng::seed_from_u64(1);
        let mut b = ChaCha8Rng::seed_from_u64(2);
        let image = gradient(40, 30);
        assert_eq!(
            transform.apply(image.clone(), &mut a),
            transform.apply(image, &mut b)
        );
    }

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let resized = resize_shorter_side(&gradient(300, 200), 256);
        assert_eq!(resized.dimensions(), (384, 256));

        let resized = resize_shorter_side(&gradient(200, 301), 256);
        assert_eq!(resized.dimensions(), (256, 385));
    }

    #[test]
    fn test_center_crop_takes_middle() {
        let image = gradient(10, 8);
        let cropped = center_crop(&image, 4);
        assert_eq!(cropped.dimensions(), (4, 4));
        // left = 3, top = 2
        assert_eq!(cropped.get_pixel(0, 0), image.get_pixel(3, 2));
    }

    #[test]
    fn test_center_crop_pads_small_images() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let cropped = center_crop(&image, 4);
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(cropped.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_crop_region_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..500 {
            let (x, y, w, h) =
                random_resized_crop_region(50, 30, (0.08, 1.0), (3.0 / 4.0, 4.0 / 3.0), &mut rng);
            assert!(w > 0 && h > 0);
            assert!(x + w <= 50);
            assert!(y + h <= 30);
        }
    }

    #[test]
    fn test_crop_fallback_on_extreme_aspect() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        // A 1-pixel-high strip never fits a 3/4..4/3 crop
        let (x, y, w, h) =
            random_resized_crop_region(100, 1, (0.9, 1.0), (3.0 / 4.0, 4.0 / 3.0), &mut rng);
        assert_eq!((w, h), (1, 1));
        assert_eq!(y, 0);
        assert_eq!(x, 49);
    }

    #[test]
    fn test_flip_always() {
        let transform = ImageTransform::new(vec![TransformStep::RandomHorizontalFlip { p: 1.0 }], 3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let image = gradient(3, 3);
        let flipped = transform.apply_geometry(image.clone(), &mut rng);
        assert_eq!(flipped.get_pixel(0, 1), image.get_pixel(2, 1));
    }

    #[test]
    fn test_normalization_values() {
        let white = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let data = to_normalized_chw(&white, &IMAGENET_MEAN, &IMAGENET_STD);
        assert_eq!(data.len(), 12);
        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((data[c * 4] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_for_partition_uses_config_sizes() {
        let config = DatasetConfig {
            image_size: 32,
            resize_size: 40,
            ..DatasetConfig::default()
        };
        assert_eq!(
            ImageTransform::for_partition(Partition::Testing, &config),
            ImageTransform::testing(40, 32)
        );
        assert_eq!(
            ImageTransform::for_partition(Partition::Training, &config).output_size(),
            32
        );
    }
}
