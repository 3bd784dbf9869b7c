//! Image-folder dataset discovery
//!
//! Expects one directory per partition, each holding one directory per class:
//!
//! ```text
//! root/
//! ├── Training/
//! │   ├── glioma_tumor/
//! │   ├── meningioma_tumor/
//! │   ├── no_tumor/
//! │   └── pituitary_tumor/
//! └── Testing/
//!     └── (same classes)
//! ```
//!
//! Label indices follow the sorted Training class names and are shared by
//! both partitions.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{Error, Result};

/// Extensions accepted as images (lower-case)
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

/// The two dataset partitions of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Training,
    Testing,
}

impl Partition {
    /// Both partitions, in the order an epoch visits them
    pub const ALL: [Partition; 2] = [Partition::Training, Partition::Testing];

    pub fn name(&self) -> &'static str {
        match self {
            Partition::Training => "Training",
            Partition::Testing => "Testing",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sorted class names; position is the label index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSet {
    names: Vec<String>,
}

impl ClassSet {
    pub fn new(mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn name(&self, label: usize) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single image on disk with its label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// All samples of one partition, in sorted path order
#[derive(Debug, Clone)]
pub struct PartitionSamples {
    pub partition: Partition,
    pub dir: PathBuf,
    pub samples: Vec<ImageSample>,
}

impl PartitionSamples {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Per-class sample counts
    pub fn stats(&self, classes: &ClassSet) -> PartitionStats {
        let mut class_counts = vec![0usize; classes.len()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }
        PartitionStats {
            partition: self.partition,
            total_samples: self.samples.len(),
            class_names: classes.names().to_vec(),
            class_counts,
        }
    }
}

/// Training and Testing partitions sharing one class set
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root: PathBuf,
    pub classes: ClassSet,
    pub training: PartitionSamples,
    pub testing: PartitionSamples,
}

impl ImageFolder {
    /// Scan `root/<train_dir>` and `root/<test_dir>`
    ///
    /// Fails if either partition is missing or empty, if the Testing classes
    /// differ from the Training classes, or if any file is not a readable
    /// image.
    pub fn open(root: impl AsRef<Path>, train_dir: &str, test_dir: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Loading image folders from {}", root.display());

        let train_path = root.join(train_dir);
        let test_path = root.join(test_dir);

        let train_classes = class_dirs(&train_path)?;
        if train_classes.is_empty() {
            return Err(Error::Dataset(format!(
                "no class directories in {}",
                train_path.display()
            )));
        }
        let classes = ClassSet::new(train_classes);

        let test_classes = ClassSet::new(class_dirs(&test_path)?);
        if test_classes != classes {
            let train: BTreeSet<_> = classes.names().iter().collect();
            let test: BTreeSet<_> = test_classes.names().iter().collect();
            let missing: Vec<_> = train.difference(&test).collect();
            let extra: Vec<_> = test.difference(&train).collect();
            return Err(Error::Dataset(format!(
                "{} classes differ from {} classes (missing: {:?}, unexpected: {:?})",
                test_dir, train_dir, missing, extra
            )));
        }
        info!("Found {} classes: {}", classes.len(), classes.names().join(", "));

        let training = scan_partition(Partition::Training, &train_path, &classes)?;
        let testing = scan_partition(Partition::Testing, &test_path, &classes)?;

        info!(
            "{}: {} images, {}: {} images",
            train_dir,
            training.len(),
            test_dir,
            testing.len()
        );

        Ok(Self {
            root,
            classes,
            training,
            testing,
        })
    }

    pub fn partition(&self, partition: Partition) -> &PartitionSamples {
        match partition {
            Partition::Training => &self.training,
            Partition::Testing => &self.testing,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

fn class_dirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(Error::PathNotFound(dir.to_path_buf()));
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn scan_partition(partition: Partition, dir: &Path, classes: &ClassSet) -> Result<PartitionSamples> {
    let mut samples = Vec::new();

    for (label, class_name) in classes.names().iter().enumerate() {
        let class_dir = dir.join(class_name);
        let before = samples.len();
        for entry in WalkDir::new(&class_dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Dataset(e.to_string()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                samples.push(ImageSample {
                    path: entry.path().to_path_buf(),
                    label,
                });
            }
        }
        debug!(
            "{} / {} (label {}): {} images",
            partition,
            class_name,
            label,
            samples.len() - before
        );
    }

    if samples.is_empty() {
        return Err(Error::Dataset(format!("no images found in {}", dir.display())));
    }

    // Header probe only; full decode happens in the loader workers.
    samples.par_iter().try_for_each(|sample| {
        image::image_dimensions(&sample.path)
            .map(|_| ())
            .map_err(|e| Error::ImageLoad(sample.path.clone(), e.to_string()))
    })?;

    Ok(PartitionSamples {
        partition,
        dir: dir.to_path_buf(),
        samples,
    })
}

/// Class distribution of one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: Partition,
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl PartitionStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 {} partition:", self.partition);
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.class_names.len());
        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let share = if self.total_samples > 0 {
                *count as f32 / self.total_samples as f32
            } else {
                0.0
            };
            let bar: String = "█".repeat((share * 40.0) as usize);
            println!("    {:2}. {:24} {:5} {}", idx, name, count, bar);
        }
    }
}
