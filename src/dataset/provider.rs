//! Dataset resolution
//!
//! Turns a remote dataset identifier into a local directory that holds the
//! partition folders. Downloading is left to the Kaggle tooling; this module
//! only finds what is already on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::error::{Error, Result, ResultExt};

/// Resolves a dataset to a local root directory
pub trait DatasetProvider {
    /// Local directory containing one sub-directory per partition
    fn resolve(&self) -> Result<PathBuf>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// A dataset that already lives in a known directory
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DatasetProvider for LocalDirectory {
    fn resolve(&self) -> Result<PathBuf> {
        if self.root.is_dir() {
            Ok(self.root.clone())
        } else {
            Err(Error::PathNotFound(self.root.clone()))
        }
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }
}

/// Dataset previously fetched with `kagglehub.dataset_download`
///
/// Layout: `<cache>/datasets/<owner>/<slug>/versions/<n>/`. The highest
/// version present wins.
#[derive(Debug, Clone)]
pub struct KaggleHubCache {
    handle: String,
    cache_dir: PathBuf,
}

impl KaggleHubCache {
    /// Use `$KAGGLEHUB_CACHE`, falling back to `~/.cache/kagglehub`
    pub fn new(handle: impl Into<String>) -> Self {
        let cache_dir = std::env::var_os("KAGGLEHUB_CACHE")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache/kagglehub"))
            })
            .unwrap_or_else(|| PathBuf::from(".cache/kagglehub"));
        Self::with_cache_dir(handle, cache_dir)
    }

    pub fn with_cache_dir(handle: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            handle: handle.into(),
            cache_dir: cache_dir.into(),
        }
    }

    fn owner_and_slug(&self) -> Result<(&str, &str)> {
        let handle = self.handle.trim_matches('/');
        match handle.split_once('/') {
            Some((owner, slug)) if !owner.is_empty() && !slug.is_empty() && !slug.contains('/') => {
                Ok((owner, slug))
            }
            _ => Err(Error::Dataset(format!(
                "dataset handle '{}' must look like <owner>/<dataset>",
                self.handle
            ))),
        }
    }

    fn missing(&self) -> Error {
        Error::Dataset(format!(
            "dataset '{}' not found under {}.\n\
             Download it first:\n  \
             pip install kagglehub && python -c \"import kagglehub; kagglehub.dataset_download('{}')\"\n\
             or download from https://www.kaggle.com/datasets/{} and pass its directory via dataset.root",
            self.handle,
            self.cache_dir.display(),
            self.handle,
            self.handle
        ))
    }
}

impl DatasetProvider for KaggleHubCache {
    fn resolve(&self) -> Result<PathBuf> {
        let (owner, slug) = self.owner_and_slug()?;
        let dataset_dir = self.cache_dir.join("datasets").join(owner).join(slug);
        let versions_dir = dataset_dir.join("versions");

        debug!("Looking for cached dataset in {}", versions_dir.display());

        let latest = latest_version(&versions_dir)?;
        match latest {
            Some((version, path)) => {
                info!("Using {} version {} at {}", self.handle, version, path.display());
                Ok(path)
            }
            None => Err(self.missing()),
        }
    }

    fn describe(&self) -> String {
        format!("kagglehub cache ({})", self.handle)
    }
}

fn latest_version(versions_dir: &Path) -> Result<Option<(u64, PathBuf)>> {
    if !versions_dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(u64, PathBuf)> = None;
    let entries = std::fs::read_dir(versions_dir)
        .dataset_context(|| format!("reading {}", versions_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(version) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
            continue;
        };
        if best.as_ref().map_or(true, |(v, _)| version > *v) {
            best = Some((version, entry.path()));
        }
    }
    Ok(best)
}

/// Pick the provider for a run: an explicit root wins over the cache
pub fn provider_for(handle: &str, root: Option<&Path>) -> Box<dyn DatasetProvider> {
    match root {
        Some(root) => Box::new(LocalDirectory::new(root)),
        None => Box::new(KaggleHubCache::new(handle)),
    }
}
