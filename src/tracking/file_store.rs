//! MLflow-compatible local file store
//!
//! Writes the same layout as MLflow's `FileStore`, so `mlflow ui
//! --backend-store-uri <tracking_dir>` can browse the runs:
//!
//! ```text
//! mlruns/
//! └── <experiment_id>/
//!     ├── meta.yaml
//!     └── <run_id>/
//!         ├── meta.yaml
//!         ├── params/<key>
//!         ├── metrics/<key>        "<timestamp_ms> <value> <step>" per line
//!         ├── tags/<key>
//!         └── artifacts/
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{ExperimentTracker, ModelMetadata, RunInfo, RunStatus};
use crate::utils::error::{Error, Result, ResultExt};

const DEFAULT_EXPERIMENT_ID: &str = "0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentMeta {
    artifact_location: String,
    creation_time: i64,
    experiment_id: String,
    last_update_time: i64,
    lifecycle_stage: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMeta {
    artifact_uri: String,
    end_time: Option<i64>,
    entry_point_name: String,
    experiment_id: String,
    lifecycle_stage: String,
    run_id: String,
    run_name: String,
    run_uuid: String,
    source_name: String,
    source_type: u8,
    source_version: String,
    start_time: i64,
    status: u8,
    tags: Vec<String>,
    user_id: String,
}

#[derive(Debug, Serialize)]
struct MlModel<'a> {
    artifact_path: &'a str,
    flavors: Flavors<'a>,
    model_uuid: String,
    run_id: &'a str,
    utc_time_created: String,
}

#[derive(Debug, Serialize)]
struct Flavors<'a> {
    burn: &'a ModelMetadata,
}

struct ActiveRun {
    info: RunInfo,
    dir: PathBuf,
    meta: RunMeta,
}

/// Tracker writing to an MLflow file store
pub struct FileTracker {
    root: PathBuf,
    experiment_name: String,
    active: Option<ActiveRun>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Keys become file names; refuse anything that could escape the run directory
fn check_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
        return Err(Error::Tracking(format!("invalid key '{}'", key)));
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Tracking(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .tracking_context("copying artifact directory")?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl FileTracker {
    /// Open (or create) `experiment_name` under `root`
    pub fn new(root: impl Into<PathBuf>, experiment_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            experiment_name: experiment_name.into(),
            active: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_experiment(dir: &Path) -> Option<ExperimentMeta> {
        let text = fs::read_to_string(dir.join("meta.yaml")).ok()?;
        serde_yaml::from_str(&text).ok()
    }

    /// Find the experiment id for the configured name, creating it if needed
    fn ensure_experiment(&self) -> Result<String> {
        fs::create_dir_all(&self.root)?;

        let mut max_id: Option<u64> = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(meta) = Self::read_experiment(&entry.path()) {
                if meta.name == self.experiment_name && meta.lifecycle_stage == "active" {
                    return Ok(meta.experiment_id);
                }
                if let Ok(id) = meta.experiment_id.parse::<u64>() {
                    max_id = Some(max_id.map_or(id, |m| m.max(id)));
                }
            }
        }

        let experiment_id = if self.experiment_name == "Default"
            && !self.root.join(DEFAULT_EXPERIMENT_ID).exists()
        {
            DEFAULT_EXPERIMENT_ID.to_string()
        } else {
            (max_id.map_or(0, |m| m + 1)).to_string()
        };

        let dir = self.root.join(&experiment_id);
        fs::create_dir_all(&dir)?;
        let now = now_ms();
        let meta = ExperimentMeta {
            artifact_location: dir.to_string_lossy().to_string(),
            creation_time: now,
            experiment_id: experiment_id.clone(),
            last_update_time: now,
            lifecycle_stage: "active".to_string(),
            name: self.experiment_name.clone(),
        };
        fs::write(dir.join("meta.yaml"), serde_yaml::to_string(&meta)?)?;
        info!(
            "Created experiment '{}' (id {}) in {}",
            self.experiment_name,
            experiment_id,
            self.root.display()
        );
        Ok(experiment_id)
    }

    fn active(&self) -> Result<&ActiveRun> {
        self.active
            .as_ref()
            .ok_or_else(|| Error::Tracking("no active run".into()))
    }

    fn write_run_meta(run: &ActiveRun) -> Result<()> {
        fs::write(run.dir.join("meta.yaml"), serde_yaml::to_string(&run.meta)?)?;
        Ok(())
    }

    fn write_tag(dir: &Path, key: &str, value: &str) -> Result<()> {
        let path = dir.join("tags").join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, value)?;
        Ok(())
    }
}

impl ExperimentTracker for FileTracker {
    fn start_run(&mut self, run_name: Option<&str>) -> Result<RunInfo> {
        if let Some(active) = &self.active {
            return Err(Error::Tracking(format!(
                "run {} is still active",
                active.info.run_id
            )));
        }

        let experiment_id = self.ensure_experiment()?;
        let run_id = Uuid::new_v4().simple().to_string();
        let run_name = run_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S")));

        let dir = self.root.join(&experiment_id).join(&run_id);
        let artifact_dir = dir.join("artifacts");
        for sub in ["params", "metrics", "tags"] {
            fs::create_dir_all(dir.join(sub))?;
        }
        fs::create_dir_all(&artifact_dir)?;

        let meta = RunMeta {
            artifact_uri: artifact_dir.to_string_lossy().to_string(),
            end_time: None,
            entry_point_name: String::new(),
            experiment_id: experiment_id.clone(),
            lifecycle_stage: "active".to_string(),
            run_id: run_id.clone(),
            run_name: run_name.clone(),
            run_uuid: run_id.clone(),
            source_name: String::new(),
            source_type: 4,
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: now_ms(),
            status: RunStatus::Running.code(),
            tags: Vec::new(),
            user_id: user_name(),
        };

        let info = RunInfo {
            run_id,
            experiment_id,
            run_name,
            artifact_dir,
        };
        let run = ActiveRun { info: info.clone(), dir, meta };
        Self::write_run_meta(&run)?;
        Self::write_tag(&run.dir, "mlflow.runName", &run.info.run_name)?;
        Self::write_tag(&run.dir, "mlflow.user", &run.meta.user_id)?;
        Self::write_tag(&run.dir, "mlflow.source.name", env!("CARGO_PKG_NAME"))?;

        info!("Started run {} ({})", info.run_name, info.run_id);
        self.active = Some(run);
        Ok(info)
    }

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()> {
        let run = self.active()?;
        for (key, value) in params {
            check_key(key)?;
            let path = run.dir.join("params").join(key);
            if let Ok(existing) = fs::read_to_string(&path) {
                if existing != *value {
                    return Err(Error::Tracking(format!(
                        "param '{}' already logged with value '{}'",
                        key, existing
                    )));
                }
            }
            fs::write(path, value)?;
        }
        debug!("Logged {} params", params.len());
        Ok(())
    }

    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        let run = self.active()?;
        check_key(key)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run.dir.join("metrics").join(key))?;
        writeln!(file, "{} {} {}", now_ms(), value, step)?;
        Ok(())
    }

    fn log_artifact(&mut self, path: &Path) -> Result<()> {
        let run = self.active()?;
        let name = path
            .file_name()
            .ok_or_else(|| Error::Tracking(format!("artifact path {} has no file name", path.display())))?;
        let target = run.info.artifact_dir.join(name);

        if path.is_dir() {
            copy_dir(path, &target)?;
        } else {
            fs::copy(path, &target)?;
        }
        debug!("Logged artifact {}", target.display());
        Ok(())
    }

    fn log_model(&mut self, weights: &Path, artifact_path: &str, metadata: &ModelMetadata) -> Result<()> {
        let run = self.active()?;
        check_key(artifact_path)?;
        let file_name = weights
            .file_name()
            .ok_or_else(|| Error::Tracking(format!("weights path {} has no file name", weights.display())))?;

        let model_dir = run.info.artifact_dir.join(artifact_path);
        fs::create_dir_all(&model_dir)?;
        fs::copy(weights, model_dir.join(file_name))?;

        let descriptor = MlModel {
            artifact_path,
            flavors: Flavors { burn: metadata },
            model_uuid: Uuid::new_v4().simple().to_string(),
            run_id: &run.info.run_id,
            utc_time_created: Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        };
        fs::write(model_dir.join("MLmodel"), serde_yaml::to_string(&descriptor)?)?;

        info!("Logged model to {}", model_dir.display());
        Ok(())
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        let mut run = self
            .active
            .take()
            .ok_or_else(|| Error::Tracking("no active run".into()))?;
        run.meta.status = status.code();
        run.meta.end_time = Some(now_ms());
        Self::write_run_meta(&run)?;
        info!("Run {} ended: {}", run.info.run_id, status);
        Ok(())
    }
}
