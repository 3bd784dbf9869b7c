//! Experiment tracking
//!
//! A run is a scoped session: [`with_run`] opens it, hands the tracker to the
//! body, and closes it as `FINISHED` or `FAILED` depending on the outcome.
//!
//! - `file_store`: MLflow-compatible local file store (`mlruns/`)
//! - `memory`: in-process recorder, handy for dry runs and tests

pub mod file_store;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::error::Result;

pub use file_store::FileTracker;
pub use memory::{InMemoryTracker, TrackerEvent};

/// Metric names emitted once per epoch
pub const TRAINING_LOSS: &str = "Training loss";
pub const TRAINING_ACCURACY: &str = "Training accuracy";
pub const TESTING_LOSS: &str = "Testing loss";
pub const TESTING_ACCURACY: &str = "Testing accuracy";

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// MLflow's numeric encoding
    pub fn code(&self) -> u8 {
        match self {
            RunStatus::Running => 1,
            RunStatus::Finished => 3,
            RunStatus::Failed => 4,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an open run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    /// Where artifacts of this run end up
    pub artifact_dir: PathBuf,
}

/// Descriptor stored next to a logged model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub architecture: String,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub image_size: u32,
    /// Record format of the weights file
    pub format: String,
}

/// Sink for run parameters, metrics and artifacts
pub trait ExperimentTracker {
    /// Open a new run; at most one run is open at a time
    fn start_run(&mut self, run_name: Option<&str>) -> Result<RunInfo>;

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()>;

    /// Append one scalar to the named series
    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()>;

    /// Copy a file or directory into the run's artifacts
    fn log_artifact(&mut self, path: &Path) -> Result<()>;

    /// Store a weights file under `artifact_path` with its descriptor
    fn log_model(&mut self, weights: &Path, artifact_path: &str, metadata: &ModelMetadata) -> Result<()>;

    /// Close the open run
    fn end_run(&mut self, status: RunStatus) -> Result<()>;
}

/// Run `body` inside a tracked run
///
/// The run ends `FINISHED` when the body succeeds and `FAILED` otherwise; the
/// body's error is returned unchanged.
pub fn with_run<T, R, F>(tracker: &mut T, run_name: Option<&str>, body: F) -> Result<R>
where
    T: ExperimentTracker + ?Sized,
    F: FnOnce(&mut T, &RunInfo) -> Result<R>,
{
    let info = tracker.start_run(run_name)?;

    match body(tracker, &info) {
        Ok(value) => {
            tracker.end_run(RunStatus::Finished)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(end_err) = tracker.end_run(RunStatus::Failed) {
                warn!("Could not mark run {} as failed: {}", info.run_id, end_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::Error;

    #[test]
    fn test_status_codes() {
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
        assert_eq!(RunStatus::Failed.code(), 4);
    }

    #[test]
    fn test_with_run_finishes() {
        let mut tracker = InMemoryTracker::new();
        let value = with_run(&mut tracker, Some("ok"), |t, _| {
            t.log_metric(TRAINING_LOSS, 1.0, 0)?;
            Ok(5)
        })
        .unwrap();

        assert_eq!(value, 5);
        assert_eq!(tracker.final_status(), Some(RunStatus::Finished));
    }

    #[test]
    fn test_with_run_marks_failure() {
        let mut tracker = InMemoryTracker::new();
        let result: Result<()> = with_run(&mut tracker, None, |_, _| {
            Err(Error::Training("diverged".into()))
        });

        assert!(matches!(result, Err(Error::Training(_))));
        assert_eq!(tracker.final_status(), Some(RunStatus::Failed));
    }
}
