//! In-memory tracker
//!
//! Records every call in order. Can be told to fail after a number of metric
//! writes, which exercises the error path of the optimisation loop.

use std::path::{Path, PathBuf};

use super::{ExperimentTracker, ModelMetadata, RunInfo, RunStatus};
use crate::utils::error::{Error, Result};

/// One recorded tracker call
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StartRun(String),
    Params(Vec<(String, String)>),
    Metric { key: String, value: f64, step: usize },
    Artifact(PathBuf),
    Model { weights: PathBuf, artifact_path: String, metadata: ModelMetadata },
    EndRun(RunStatus),
}

#[derive(Debug, Default)]
pub struct InMemoryTracker {
    events: Vec<TrackerEvent>,
    active: Option<RunInfo>,
    runs: usize,
    fail_after_metrics: Option<usize>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a tracking error on metric write number `n + 1`
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after_metrics: Some(n),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[TrackerEvent] {
        &self.events
    }

    /// `(key, value, step)` of every metric write, in order
    pub fn metrics(&self) -> Vec<(&str, f64, usize)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::Metric { key, value, step } => Some((key.as_str(), *value, *step)),
                _ => None,
            })
            .collect()
    }

    /// `(step, value)` series of one metric
    pub fn series(&self, key: &str) -> Vec<(usize, f64)> {
        self.metrics()
            .into_iter()
            .filter(|(k, _, _)| *k == key)
            .map(|(_, v, s)| (s, v))
            .collect()
    }

    pub fn params(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::Params(p) => Some(p.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Status the last run was closed with
    pub fn final_status(&self) -> Option<RunStatus> {
        self.events.iter().rev().find_map(|e| match e {
            TrackerEvent::EndRun(status) => Some(*status),
            _ => None,
        })
    }

    fn require_run(&self) -> Result<&RunInfo> {
        self.active
            .as_ref()
            .ok_or_else(|| Error::Tracking("no active run".into()))
    }
}

impl ExperimentTracker for InMemoryTracker {
    fn start_run(&mut self, run_name: Option<&str>) -> Result<RunInfo> {
        if let Some(active) = &self.active {
            return Err(Error::Tracking(format!("run {} is still active", active.run_id)));
        }
        self.runs += 1;
        let name = run_name.map(str::to_string).unwrap_or_else(|| format!("run-{}", self.runs));
        let info = RunInfo {
            run_id: format!("memory-{}", self.runs),
            experiment_id: "0".into(),
            run_name: name.clone(),
            artifact_dir: PathBuf::new(),
        };
        self.events.push(TrackerEvent::StartRun(name));
        self.active = Some(info.clone());
        Ok(info)
    }

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()> {
        self.require_run()?;
        self.events.push(TrackerEvent::Params(params.to_vec()));
        Ok(())
    }

    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        self.require_run()?;
        if let Some(limit) = self.fail_after_metrics {
            if self.metrics().len() >= limit {
                return Err(Error::Tracking(format!("metric store unavailable ({})", key)));
            }
        }
        self.events.push(TrackerEvent::Metric {
            key: key.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn log_artifact(&mut self, path: &Path) -> Result<()> {
        self.require_run()?;
        self.events.push(TrackerEvent::Artifact(path.to_path_buf()));
        Ok(())
    }

    fn log_model(&mut self, weights: &Path, artifact_path: &str, metadata: &ModelMetadata) -> Result<()> {
        self.require_run()?;
        self.events.push(TrackerEvent::Model {
            weights: weights.to_path_buf(),
            artifact_path: artifact_path.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        self.require_run()?;
        self.active = None;
        self.events.push(TrackerEvent::EndRun(status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut tracker = InMemoryTracker::new();
        tracker.start_run(Some("a")).unwrap();
        tracker
            .log_params(&[("epochs".into(), "10".into())])
            .unwrap();
        tracker.log_metric("Training loss", 0.5, 0).unwrap();
        tracker.log_metric("Training loss", 0.25, 1).unwrap();
        tracker.end_run(RunStatus::Finished).unwrap();

        assert_eq!(tracker.series("Training loss"), vec![(0, 0.5), (1, 0.25)]);
        assert_eq!(tracker.params(), vec![("epochs".to_string(), "10".to_string())]);
        assert_eq!(tracker.events().first(), Some(&TrackerEvent::StartRun("a".into())));
    }

    #[test]
    fn test_requires_active_run() {
        let mut tracker = InMemoryTracker::new();
        assert!(tracker.log_metric("x", 1.0, 0).is_err());
        tracker.start_run(None).unwrap();
        assert!(tracker.start_run(None).is_err());
    }

    #[test]
    fn test_failing_after() {
        let mut tracker = InMemoryTracker::failing_after(1);
        tracker.start_run(None).unwrap();
        assert!(tracker.log_metric("x", 1.0, 0).is_ok());
        assert!(matches!(tracker.log_metric("x", 2.0, 1), Err(Error::Tracking(_))));
    }
}
