//! Training module
//!
//! - `trainer`: the epoch loop (Training pass, Testing pass, best-state restore)
//! - `optimizer`: SGD / Adam construction from the run configuration
//! - `scheduler`: epoch-granular learning-rate schedules
//! - `best`: best-state holder
//! - `metrics`: per-pass loss and accuracy accumulation

pub mod best;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use best::BestState;
pub use metrics::{PhaseMetrics, RunningMetrics};
pub use optimizer::{adam_config, sgd_config};
pub use scheduler::{LRScheduler, ScheduleState};
pub use trainer::{evaluate, fine_tune, train_model, EpochRecord, LoopConfig, TrainingReport};
