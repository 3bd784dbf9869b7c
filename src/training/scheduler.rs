//! Learning Rate Scheduler Module
//!
//! Epoch-granular schedules. The loop asks for the rate of the current
//! schedule position before each Training pass and advances the position
//! once the pass is done.

use serde::{Deserialize, Serialize};

use crate::config::LrScheduleConfig;

/// Learning rate as a function of completed Training passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Periodic step decay: `lr = initial_lr * gamma^(epoch / step_size)`
    StepDecay {
        initial_lr: f64,
        gamma: f64,
        step_size: usize,
    },

    /// Exponential decay: `lr = initial_lr * gamma^epoch`
    Exponential { initial_lr: f64, gamma: f64 },
}

impl LRScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Multiply the rate by `gamma` every `step_size` epochs
    pub fn step_decay(initial_lr: f64, gamma: f64, step_size: usize) -> Self {
        Self::StepDecay {
            initial_lr,
            gamma,
            step_size: step_size.max(1),
        }
    }

    pub fn exponential(initial_lr: f64, gamma: f64) -> Self {
        Self::Exponential { initial_lr, gamma }
    }

    pub fn from_config(initial_lr: f64, config: &LrScheduleConfig) -> Self {
        match *config {
            LrScheduleConfig::Constant => Self::constant(initial_lr),
            LrScheduleConfig::Step { step_size, gamma } => {
                Self::step_decay(initial_lr, gamma, step_size)
            }
            LrScheduleConfig::Exponential { gamma } => Self::exponential(initial_lr, gamma),
        }
    }

    /// Learning rate after `epoch` completed Training passes
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::StepDecay {
                initial_lr,
                gamma,
                step_size,
            } => initial_lr * gamma.powi((epoch / step_size) as i32),
            Self::Exponential { initial_lr, gamma } => initial_lr * gamma.powi(epoch as i32),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant (lr={})", lr),
            Self::StepDecay {
                initial_lr,
                gamma,
                step_size,
            } => format!(
                "StepDecay (lr={}, gamma={}, every {} epochs)",
                initial_lr, gamma, step_size
            ),
            Self::Exponential { initial_lr, gamma } => {
                format!("Exponential (lr={}, gamma={})", initial_lr, gamma)
            }
        }
    }
}

/// A schedule plus its position
#[derive(Debug, Clone)]
pub struct ScheduleState {
    scheduler: LRScheduler,
    steps: usize,
}

impl ScheduleState {
    pub fn new(scheduler: LRScheduler) -> Self {
        Self {
            scheduler,
            steps: 0,
        }
    }

    /// Rate to use for the next Training pass
    pub fn current_lr(&self) -> f64 {
        self.scheduler.get_lr(self.steps)
    }

    /// Advance one epoch
    pub fn step(&mut self) {
        self.steps += 1;
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn scheduler(&self) -> &LRScheduler {
        &self.scheduler
    }
}
