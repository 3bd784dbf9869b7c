//! Optimizer construction from the run configuration

use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, SgdConfig};

use crate::config::TrainingConfig;

/// SGD with classical momentum (no dampening, no Nesterov)
pub fn sgd_config(config: &TrainingConfig) -> SgdConfig {
    let momentum = (config.momentum > 0.0).then(|| {
        MomentumConfig::new()
            .with_momentum(config.momentum)
            .with_dampening(0.0)
            .with_nesterov(false)
    });

    SgdConfig::new()
        .with_momentum(momentum)
        .with_weight_decay(weight_decay(config))
}

pub fn adam_config(config: &TrainingConfig) -> AdamConfig {
    AdamConfig::new().with_weight_decay(weight_decay(config))
}

fn weight_decay(config: &TrainingConfig) -> Option<WeightDecayConfig> {
    (config.weight_decay > 0.0).then(|| WeightDecayConfig::new(config.weight_decay as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_momentum_without_dampening() {
        let config = sgd_config(&TrainingConfig::default());
        let momentum = config.momentum.expect("momentum configured");
        assert!((momentum.momentum - 0.9).abs() < 1e-12);
        assert_eq!(momentum.dampening, 0.0);
        assert!(!momentum.nesterov);
        assert!(config.weight_decay.is_none());
    }

    #[test]
    fn test_zero_momentum_disables_it() {
        let training = TrainingConfig {
            momentum: 0.0,
            weight_decay: 1e-4,
            ..TrainingConfig::default()
        };
        let config = sgd_config(&training);
        assert!(config.momentum.is_none());
        assert!(config.weight_decay.is_some());
        assert!(adam_config(&training).weight_decay.is_some());
    }
}
