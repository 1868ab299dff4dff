//! Scaling rules and their validation.

use std::time::Duration;

use fleet_core::config::RuleConfig;
use fleet_core::{ConfigError, ServiceId};
use thiserror::Error;

/// Reasons a rule is refused at registration.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule has no service")]
    MissingService,

    #[error("rule for {service}: min_replicas {min} exceeds max_replicas {max}")]
    Bounds { service: String, min: u64, max: u64 },

    #[error("rule for {service}: {field} must be greater than zero")]
    ZeroStep {
        service: String,
        field: &'static str,
    },

    #[error("rule for {service}: cpu_threshold {threshold} is not a positive percentage")]
    Threshold { service: String, threshold: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Bounds and steps for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRule {
    pub service_id: ServiceId,
    pub min_replicas: u64,
    pub max_replicas: u64,
    /// Scale up above this CPU percentage; scale down below half of it.
    pub cpu_threshold: f64,
    pub scale_up_step: u64,
    pub scale_down_step: u64,
    pub cooldown: Duration,
}

impl ScalingRule {
    pub fn validate(&self) -> Result<(), RuleError> {
        let service = || self.service_id.clone();

        if self.service_id.trim().is_empty() {
            return Err(RuleError::MissingService);
        }
        if self.min_replicas > self.max_replicas {
            return Err(RuleError::Bounds {
                service: service(),
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }
        if self.scale_up_step == 0 {
            return Err(RuleError::ZeroStep {
                service: service(),
                field: "scale_up_step",
            });
        }
        if self.scale_down_step == 0 {
            return Err(RuleError::ZeroStep {
                service: service(),
                field: "scale_down_step",
            });
        }
        if !self.cpu_threshold.is_finite() || self.cpu_threshold <= 0.0 {
            return Err(RuleError::Threshold {
                service: service(),
                threshold: self.cpu_threshold,
            });
        }
        Ok(())
    }

    /// Below this utilization the service scales down.
    pub fn scale_down_below(&self) -> f64 {
        self.cpu_threshold / 2.0
    }
}

impl TryFrom<&RuleConfig> for ScalingRule {
    type Error = RuleError;

    fn try_from(config: &RuleConfig) -> Result<Self, Self::Error> {
        let rule = ScalingRule {
            service_id: config.service.clone(),
            min_replicas: config.min_replicas,
            max_replicas: config.max_replicas,
            cpu_threshold: config.cpu_threshold,
            scale_up_step: config.scale_up_step,
            scale_down_step: config.scale_down_step,
            cooldown: config.cooldown()?,
        };
        rule.validate()?;
        Ok(rule)
    }
}
