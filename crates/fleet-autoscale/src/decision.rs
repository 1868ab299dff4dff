//! Scaling decisions.

use crate::rule::ScalingRule;
use crate::sampler::ServiceSnapshot;

/// What the autoscaler should do with a service this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Raise replicas to the given count.
    ScaleUp(u64),
    /// Lower replicas to the given count.
    ScaleDown(u64),
    NoAction,
}

impl ScaleDecision {
    /// The replica count to write, if any.
    pub fn target(&self) -> Option<u64> {
        match self {
            ScaleDecision::ScaleUp(n) | ScaleDecision::ScaleDown(n) => Some(*n),
            ScaleDecision::NoAction => None,
        }
    }
}

/// Decide the replica count for `snapshot` under `rule`.
///
/// Pure: cooldowns are the caller's concern. A trigger whose clamped
/// target equals the current count yields `NoAction`.
pub fn decide(rule: &ScalingRule, snapshot: &ServiceSnapshot) -> ScaleDecision {
    let current = snapshot.replicas;
    let cpu = snapshot.cpu_percent;

    if cpu > rule.cpu_threshold && current < rule.max_replicas {
        let target = current
            .saturating_add(rule.scale_up_step)
            .min(rule.max_replicas);
        if target != current {
            return ScaleDecision::ScaleUp(target);
        }
    } else if cpu < rule.scale_down_below() && current > rule.min_replicas {
        let target = current
            .saturating_sub(rule.scale_down_step)
            .max(rule.min_replicas);
        if target != current {
            return ScaleDecision::ScaleDown(target);
        }
    }

    ScaleDecision::NoAction
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::SpecVersion;
    use std::time::Duration;

    fn rule(min: u64, max: u64, threshold: f64, up: u64, down: u64) -> ScalingRule {
        ScalingRule {
            service_id: "api".to_string(),
            min_replicas: min,
            max_replicas: max,
            cpu_threshold: threshold,
            scale_up_step: up,
            scale_down_step: down,
            cooldown: Duration::from_secs(60),
        }
    }

    fn snapshot(replicas: u64, cpu: f64) -> ServiceSnapshot {
        ServiceSnapshot {
            service_id: "api".to_string(),
            replicas,
            cpu_percent: cpu,
            version: SpecVersion(1),
        }
    }

    #[test]
    fn scale_up_by_step() {
        let r = rule(1, 5, 70.0, 2, 1);
        assert_eq!(decide(&r, &snapshot(2, 85.0)), ScaleDecision::ScaleUp(4));
    }

    #[test]
    fn scale_up_clamped_to_max() {
        let r = rule(1, 5, 70.0, 2, 1);
        assert_eq!(decide(&r, &snapshot(4, 99.0)), ScaleDecision::ScaleUp(5));
        assert_eq!(decide(&r, &snapshot(5, 99.0)), ScaleDecision::NoAction);
    }

    #[test]
    fn scale_down_clamped_to_min() {
        let r = rule(2, 8, 70.0, 1, 3);
        assert_eq!(decide(&r, &snapshot(6, 10.0)), ScaleDecision::ScaleDown(3));
        assert_eq!(decide(&r, &snapshot(3, 10.0)), ScaleDecision::ScaleDown(2));
        assert_eq!(decide(&r, &snapshot(2, 10.0)), ScaleDecision::NoAction);
    }

    #[test]
    fn dead_band_never_scales() {
        let r = rule(1, 10, 70.0, 1, 1);
        for replicas in 1..=10 {
            for cpu in [35.0, 40.0, 52.5, 69.9, 70.0] {
                assert_eq!(
                    decide(&r, &snapshot(replicas, cpu)),
                    ScaleDecision::NoAction,
                    "replicas={replicas} cpu={cpu}"
                );
            }
        }
    }

    #[test]
    fn targets_stay_within_bounds() {
        for (min, max) in [(0, 0), (1, 1), (1, 5), (2, 9)] {
            for up in 1..=4 {
                for down in 1..=4 {
                    let r = rule(min, max, 60.0, up, down);
                    for current in min..=max {
                        for cpu in [0.0, 10.0, 29.9, 60.1, 100.0, 400.0] {
                            let decision = decide(&r, &snapshot(current, cpu));
                            match decision {
                                ScaleDecision::ScaleUp(n) => {
                                    assert!(cpu > 60.0);
                                    assert_eq!(n, (current + up).min(max));
                                    assert!(n > current && n <= max);
                                }
                                ScaleDecision::ScaleDown(n) => {
                                    assert!(cpu < 30.0);
                                    assert_eq!(n, current.saturating_sub(down).max(min));
                                    assert!(n < current && n >= min);
                                }
                                ScaleDecision::NoAction => {}
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn zero_utilization_scales_down() {
        let r = rule(1, 5, 70.0, 1, 1);
        assert_eq!(decide(&r, &snapshot(3, 0.0)), ScaleDecision::ScaleDown(2));
    }

    #[test]
    fn nan_utilization_is_no_action() {
        let r = rule(1, 5, 70.0, 1, 1);
        assert_eq!(decide(&r, &snapshot(3, f64::NAN)), ScaleDecision::NoAction);
    }

    #[test]
    fn target_accessor() {
        assert_eq!(ScaleDecision::ScaleUp(3).target(), Some(3));
        assert_eq!(ScaleDecision::NoAction.target(), None);
    }
}
