//! fleet-autoscale: CPU-driven replica scaling.
//!
//! Samples CPU utilization for each service with a registered rule,
//! compares it against the rule's threshold, and writes the new replica
//! count back through the orchestrator's compare-and-swap update.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu      = mean CPU% over running tasks
//! replicas = replicas in the service spec
//!
//! if cpu > threshold and replicas < max:
//!     ScaleUp(min(replicas + up_step, max))
//!
//! if cpu < threshold / 2 and replicas > min:
//!     ScaleDown(max(replicas - down_step, min))
//! ```
//!
//! The band between `threshold / 2` and `threshold` never scales. A
//! per-service cooldown window starts only once the orchestrator has
//! accepted a scale command.

pub mod controller;
pub mod cooldown;
pub mod decision;
pub mod rule;
pub mod sampler;
pub mod store;

pub use controller::{Autoscaler, TickOutcome};
pub use cooldown::CooldownTracker;
pub use decision::{ScaleDecision, decide};
pub use rule::{RuleError, ScalingRule};
pub use sampler::{MetricSampler, SampleError, ServiceSnapshot, cpu_percent};
pub use store::RuleStore;
