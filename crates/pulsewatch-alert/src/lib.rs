//! Alert evaluation pipeline.
//!
//! An incoming [`AlertPayload`] is resolved to rules (cache first, then the
//! catalog with auto-provisioning), each rule's window is evaluated by a
//! [`Detector`], and the outcome advances the rule's persisted state and its
//! triggered event. Notification delivery lives in `pulsewatch-notify`.
//!
//! [`AlertPayload`]: pulsewatch_common::types::AlertPayload

pub mod cache;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod matcher;
pub mod rules;
pub mod state_machine;
pub mod window;

#[cfg(test)]
mod tests;

use pulsewatch_common::types::{DetectionType, MetricSample, Rule, Severity};

pub use cache::{ChangeOp, RuleCache};
pub use engine::{AlertEngine, AlertEngineConfig, ProcessSummary};
pub use error::AlertError;

/// Result of evaluating one rule against its samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub exceeded: bool,
    /// Last scaled value (absolute) or amplitude in percent (amplitude).
    pub value: f64,
    pub severity: Option<Severity>,
}

impl Evaluation {
    pub fn normal(value: f64) -> Self {
        Self {
            exceeded: false,
            value,
            severity: None,
        }
    }
}

/// Decides whether a window of samples breaches a rule's thresholds.
///
/// Implementations are pure: the same rule and samples always give the same
/// [`Evaluation`]. The window has already been narrowed by
/// [`window::select`].
pub trait Detector: Send + Sync {
    /// Detection type this implementation handles.
    fn kind(&self) -> DetectionType;

    fn evaluate(&self, rule: &Rule, window: &[MetricSample]) -> Evaluation;
}

/// Evaluates `samples` for `rule` using the detector of its detection type.
pub fn evaluate(rule: &Rule, samples: &[MetricSample]) -> Evaluation {
    let window = window::select(samples, window::rule_duration_secs(rule));
    rules::detector_for(rule.detection_type).evaluate(rule, &window)
}

/// Runs a storage call under `limit`, mapping an elapsed deadline to
/// [`StorageError::Timeout`](pulsewatch_storage::StorageError::Timeout).
pub(crate) async fn bounded<T, F>(
    limit: std::time::Duration,
    operation: &'static str,
    fut: F,
) -> pulsewatch_storage::Result<T>
where
    F: std::future::Future<Output = pulsewatch_storage::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(pulsewatch_storage::StorageError::Timeout { operation }),
    }
}
