use pulsewatch_storage::StorageError;
use std::time::Duration;

/// Errors surfaced by [`crate::engine::AlertEngine::process_alert`].
///
/// Validation and lookup errors reach the caller; persistence failures are
/// logged per rule and only counted in the summary.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The payload was rejected before any evaluation.
    #[error("Alert: invalid payload: {0}")]
    Validation(String),

    /// The rule catalog could not be read while resolving rules.
    #[error("Alert: rule lookup failed: {0}")]
    Lookup(#[source] StorageError),

    /// A state or event write failed for one rule.
    #[error("Alert: persisting rule {rule_id} failed: {source}")]
    Persistence {
        rule_id: String,
        #[source]
        source: StorageError,
    },

    /// The whole evaluation exceeded its deadline.
    #[error("Alert: evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// The evaluation pool no longer accepts work.
    #[error("Alert: evaluation pool is shut down")]
    Shutdown,
}

impl AlertError {
    pub fn is_validation(&self) -> bool {
        matches!(self, AlertError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, AlertError>;
