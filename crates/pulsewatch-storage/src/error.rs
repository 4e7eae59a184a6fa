/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulsewatch_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "rule_state",
///     id: "rule-99".to_string(),
/// };
/// assert!(err.to_string().contains("rule_state"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An optimistic update lost the race: the row changed since it was read.
    #[error("Storage: concurrent update of {entity} (id={id})")]
    Conflict { entity: &'static str, id: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (snapshot and list columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column held a value that does not map onto the domain type.
    #[error("Storage: invalid value in column '{column}': {value}")]
    InvalidValue { column: &'static str, value: String },

    /// The operation did not complete within the caller's deadline.
    #[error("Storage: {operation} timed out")]
    Timeout { operation: &'static str },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
