use pulsewatch_storage::StorageError;
use std::time::Duration;

/// Errors that can occur within the notification subsystem.
///
/// Channel implementations build on `anyhow` internally and surface failures
/// through [`NotifyError::Send`]; everything the dispatcher records on a
/// notify log goes through this type.
///
/// # Examples
///
/// ```rust
/// use pulsewatch_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Rendering a notification template failed.
    #[error("Notify: template rendering error: {0}")]
    TemplateError(String),

    /// Delivery failed inside a channel implementation.
    #[error("Notify: send failed: {0}")]
    Send(#[source] anyhow::Error),

    #[error("Notify: {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl NotifyError {
    /// Kind recorded in a notify log's error detail.
    pub fn detail_kind(&self) -> &'static str {
        match self {
            NotifyError::TemplateError(_) => "render",
            _ => "send",
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
