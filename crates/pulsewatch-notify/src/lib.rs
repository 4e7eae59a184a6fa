//! Batched, templated notification delivery.
//!
//! [`dispatcher::NotificationDispatcher`] groups triggered events by contact,
//! renders one message per contact with a [`template::TemplateRenderer`] and
//! hands it to a [`Notifier`]. Built-in channels (email, chat webhooks, generic
//! webhook, LINE) are provided through [`plugin::ChannelRegistry`].

pub mod channels;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod template;
pub mod utils;


use async_trait::async_trait;
use pulsewatch_common::types::{ChannelType, MessageFormat};
use serde_json::Value;

pub use dispatcher::{DispatcherConfig, FlushSummary, NotificationDispatcher};
pub use error::{NotifyError, Result};
pub use plugin::{ChannelRegistry, PluginNotifier};
pub use template::{PlaceholderRenderer, Template, TemplateRenderer, TemplateSet};

/// A rendered notification ready to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub format: MessageFormat,
}

/// A configured delivery channel (one contact's SMTP server, webhook URL, ...).
///
/// Implementations are created by the corresponding [`plugin::ChannelPlugin`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the message through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after the channel's own attempts.
    async fn send(&self, message: &Message) -> anyhow::Result<()>;

    /// Returns the channel type name (e.g., `"email"`, `"webhook"`).
    fn channel_name(&self) -> &str;
}

/// Sends a rendered message to a destination described by a channel type
/// and its JSON configuration.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel_type: ChannelType, config: &Value, message: &Message)
        -> Result<()>;
}
