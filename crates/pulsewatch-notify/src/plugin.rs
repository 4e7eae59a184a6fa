use crate::error::{NotifyError, Result};
use crate::{Message, NotificationChannel, Notifier};
use async_trait::async_trait;
use pulsewatch_common::types::ChannelType;
use serde_json::Value;
use std::collections::HashMap;

/// Factory for [`NotificationChannel`] instances built from a contact's JSON
/// configuration.
///
/// Each plugin is registered in the [`ChannelRegistry`] under its
/// [`ChannelType`]. The registry validates a config through the matching
/// plugin before instantiating the channel.
pub trait ChannelPlugin: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Describes the kind of recipient this channel accepts
    /// (e.g., `"email"`, `"webhook_url"`, `"line_user"`).
    fn recipient_type(&self) -> &str;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a channel from a validated config.
    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>>;

    /// Returns a copy of `config` with secrets replaced by `"***"`. Used for
    /// the contact snapshot stored on notify logs.
    fn redact_config(&self, config: &Value) -> Value {
        crate::utils::redact_sensitive_json(config)
    }
}

/// Registry of available [`ChannelPlugin`]s.
///
/// # Examples
///
/// ```
/// use pulsewatch_common::types::ChannelType;
/// use pulsewatch_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin(ChannelType::Email));
/// assert!(registry.has_plugin(ChannelType::Line));
/// assert_eq!(registry.plugin_names().len(), 7);
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<ChannelType, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.channel_type(), plugin);
    }

    pub fn create_channel(
        &self,
        channel_type: ChannelType,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let plugin = self.get_plugin(channel_type)?;
        plugin.validate_config(config)?;
        plugin.create_channel(config)
    }

    pub fn validate(&self, channel_type: ChannelType, config: &Value) -> Result<()> {
        self.get_plugin(channel_type)?.validate_config(config)
    }

    /// Redacts `config` with the plugin's rules, falling back to the generic
    /// key-based redaction for unregistered types.
    pub fn redact(&self, channel_type: ChannelType, config: &Value) -> Value {
        match self.plugins.get(&channel_type) {
            Some(plugin) => plugin.redact_config(config),
            None => crate::utils::redact_sensitive_json(config),
        }
    }

    pub fn get_plugin(&self, channel_type: ChannelType) -> Result<&dyn ChannelPlugin> {
        self.plugins
            .get(&channel_type)
            .map(|p| p.as_ref())
            .ok_or_else(|| NotifyError::UnknownChannelType(channel_type.to_string()))
    }

    pub fn has_plugin(&self, channel_type: ChannelType) -> bool {
        self.plugins.contains_key(&channel_type)
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.plugins.keys().map(|t| t.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        use crate::channels::chat::{ChatKind, ChatPlugin};

        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry.register(Box::new(crate::channels::line::LinePlugin));
        for kind in [
            ChatKind::Slack,
            ChatKind::Discord,
            ChatKind::Teams,
            ChatKind::Webex,
        ] {
            registry.register(Box::new(ChatPlugin(kind)));
        }
        registry
    }
}

/// [`Notifier`] backed by the channel registry: validates the contact's
/// config, builds the channel and sends.
pub struct PluginNotifier {
    registry: ChannelRegistry,
}

impl PluginNotifier {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }
}

impl Default for PluginNotifier {
    fn default() -> Self {
        Self::new(ChannelRegistry::default())
    }
}

#[async_trait]
impl Notifier for PluginNotifier {
    async fn send(
        &self,
        channel_type: ChannelType,
        config: &Value,
        message: &Message,
    ) -> Result<()> {
        let channel = self.registry.create_channel(channel_type, config)?;
        channel.send(message).await.map_err(NotifyError::Send)?;
        tracing::debug!(channel = channel.channel_name(), title = %message.title, "Notification delivered");
        Ok(())
    }
}
