use super::{http_client, send_json};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::config_str;
use crate::{Message, NotificationChannel};
use async_trait::async_trait;
use pulsewatch_common::types::ChannelType;
use serde_json::{json, Value};

/// Chat services reached through an incoming-webhook URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Slack,
    Discord,
    Teams,
    Webex,
}

impl ChatKind {
    fn channel_type(self) -> ChannelType {
        match self {
            ChatKind::Slack => ChannelType::Slack,
            ChatKind::Discord => ChannelType::Discord,
            ChatKind::Teams => ChannelType::Teams,
            ChatKind::Webex => ChannelType::Webex,
        }
    }

    /// Service-specific JSON body for a markdown message.
    pub fn payload(self, message: &Message) -> Value {
        let (title, text) = (&message.title, &message.body);
        match self {
            ChatKind::Slack => json!({
                "text": format!("{title}\n{text}"),
                "blocks": [
                    {"type": "header", "text": {"type": "plain_text", "text": title}},
                    {"type": "section", "text": {"type": "mrkdwn", "text": text}},
                ],
            }),
            ChatKind::Discord => json!({
                "embeds": [{
                    "title": title,
                    "description": text,
                    "color": 16711680,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "footer": {"text": "pulsewatch"},
                }],
            }),
            ChatKind::Teams => json!({
                "@type": "MessageCard",
                "@context": "http://schema.org/extensions",
                "summary": title,
                "themeColor": "0076D7",
                "title": title,
                "text": text,
            }),
            ChatKind::Webex => json!({
                "markdown": format!("**{title}**\n{text}"),
            }),
        }
    }
}

pub struct ChatChannel {
    kind: ChatKind,
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl NotificationChannel for ChatChannel {
    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        send_json(
            &self.client,
            self.channel_name(),
            reqwest::Method::POST,
            &self.url,
            &[],
            &self.kind.payload(message),
        )
        .await
    }

    fn channel_name(&self) -> &str {
        self.kind.channel_type().as_str()
    }
}

pub struct ChatPlugin(pub ChatKind);

impl ChannelPlugin for ChatPlugin {
    fn channel_type(&self) -> ChannelType {
        self.0.channel_type()
    }

    fn recipient_type(&self) -> &str {
        "webhook_url"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let url = config_str(config, "url").ok_or_else(|| {
            NotifyError::InvalidConfig(format!("{} requires a webhook url", self.channel_type()))
        })?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NotifyError::InvalidConfig(format!(
                "{} url must be http(s): {url}",
                self.channel_type()
            )));
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let url = config_str(config, "url")
            .ok_or_else(|| NotifyError::InvalidConfig("missing url".to_string()))?;
        Ok(Box::new(ChatChannel {
            kind: self.0,
            client: http_client().map_err(NotifyError::Send)?,
            url: url.to_string(),
        }))
    }
}
