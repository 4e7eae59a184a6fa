use super::{http_client, send_json};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::config_str;
use crate::{Message, NotificationChannel};
use async_trait::async_trait;
use pulsewatch_common::types::ChannelType;
use serde_json::{json, Value};

pub const DEFAULT_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

/// LINE Messaging API push message.
pub struct LineChannel {
    client: reqwest::Client,
    url: String,
    to: String,
    channel_token: String,
}

impl LineChannel {
    pub fn payload(to: &str, message: &Message) -> Value {
        let text = format!("{}\n\n{}", message.title, message.body).replace("\n\n\n", "\n\n");
        json!({
            "to": to,
            "messages": [{"type": "text", "text": text}],
        })
    }
}

#[async_trait]
impl NotificationChannel for LineChannel {
    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let auth = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.channel_token),
        )];
        send_json(
            &self.client,
            "line",
            reqwest::Method::POST,
            &self.url,
            &auth,
            &Self::payload(&self.to, message),
        )
        .await
    }

    fn channel_name(&self) -> &str {
        "line"
    }
}

pub struct LinePlugin;

impl ChannelPlugin for LinePlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Line
    }

    fn recipient_type(&self) -> &str {
        "line_user"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        if config_str(config, "to").is_none() {
            return Err(NotifyError::InvalidConfig(
                "line requires a recipient id (to)".to_string(),
            ));
        }
        if config_str(config, "channel_token").is_none() {
            return Err(NotifyError::InvalidConfig(
                "line requires a channel_token".to_string(),
            ));
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        self.validate_config(config)?;
        let field = |key: &str| config_str(config, key).unwrap_or_default().to_string();
        Ok(Box::new(LineChannel {
            client: http_client().map_err(NotifyError::Send)?,
            url: config_str(config, "url")
                .unwrap_or(DEFAULT_PUSH_URL)
                .to_string(),
            to: field("to"),
            channel_token: field("channel_token"),
        }))
    }
}
