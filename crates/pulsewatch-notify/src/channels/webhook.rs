use super::{http_client, send_json};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::config_str;
use crate::{Message, NotificationChannel};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use pulsewatch_common::types::ChannelType;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Pulsewatch-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Pulsewatch-Timestamp";

/// Base64 HMAC-SHA256 of `"{timestamp}.{body}"` keyed with `secret`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Generic JSON webhook. The rendered body is embedded as JSON when it
/// parses, otherwise as a string.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    headers: BTreeMap<String, String>,
    secret: Option<String>,
}

impl WebhookChannel {
    pub fn payload(message: &Message) -> Value {
        let body = serde_json::from_str::<Value>(&message.body)
            .unwrap_or_else(|_| Value::String(message.body.clone()));
        json!({
            "title": message.title,
            "message": body,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let payload = Self::payload(message);
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(secret) = &self.secret {
            let timestamp = chrono::Utc::now().timestamp();
            let signature = sign(secret, timestamp, &serde_json::to_vec(&payload)?)?;
            headers.push((TIMESTAMP_HEADER.to_string(), timestamp.to_string()));
            headers.push((SIGNATURE_HEADER.to_string(), format!("sha256={signature}")));
        }

        send_json(
            &self.client,
            "webhook",
            self.method.clone(),
            &self.url,
            &headers,
            &payload,
        )
        .await
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

pub struct WebhookPlugin;

fn parse_method(config: &Value) -> Result<reqwest::Method> {
    let method = config_str(config, "method").unwrap_or("POST").to_uppercase();
    match method.as_str() {
        "POST" | "PUT" | "PATCH" => Ok(method
            .parse()
            .map_err(|_| NotifyError::InvalidConfig(format!("invalid method {method}")))?),
        _ => Err(NotifyError::InvalidConfig(format!(
            "webhook method must be POST, PUT or PATCH, got {method}"
        ))),
    }
}

impl ChannelPlugin for WebhookPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    fn recipient_type(&self) -> &str {
        "webhook_url"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let url = config_str(config, "url")
            .ok_or_else(|| NotifyError::InvalidConfig("webhook requires a url".to_string()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook url must be http(s): {url}"
            )));
        }
        parse_method(config)?;
        if let Some(headers) = config.get("headers") {
            if !headers.is_object() {
                return Err(NotifyError::InvalidConfig(
                    "webhook headers must be an object".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let url = config_str(config, "url")
            .ok_or_else(|| NotifyError::InvalidConfig("missing url".to_string()))?;
        let headers = config
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::new(WebhookChannel {
            client: http_client().map_err(NotifyError::Send)?,
            url: url.to_string(),
            method: parse_method(config)?,
            headers,
            secret: config_str(config, "secret").map(str::to_string),
        }))
    }
}
