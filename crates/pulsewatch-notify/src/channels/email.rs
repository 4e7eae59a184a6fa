use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::{Message, NotificationChannel};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use pulsewatch_common::types::{ChannelType, MessageFormat};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    fn new(cfg: &EmailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .map_err(|e| NotifyError::SmtpError(e.to_string()))?
            .port(cfg.smtp_port);

        if let (Some(user), Some(pass)) = (&cfg.smtp_username, &cfg.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(&cfg.from)?,
            to: cfg
                .to
                .iter()
                .map(|addr| parse_mailbox(addr))
                .collect::<Result<_>>()?,
        })
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox> {
    addr.trim()
        .parse()
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid email address '{addr}': {e}")))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let content_type = match message.format {
            MessageFormat::Html => ContentType::TEXT_HTML,
            _ => ContentType::TEXT_PLAIN,
        };

        for recipient in &self.to {
            let email = lettre::Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(&message.title)
                .header(content_type.clone())
                .body(message.body.clone())?;

            let mut last_err = None;
            for attempt in 0..3u32 {
                match self.transport.send(email.clone()).await {
                    Ok(_) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            recipient = %recipient,
                            error = %e,
                            "Email send failed, retrying"
                        );
                        last_err = Some(e);
                        if attempt < 2 {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                100 * 2u64.pow(attempt),
                            ))
                            .await;
                        }
                    }
                }
            }
            if let Some(e) = last_err {
                return Err(NotifyError::SmtpError(format!("{recipient}: {e}")).into());
            }
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
    #[serde(deserialize_with = "string_or_list")]
    to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

/// Accepts `"a@x, b@x"` as well as `["a@x", "b@x"]`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let list = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn parse_config(config: &Value) -> Result<EmailConfig> {
    let cfg: EmailConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid email config: {e}")))?;
    if cfg.to.is_empty() {
        return Err(NotifyError::InvalidConfig(
            "email requires at least one recipient".to_string(),
        ));
    }
    Ok(cfg)
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn recipient_type(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg = parse_config(config)?;
        parse_mailbox(&cfg.from)?;
        for addr in &cfg.to {
            parse_mailbox(addr)?;
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg = parse_config(config)?;
        Ok(Box::new(EmailChannel::new(&cfg)?))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("smtp_password") {
                obj.insert(
                    "smtp_password".to_string(),
                    Value::String("***".to_string()),
                );
            }
        }
        redacted
    }
}
