pub mod chat;
pub mod email;
pub mod line;
pub mod webhook;

use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

/// Per-request timeout of channel HTTP clients.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("pulsewatch-notifier/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Sends `body` as JSON, retrying transport errors and non-2xx responses with
/// exponential backoff (100ms, 200ms).
pub(crate) async fn send_json(
    client: &reqwest::Client,
    service: &str,
    method: reqwest::Method,
    url: &str,
    headers: &[(String, String)],
    body: &Value,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let mut last_err = None;

    for attempt in 0..MAX_ATTEMPTS {
        let mut req = client
            .request(method.clone(), url)
            .header("Content-Type", "application/json")
            .body(payload.clone());
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(());
                }
                // 尝试读取响应 body（限制大小）
                let text = match resp.text().await {
                    Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
                    Err(e) => format!("[Failed to read response body: {e}]"),
                };
                tracing::warn!(service, attempt = attempt + 1, status = %status, "Channel returned non-success status, retrying");
                last_err = Some(anyhow::Error::new(crate::NotifyError::ApiError {
                    service: service.to_string(),
                    status: status.as_u16(),
                    body: text,
                }));
            }
            Err(e) => {
                tracing::warn!(service, attempt = attempt + 1, error = %e, "Channel request failed, retrying");
                last_err = Some(e.into());
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{service}: no attempt made")))
}
