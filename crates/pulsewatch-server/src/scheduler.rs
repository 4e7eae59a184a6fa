use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use pulsewatch_alert::AlertEngine;
use pulsewatch_notify::NotificationDispatcher;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs [`NotificationDispatcher::flush`] every `period`.
pub struct NotifyScheduler {
    dispatcher: Arc<NotificationDispatcher>,
    period: Duration,
}

impl NotifyScheduler {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, period: Duration) -> Self {
        Self { dispatcher, period }
    }

    pub async fn run(&self) {
        tracing::info!(
            period_secs = self.period.as_secs(),
            "Notification scheduler started"
        );

        let mut tick = interval(self.period);
        // 一轮耗时超过周期时直接跳过，不补发
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match self.dispatcher.flush(Utc::now().timestamp()).await {
                Ok(summary) if summary.skipped => {
                    tracing::debug!("Previous notification flush still running");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Notification flush failed"),
            }
        }
    }
}

/// Rebuilds the rule cache once a day at `hour` (UTC).
pub struct RuleReloadScheduler {
    engine: Arc<AlertEngine>,
    hour: u32,
}

impl RuleReloadScheduler {
    pub fn new(engine: Arc<AlertEngine>, hour: u32) -> Self {
        Self { engine, hour }
    }

    pub async fn run(&self) {
        tracing::info!(hour_utc = self.hour, "Rule reload scheduler started");
        loop {
            let now = Utc::now();
            let next = next_reload_at(now, self.hour);
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.engine.rebuild_cache().await {
                Ok(count) => tracing::info!(rules = count, "Rule cache reloaded"),
                Err(e) => tracing::error!(error = %e, "Rule cache reload failed"),
            }
        }
    }
}

/// Next instant strictly after `now` whose UTC hour is `hour` and minute is 0.
pub fn next_reload_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let hour = hour.min(23);
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .map(|t| Utc.from_utc_datetime(&t));
    match today {
        Some(t) if t > now => t,
        Some(t) => t + ChronoDuration::days(1),
        None => now + ChronoDuration::days(1),
    }
}
