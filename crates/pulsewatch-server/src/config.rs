use pulsewatch_alert::AlertEngineConfig;
use pulsewatch_common::id::MAX_ID_PART;
use pulsewatch_notify::{DispatcherConfig, Template};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
    /// 覆盖内置通知模板（按 kind + format 匹配）
    #[serde(default)]
    pub templates: Vec<Template>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database: DatabaseConfig::default(),
            alert: AlertConfig::default(),
            notify: NotifyConfig::default(),
            instance: InstanceConfig::default(),
            templates: Vec::new(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    /// URL safe to log: credentials between `://` and `@` are masked.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &self.url[..scheme_end], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/pulsewatch.db?mode=rwc".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// 未知指标自动创建 target 与规则
    #[serde(default = "default_true")]
    pub auto_apply_rule: bool,
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
    #[serde(default = "default_evaluation_timeout_secs")]
    pub evaluation_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// 每日全量重建规则缓存的时刻（UTC 小时）
    #[serde(default = "default_rule_reload_hour")]
    pub rule_reload_hour: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            auto_apply_rule: true,
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            evaluation_timeout_secs: default_evaluation_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            rule_reload_hour: default_rule_reload_hour(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_evaluations() -> usize {
    8
}

fn default_evaluation_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_rule_reload_hour() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// 通知调度周期（秒），0 表示关闭
    #[serde(default = "default_notify_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: i64,
    #[serde(default = "default_pending_time_secs")]
    pub pending_time_secs: i64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            period_secs: default_notify_period_secs(),
            max_retry: default_max_retry(),
            retry_delay_secs: default_retry_delay_secs(),
            pending_time_secs: default_pending_time_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_notify_period_secs() -> u64 {
    60
}

fn default_max_retry() -> u32 {
    3
}

fn default_retry_delay_secs() -> i64 {
    300
}

fn default_pending_time_secs() -> i64 {
    600
}

/// Snowflake id parts of this process; must differ between instances that
/// share a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_id_part")]
    pub machine_id: i32,
    #[serde(default = "default_id_part")]
    pub node_id: i32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            machine_id: default_id_part(),
            node_id: default_id_part(),
        }
    }
}

fn default_id_part() -> i32 {
    1
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.alert.max_concurrent_evaluations == 0 {
            anyhow::bail!("alert.max_concurrent_evaluations must be at least 1");
        }
        if self.alert.rule_reload_hour > 23 {
            anyhow::bail!(
                "alert.rule_reload_hour must be 0-23, got {}",
                self.alert.rule_reload_hour
            );
        }
        if self.notify.retry_delay_secs < 0 || self.notify.pending_time_secs < 0 {
            anyhow::bail!("notify delays must not be negative");
        }
        for (name, part) in [
            ("instance.machine_id", self.instance.machine_id),
            ("instance.node_id", self.instance.node_id),
        ] {
            if !(0..=MAX_ID_PART).contains(&part) {
                anyhow::bail!("{name} must be 0-{MAX_ID_PART}, got {part}");
            }
        }
        Ok(())
    }

    pub fn engine_config(&self) -> AlertEngineConfig {
        AlertEngineConfig {
            auto_apply_rule: self.alert.auto_apply_rule,
            call_timeout: Duration::from_secs(self.alert.call_timeout_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_retry: self.notify.max_retry,
            retry_delay_secs: self.notify.retry_delay_secs,
            pending_time_secs: self.notify.pending_time_secs,
            call_timeout: Duration::from_secs(self.notify.call_timeout_secs),
        }
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.alert.evaluation_timeout_secs)
    }
}

// ---- Seed file types (used by `init-catalog` CLI subcommand) ----

/// Catalog seed. Entries without an `id` get a generated one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub metric_rules: Vec<serde_json::Value>,
    #[serde(default)]
    pub rule_templates: Vec<serde_json::Value>,
    #[serde(default)]
    pub contacts: Vec<serde_json::Value>,
}

