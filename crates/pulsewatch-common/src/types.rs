use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Alert severity, ordered from least to most urgent.
///
/// Parsing accepts both the short names stored in rule state (`crit`, `warn`)
/// and the long names operators tend to type in seed files.
///
/// # Examples
///
/// ```
/// use pulsewatch_common::types::Severity;
///
/// let sev: Severity = "critical".parse().unwrap();
/// assert_eq!(sev, Severity::Crit);
/// assert_eq!(sev.to_string(), "crit");
/// assert!(Severity::Crit > Severity::Warn);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Crit,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Crit => "crit",
        }
    }

    /// Human-facing label used in notification templates.
    pub fn formatted(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warn => "Warning",
            Severity::Crit => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "crit" | "critical" => Ok(Severity::Crit),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// How a rule turns a window of samples into a breach decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    #[default]
    Absolute,
    Amplitude,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Absolute => "absolute",
            DetectionType::Amplitude => "amplitude",
        }
    }

    /// Unknown names fall back to absolute detection.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "absolute" => Ok(DetectionType::Absolute),
            "amplitude" => Ok(DetectionType::Amplitude),
            _ => Err(format!("unknown detection type: {s}")),
        }
    }
}

/// Comparison applied between a scaled sample and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    #[default]
    Gt,
    Lt,
    Gte,
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => "gt",
            CompareOp::Lt => "lt",
            CompareOp::Gte => "gte",
            CompareOp::Lte => "lte",
        }
    }

    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Lte => value <= threshold,
        }
    }

    /// Empty or unknown operators fall back to `gt`.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gt" | ">" | "greater_than" => Ok(CompareOp::Gt),
            "lt" | "<" | "less_than" => Ok(CompareOp::Lt),
            "gte" | ">=" | "greater_equal" => Ok(CompareOp::Gte),
            "lte" | "<=" | "less_equal" => Ok(CompareOp::Lte),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

/// Persisted condition of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[default]
    Normal,
    Alerting,
    Resolved,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Normal => "normal",
            Condition::Alerting => "alerting",
            Condition::Resolved => "resolved",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Condition::Normal),
            "alerting" => Ok(Condition::Alerting),
            "resolved" => Ok(Condition::Resolved),
            _ => Err(format!("unknown rule condition: {s}")),
        }
    }
}

/// Whether notifications for a rule are currently muted by a silence window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactState {
    #[default]
    Normal,
    Silenced,
}

impl ContactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactState::Normal => "normal",
            ContactState::Silenced => "silenced",
        }
    }
}

impl FromStr for ContactState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(ContactState::Normal),
            "silenced" | "silence" => Ok(ContactState::Silenced),
            _ => Err(format!("unknown contact state: {s}")),
        }
    }
}

/// Delivery state shared by triggered events and notify logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyState {
    #[default]
    Pending,
    Sent,
    Solved,
    Processed,
    Delayed,
    Failed,
}

impl NotifyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyState::Pending => "pending",
            NotifyState::Sent => "sent",
            NotifyState::Solved => "solved",
            NotifyState::Processed => "processed",
            NotifyState::Delayed => "delayed",
            NotifyState::Failed => "failed",
        }
    }
}

impl fmt::Display for NotifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotifyState::Pending),
            "sent" => Ok(NotifyState::Sent),
            "solved" => Ok(NotifyState::Solved),
            "processed" => Ok(NotifyState::Processed),
            "delayed" => Ok(NotifyState::Delayed),
            "failed" => Ok(NotifyState::Failed),
            _ => Err(format!("unknown notify state: {s}")),
        }
    }
}

/// Which half of an incident a notification announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Alerting,
    Resolved,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Alerting => "alerting",
            NotifyKind::Resolved => "resolved",
        }
    }

    /// State written to events and logs after a successful send.
    pub fn success_state(&self) -> NotifyState {
        match self {
            NotifyKind::Alerting => NotifyState::Sent,
            NotifyKind::Resolved => NotifyState::Solved,
        }
    }
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alerting" => Ok(NotifyKind::Alerting),
            "resolved" => Ok(NotifyKind::Resolved),
            _ => Err(format!("unknown notify kind: {s}")),
        }
    }
}

/// Concrete notification channel a contact is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Slack,
    Discord,
    Teams,
    Webex,
    Webhook,
    Line,
}

/// Output format a template must produce for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Html,
    Markdown,
    Json,
    Text,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Html => "html",
            MessageFormat::Markdown => "markdown",
            MessageFormat::Json => "json",
            MessageFormat::Text => "text",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChannelType {
    pub const ALL: [ChannelType; 7] = [
        ChannelType::Email,
        ChannelType::Slack,
        ChannelType::Discord,
        ChannelType::Teams,
        ChannelType::Webex,
        ChannelType::Webhook,
        ChannelType::Line,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Slack => "slack",
            ChannelType::Discord => "discord",
            ChannelType::Teams => "teams",
            ChannelType::Webex => "webex",
            ChannelType::Webhook => "webhook",
            ChannelType::Line => "line",
        }
    }

    /// email → html, chat webhooks → markdown, generic webhook → json,
    /// messaging API → plain text.
    pub fn format(&self) -> MessageFormat {
        match self {
            ChannelType::Email => MessageFormat::Html,
            ChannelType::Slack | ChannelType::Discord | ChannelType::Teams | ChannelType::Webex => {
                MessageFormat::Markdown
            }
            ChannelType::Webhook => MessageFormat::Json,
            ChannelType::Line => MessageFormat::Text,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(ChannelType::Email),
            "slack" => Ok(ChannelType::Slack),
            "discord" => Ok(ChannelType::Discord),
            "teams" => Ok(ChannelType::Teams),
            "webex" => Ok(ChannelType::Webex),
            "webhook" => Ok(ChannelType::Webhook),
            "line" => Ok(ChannelType::Line),
            _ => Err(format!("unknown channel type: {s}")),
        }
    }
}

/// One timestamped metric value (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub realm: String,
    pub resource: String,
    pub datasource: String,
    pub timestamp: i64,
}

/// A batch of samples reported for one resource.
///
/// Keys of `data` are `metric` or `metric:partition`; the partition is
/// everything after the first `:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub metadata: PayloadMetadata,
    pub data: BTreeMap<String, Vec<MetricSample>>,
}

/// Splits a payload key into `(metric, partition)`.
///
/// # Examples
///
/// ```
/// use pulsewatch_common::types::split_metric_key;
///
/// assert_eq!(split_metric_key("temp:rack-1:a"), ("temp", "rack-1:a"));
/// assert_eq!(split_metric_key("cpu"), ("cpu", ""));
/// assert_eq!(split_metric_key("cpu:"), ("cpu", ""));
/// ```
pub fn split_metric_key(key: &str) -> (&str, &str) {
    match key.split_once(':') {
        Some((metric, partition)) => (metric, partition),
        None => (key, ""),
    }
}

/// Canonical form of a payload key: `"cpu:"` (empty partition) becomes
/// `"cpu"`, everything else is kept as is.
pub fn normalize_metric_key(key: &str) -> String {
    let (metric, partition) = split_metric_key(key);
    metric_key(metric, partition)
}

/// Builds the payload key a rule answers to.
pub fn metric_key(metric: &str, partition: &str) -> String {
    if partition.is_empty() {
        metric.to_string()
    } else {
        format!("{metric}:{partition}")
    }
}

/// A monitored (realm, resource, partition, datasource) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub realm: String,
    pub resource: String,
    pub partition: String,
    pub datasource: String,
    pub category: String,
    /// Seconds between two consecutive samples, 0 when unknown.
    pub collection_interval: i64,
    /// Seconds covered by one report, 0 when unknown.
    pub reporting_interval: i64,
    pub created_by: String,
    pub created_at: i64,
}

/// Up to three severity thresholds; crit is the only one operators must set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub info: Option<f64>,
    #[serde(default)]
    pub warn: Option<f64>,
    #[serde(default)]
    pub crit: Option<f64>,
}

impl Thresholds {
    pub fn get(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::Info => self.info,
            Severity::Warn => self.warn,
            Severity::Crit => self.crit,
        }
    }

    /// Active thresholds in evaluation priority order (crit first).
    ///
    /// A threshold of 0 or below counts as unset, so catalog rows that store
    /// 0 for "no threshold" never match.
    pub fn by_priority(&self) -> impl Iterator<Item = (Severity, f64)> {
        [
            (Severity::Crit, self.crit),
            (Severity::Warn, self.warn),
            (Severity::Info, self.info),
        ]
        .into_iter()
        .filter_map(|(sev, t)| t.filter(|t| *t > 0.0).map(|t| (sev, t)))
    }
}

/// Catalog definition of a metric and how it is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub detection_type: DetectionType,
    pub metric_raw_name: String,
    #[serde(default)]
    pub metric_display_name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub operator: CompareOp,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Datasources this definition applies to; empty means all.
    #[serde(default)]
    pub match_datasource_names: Vec<String>,
}

fn default_scale() -> f64 {
    1.0
}

impl MetricRuleDefinition {
    pub fn matches_datasource(&self, datasource: &str) -> bool {
        self.match_datasource_names.is_empty()
            || self.match_datasource_names.iter().any(|d| d == datasource)
    }
}

/// Operator-authored defaults used to instantiate rules on new targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub id: String,
    pub realm: String,
    pub name: String,
    /// Empty matches every datasource.
    #[serde(default)]
    pub datasource: String,
    pub metric_rule_id: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub times: u32,
    #[serde(default)]
    pub silence_period: String,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A rule bound to a target, carrying the evaluation fields of its metric
/// definition so detection never needs a catalog round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub realm: String,
    pub name: String,
    pub target_id: String,
    pub resource: String,
    pub partition: String,
    pub datasource: String,
    pub metric_rule_id: String,
    pub metric_raw_name: String,
    pub metric_display_name: String,
    pub category: String,
    pub unit: String,
    pub detection_type: DetectionType,
    pub scale: f64,
    pub operator: CompareOp,
    pub duration: String,
    pub times: u32,
    pub silence_period: String,
    pub thresholds: Thresholds,
    pub enabled: bool,
    pub auto_apply: bool,
    pub create_type: String,
    pub created_by: String,
    pub created_at: i64,
}

impl Rule {
    /// Payload key this rule answers to (`raw_name[:partition]`).
    pub fn metric_key(&self) -> String {
        metric_key(&self.metric_raw_name, &self.partition)
    }

    /// Cache key (`metric_rule_id[:partition]`).
    pub fn cache_key(&self) -> String {
        metric_key(&self.metric_rule_id, &self.partition)
    }

    pub fn display_name(&self) -> &str {
        if self.metric_display_name.is_empty() {
            &self.metric_raw_name
        } else {
            &self.metric_display_name
        }
    }
}

/// Per-rule evaluation state, one row per rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    pub rule_id: String,
    pub condition: Condition,
    pub last_check_value: f64,
    pub last_triggered_value: Option<f64>,
    pub last_triggered_severity: Option<Severity>,
    pub last_triggered_at: Option<i64>,
    pub first_triggered_at: Option<i64>,
    pub notify_counter: u32,
    pub silence_start: Option<i64>,
    pub silence_end: Option<i64>,
    pub contact_state: ContactState,
    pub triggered_event_id: Option<String>,
    /// Optimistic concurrency token; 0 means the row was never stored.
    pub version: i64,
    pub updated_at: i64,
}

impl RuleState {
    pub fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            condition: Condition::Normal,
            last_check_value: 0.0,
            last_triggered_value: None,
            last_triggered_severity: None,
            last_triggered_at: None,
            first_triggered_at: None,
            notify_counter: 0,
            silence_start: None,
            silence_end: None,
            contact_state: ContactState::Normal,
            triggered_event_id: None,
            version: 0,
            updated_at: 0,
        }
    }

    /// `silence_start <= now < silence_end`.
    pub fn in_silence(&self, now: i64) -> bool {
        match (self.silence_start, self.silence_end) {
            (Some(start), Some(end)) => start <= now && now < end,
            _ => false,
        }
    }
}

/// One incident of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredEvent {
    pub id: String,
    pub realm: String,
    pub rule_id: String,
    pub resource: String,
    pub partition: String,
    pub metric_raw_name: String,
    pub metric_display_name: String,
    pub category: String,
    pub rule_snapshot: Value,
    pub state_snapshot: Value,
    pub triggered_value: f64,
    /// Threshold of the breached severity at trigger time.
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub triggered_at: i64,
    pub first_triggered_at: i64,
    pub last_triggered_at: i64,
    pub notify_state: NotifyState,
    pub resolved_at: Option<i64>,
    pub resolved_value: Option<f64>,
    pub resolved_notify_state: Option<NotifyState>,
}

impl TriggeredEvent {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub realm: String,
    pub name: String,
    pub channel_type: ChannelType,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Severities this contact is notified about; empty means none.
    #[serde(default)]
    pub severities: Vec<Severity>,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub max_retry: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<i64>,
}

impl Contact {
    pub fn subscribes(&self, severity: Severity) -> bool {
        self.severities.contains(&severity)
    }
}

/// Structured failure detail kept on a notify log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyErrorDetail {
    pub time: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub retry: u32,
}

/// One dispatch of a batch of events to one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyLog {
    pub id: String,
    pub realm: String,
    pub kind: NotifyKind,
    pub state: NotifyState,
    pub contact_id: String,
    pub channel_type: ChannelType,
    pub contact_snapshot: Value,
    pub triggered_event_ids: Vec<String>,
    pub retry_counter: u32,
    pub last_retry_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub error: Option<NotifyErrorDetail>,
    /// Set once the retry budget is spent; the log is never retried again.
    pub exhausted: bool,
    pub created_at: i64,
}
