use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_alert_pipeline_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 按依赖顺序建表
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS metric_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL DEFAULT '',
    detection_type TEXT NOT NULL DEFAULT 'absolute',
    metric_raw_name TEXT NOT NULL,
    metric_display_name TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    scale REAL NOT NULL DEFAULT 1.0,
    operator TEXT NOT NULL DEFAULT 'gt',
    duration TEXT NOT NULL DEFAULT '',
    info_threshold REAL,
    warn_threshold REAL,
    crit_threshold REAL,
    match_datasource_names TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metric_rules_raw_name ON metric_rules(metric_raw_name);

CREATE TABLE IF NOT EXISTS rule_templates (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    name TEXT NOT NULL,
    datasource TEXT NOT NULL DEFAULT '',
    metric_rule_id TEXT NOT NULL,
    info_threshold REAL,
    warn_threshold REAL,
    crit_threshold REAL,
    duration TEXT NOT NULL DEFAULT '',
    times INTEGER NOT NULL DEFAULT 0,
    silence_period TEXT NOT NULL DEFAULT '',
    auto_apply INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    UNIQUE (realm, name)
);
CREATE INDEX IF NOT EXISTS idx_rule_templates_lookup ON rule_templates(realm, auto_apply, enabled);

CREATE TABLE IF NOT EXISTS targets (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    resource TEXT NOT NULL,
    partition_name TEXT NOT NULL DEFAULT '',
    datasource TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    collection_interval INTEGER NOT NULL DEFAULT 0,
    reporting_interval INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    UNIQUE (realm, datasource, resource, partition_name)
);

CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    name TEXT NOT NULL,
    target_id TEXT NOT NULL,
    resource TEXT NOT NULL,
    partition_name TEXT NOT NULL DEFAULT '',
    datasource TEXT NOT NULL,
    metric_rule_id TEXT NOT NULL,
    metric_raw_name TEXT NOT NULL,
    metric_display_name TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    detection_type TEXT NOT NULL DEFAULT 'absolute',
    scale REAL NOT NULL DEFAULT 1.0,
    operator TEXT NOT NULL DEFAULT 'gt',
    duration TEXT NOT NULL DEFAULT '',
    times INTEGER NOT NULL DEFAULT 1,
    silence_period TEXT NOT NULL DEFAULT '',
    info_threshold REAL,
    warn_threshold REAL,
    crit_threshold REAL,
    enabled INTEGER NOT NULL DEFAULT 1,
    auto_apply INTEGER NOT NULL DEFAULT 0,
    create_type TEXT NOT NULL DEFAULT 'user',
    created_by TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_resource ON rules(realm, resource, enabled);
CREATE INDEX IF NOT EXISTS idx_rules_target ON rules(realm, resource, partition_name);

CREATE TABLE IF NOT EXISTS rule_states (
    rule_id TEXT PRIMARY KEY NOT NULL,
    condition TEXT NOT NULL DEFAULT 'normal',
    last_check_value REAL NOT NULL DEFAULT 0,
    last_triggered_value REAL,
    last_triggered_severity TEXT,
    last_triggered_at INTEGER,
    first_triggered_at INTEGER,
    notify_counter INTEGER NOT NULL DEFAULT 0,
    silence_start INTEGER,
    silence_end INTEGER,
    contact_state TEXT NOT NULL DEFAULT 'normal',
    triggered_event_id TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS triggered_events (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    resource TEXT NOT NULL,
    partition_name TEXT NOT NULL DEFAULT '',
    metric_raw_name TEXT NOT NULL,
    metric_display_name TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    rule_snapshot TEXT NOT NULL,
    state_snapshot TEXT NOT NULL,
    triggered_value REAL NOT NULL,
    threshold REAL,
    severity TEXT NOT NULL,
    triggered_at INTEGER NOT NULL,
    first_triggered_at INTEGER NOT NULL,
    last_triggered_at INTEGER NOT NULL,
    notify_state TEXT NOT NULL DEFAULT 'pending',
    resolved_at INTEGER,
    resolved_value REAL,
    resolved_notify_state TEXT
);
CREATE INDEX IF NOT EXISTS idx_triggered_events_rule ON triggered_events(rule_id);
CREATE INDEX IF NOT EXISTS idx_triggered_events_notify ON triggered_events(notify_state, triggered_at);
CREATE INDEX IF NOT EXISTS idx_triggered_events_resolved ON triggered_events(resolved_notify_state);

CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    name TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    config_json TEXT NOT NULL DEFAULT '{}',
    enabled INTEGER NOT NULL DEFAULT 1,
    severities TEXT NOT NULL DEFAULT '[]',
    auto_apply INTEGER NOT NULL DEFAULT 0,
    max_retry INTEGER,
    retry_delay_secs INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE (realm, name)
);

CREATE TABLE IF NOT EXISTS rule_contacts (
    rule_id TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (rule_id, contact_id)
);
CREATE INDEX IF NOT EXISTS idx_rule_contacts_contact ON rule_contacts(contact_id);

CREATE TABLE IF NOT EXISTS notify_logs (
    id TEXT PRIMARY KEY NOT NULL,
    realm TEXT NOT NULL,
    kind TEXT NOT NULL,
    state TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    contact_snapshot TEXT NOT NULL,
    triggered_event_ids TEXT NOT NULL,
    retry_counter INTEGER NOT NULL DEFAULT 0,
    last_retry_at INTEGER,
    sent_at INTEGER,
    error_detail TEXT,
    exhausted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notify_logs_state ON notify_logs(state, exhausted);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS notify_logs;
DROP TABLE IF EXISTS rule_contacts;
DROP TABLE IF EXISTS contacts;
DROP TABLE IF EXISTS triggered_events;
DROP TABLE IF EXISTS rule_states;
DROP TABLE IF EXISTS rules;
DROP TABLE IF EXISTS targets;
DROP TABLE IF EXISTS rule_templates;
DROP TABLE IF EXISTS metric_rules;
";
