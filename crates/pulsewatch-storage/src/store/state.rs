use async_trait::async_trait;
use pulsewatch_common::types::{NotifyKind, NotifyState, RuleState, Severity, TriggeredEvent};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, SqlErr};

use crate::entities::{rule_state, triggered_event};
use crate::error::{Result, StorageError};
use crate::store::{parse_column, AlertStore};
use crate::StateStore;

const PENDING_STATES: [&str; 2] = ["pending", "failed"];

fn to_state(m: rule_state::Model) -> Result<RuleState> {
    let severity = match m.last_triggered_severity.as_deref() {
        Some(s) => Some(parse_column::<Severity>("last_triggered_severity", s)?),
        None => None,
    };
    Ok(RuleState {
        rule_id: m.rule_id,
        condition: parse_column("condition", &m.condition)?,
        last_check_value: m.last_check_value,
        last_triggered_value: m.last_triggered_value,
        last_triggered_severity: severity,
        last_triggered_at: m.last_triggered_at,
        first_triggered_at: m.first_triggered_at,
        notify_counter: m.notify_counter.max(0) as u32,
        silence_start: m.silence_start,
        silence_end: m.silence_end,
        contact_state: parse_column("contact_state", &m.contact_state)?,
        triggered_event_id: m.triggered_event_id,
        version: m.version,
        updated_at: m.updated_at,
    })
}

fn state_active_model(s: &RuleState, version: i64) -> rule_state::ActiveModel {
    rule_state::ActiveModel {
        rule_id: Set(s.rule_id.clone()),
        condition: Set(s.condition.to_string()),
        last_check_value: Set(s.last_check_value),
        last_triggered_value: Set(s.last_triggered_value),
        last_triggered_severity: Set(s.last_triggered_severity.map(|v| v.to_string())),
        last_triggered_at: Set(s.last_triggered_at),
        first_triggered_at: Set(s.first_triggered_at),
        notify_counter: Set(s.notify_counter as i32),
        silence_start: Set(s.silence_start),
        silence_end: Set(s.silence_end),
        contact_state: Set(s.contact_state.as_str().to_string()),
        triggered_event_id: Set(s.triggered_event_id.clone()),
        version: Set(version),
        updated_at: Set(s.updated_at),
    }
}

fn to_event(m: triggered_event::Model) -> Result<TriggeredEvent> {
    let resolved_notify_state = match m.resolved_notify_state.as_deref() {
        Some(s) => Some(parse_column::<NotifyState>("resolved_notify_state", s)?),
        None => None,
    };
    Ok(TriggeredEvent {
        id: m.id,
        realm: m.realm,
        rule_id: m.rule_id,
        resource: m.resource,
        partition: m.partition_name,
        metric_raw_name: m.metric_raw_name,
        metric_display_name: m.metric_display_name,
        category: m.category,
        rule_snapshot: serde_json::from_str(&m.rule_snapshot)?,
        state_snapshot: serde_json::from_str(&m.state_snapshot)?,
        triggered_value: m.triggered_value,
        threshold: m.threshold,
        severity: parse_column("severity", &m.severity)?,
        triggered_at: m.triggered_at,
        first_triggered_at: m.first_triggered_at,
        last_triggered_at: m.last_triggered_at,
        notify_state: parse_column("notify_state", &m.notify_state)?,
        resolved_at: m.resolved_at,
        resolved_value: m.resolved_value,
        resolved_notify_state,
    })
}

fn event_active_model(e: &TriggeredEvent) -> Result<triggered_event::ActiveModel> {
    Ok(triggered_event::ActiveModel {
        id: Set(e.id.clone()),
        realm: Set(e.realm.clone()),
        rule_id: Set(e.rule_id.clone()),
        resource: Set(e.resource.clone()),
        partition_name: Set(e.partition.clone()),
        metric_raw_name: Set(e.metric_raw_name.clone()),
        metric_display_name: Set(e.metric_display_name.clone()),
        category: Set(e.category.clone()),
        rule_snapshot: Set(serde_json::to_string(&e.rule_snapshot)?),
        state_snapshot: Set(serde_json::to_string(&e.state_snapshot)?),
        triggered_value: Set(e.triggered_value),
        threshold: Set(e.threshold),
        severity: Set(e.severity.to_string()),
        triggered_at: Set(e.triggered_at),
        first_triggered_at: Set(e.first_triggered_at),
        last_triggered_at: Set(e.last_triggered_at),
        notify_state: Set(e.notify_state.to_string()),
        resolved_at: Set(e.resolved_at),
        resolved_value: Set(e.resolved_value),
        resolved_notify_state: Set(e.resolved_notify_state.map(|s| s.to_string())),
    })
}

fn to_events(rows: Vec<triggered_event::Model>) -> Result<Vec<TriggeredEvent>> {
    rows.into_iter().map(to_event).collect()
}

#[async_trait]
impl StateStore for AlertStore {
    async fn state_for_update(&self, rule_id: &str) -> Result<RuleState> {
        Ok(self
            .get_state(rule_id)
            .await?
            .unwrap_or_else(|| RuleState::new(rule_id)))
    }

    async fn get_state(&self, rule_id: &str) -> Result<Option<RuleState>> {
        let model = rule_state::Entity::find_by_id(rule_id)
            .one(self.db())
            .await?;
        model.map(to_state).transpose()
    }

    async fn save_state(&self, old: &RuleState, new: &RuleState) -> Result<RuleState> {
        let version = old.version + 1;
        let am = state_active_model(new, version);

        if old.version == 0 {
            // 首次写入：主键冲突说明另一次评估抢先创建了该行
            if let Err(e) = rule_state::Entity::insert(am).exec(self.db()).await {
                return match e.sql_err() {
                    Some(SqlErr::UniqueConstraintViolation(_)) => Err(StorageError::Conflict {
                        entity: "rule_state",
                        id: new.rule_id.clone(),
                    }),
                    _ => Err(e.into()),
                };
            }
        } else {
            let res = rule_state::Entity::update_many()
                .set(am)
                .filter(rule_state::Column::RuleId.eq(new.rule_id.as_str()))
                .filter(rule_state::Column::Version.eq(old.version))
                .exec(self.db())
                .await?;
            if res.rows_affected == 0 {
                return Err(StorageError::Conflict {
                    entity: "rule_state",
                    id: new.rule_id.clone(),
                });
            }
        }

        let mut stored = new.clone();
        stored.version = version;
        Ok(stored)
    }

    async fn update_last_check_value(&self, rule_id: &str, value: f64, now: i64) -> Result<()> {
        let res = rule_state::Entity::update_many()
            .col_expr(rule_state::Column::LastCheckValue, Expr::value(value))
            .col_expr(rule_state::Column::UpdatedAt, Expr::value(now))
            .filter(rule_state::Column::RuleId.eq(rule_id))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: "rule_state",
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_triggered_event(&self, event: &TriggeredEvent) -> Result<()> {
        triggered_event::Entity::insert(event_active_model(event)?)
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn update_triggered_event(&self, event: &TriggeredEvent) -> Result<()> {
        // 只写事件本身的列，notify_state 由 dispatcher 维护
        let incident = triggered_event::ActiveModel {
            last_triggered_at: Set(event.last_triggered_at),
            triggered_value: Set(event.triggered_value),
            severity: Set(event.severity.to_string()),
            threshold: Set(event.threshold),
            state_snapshot: Set(serde_json::to_string(&event.state_snapshot)?),
            ..Default::default()
        };
        let res = triggered_event::Entity::update_many()
            .set(incident)
            .filter(triggered_event::Column::Id.eq(event.id.as_str()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: "triggered_event",
                id: event.id.clone(),
            });
        }
        Ok(())
    }

    async fn resolve_triggered_event(
        &self,
        id: &str,
        resolved_at: i64,
        resolved_value: f64,
    ) -> Result<bool> {
        let res = triggered_event::Entity::update_many()
            .col_expr(triggered_event::Column::ResolvedAt, Expr::value(resolved_at))
            .col_expr(triggered_event::Column::ResolvedValue, Expr::value(resolved_value))
            .col_expr(
                triggered_event::Column::ResolvedNotifyState,
                Expr::value(NotifyState::Pending.as_str()),
            )
            .filter(triggered_event::Column::Id.eq(id))
            .filter(triggered_event::Column::ResolvedAt.is_null())
            .exec(self.db())
            .await?;
        if res.rows_affected > 0 {
            return Ok(true);
        }
        let exists = triggered_event::Entity::find_by_id(id)
            .one(self.db())
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StorageError::NotFound {
                entity: "triggered_event",
                id: id.to_string(),
            })
        }
    }

    async fn get_triggered_event(&self, id: &str) -> Result<Option<TriggeredEvent>> {
        let model = triggered_event::Entity::find_by_id(id)
            .one(self.db())
            .await?;
        model.map(to_event).transpose()
    }

    async fn open_triggered_event(&self, rule_id: &str) -> Result<Option<TriggeredEvent>> {
        let model = triggered_event::Entity::find()
            .filter(triggered_event::Column::RuleId.eq(rule_id))
            .filter(triggered_event::Column::ResolvedAt.is_null())
            .order_by_desc(triggered_event::Column::TriggeredAt)
            .one(self.db())
            .await?;
        model.map(to_event).transpose()
    }

    async fn triggered_events_by_ids(&self, ids: &[String]) -> Result<Vec<TriggeredEvent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = triggered_event::Entity::find()
            .filter(triggered_event::Column::Id.is_in(ids.iter().cloned()))
            .order_by_asc(triggered_event::Column::TriggeredAt)
            .all(self.db())
            .await?;
        to_events(rows)
    }

    async fn pending_events(&self, triggered_before: i64) -> Result<Vec<TriggeredEvent>> {
        let rows = triggered_event::Entity::find()
            .filter(triggered_event::Column::NotifyState.is_in(PENDING_STATES))
            .filter(triggered_event::Column::TriggeredAt.lt(triggered_before))
            .filter(triggered_event::Column::ResolvedAt.is_null())
            .order_by_asc(triggered_event::Column::TriggeredAt)
            .all(self.db())
            .await?;
        to_events(rows)
    }

    async fn resolved_unnotified(&self, now: i64) -> Result<Vec<TriggeredEvent>> {
        let rows = triggered_event::Entity::find()
            .filter(triggered_event::Column::ResolvedAt.lte(now))
            .filter(triggered_event::Column::ResolvedNotifyState.is_in(PENDING_STATES))
            .order_by_asc(triggered_event::Column::ResolvedAt)
            .all(self.db())
            .await?;
        to_events(rows)
    }

    async fn set_notify_state(
        &self,
        ids: &[String],
        kind: NotifyKind,
        state: NotifyState,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let column = match kind {
            NotifyKind::Alerting => triggered_event::Column::NotifyState,
            NotifyKind::Resolved => triggered_event::Column::ResolvedNotifyState,
        };
        triggered_event::Entity::update_many()
            .col_expr(column, Expr::value(state.as_str()))
            .filter(triggered_event::Column::Id.is_in(ids.iter().cloned()))
            .exec(self.db())
            .await?;
        Ok(())
    }
}
