use async_trait::async_trait;
use pulsewatch_common::types::{NotifyErrorDetail, NotifyKind, NotifyLog, NotifyState};
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::collections::HashSet;

use crate::entities::notify_log;
use crate::error::{Result, StorageError};
use crate::store::{parse_column, AlertStore};
use crate::NotifyLogStore;

fn to_log(m: notify_log::Model) -> Result<NotifyLog> {
    let error = match m.error_detail.as_deref() {
        Some(raw) => Some(serde_json::from_str::<NotifyErrorDetail>(raw)?),
        None => None,
    };
    Ok(NotifyLog {
        id: m.id,
        realm: m.realm,
        kind: parse_column("kind", &m.kind)?,
        state: parse_column("state", &m.state)?,
        contact_id: m.contact_id,
        channel_type: parse_column("channel_type", &m.channel_type)?,
        contact_snapshot: serde_json::from_str(&m.contact_snapshot)?,
        triggered_event_ids: serde_json::from_str(&m.triggered_event_ids)?,
        retry_counter: m.retry_counter.max(0) as u32,
        last_retry_at: m.last_retry_at,
        sent_at: m.sent_at,
        error,
        exhausted: m.exhausted,
        created_at: m.created_at,
    })
}

fn log_active_model(l: &NotifyLog) -> Result<notify_log::ActiveModel> {
    let error_detail = match &l.error {
        Some(detail) => Some(serde_json::to_string(detail)?),
        None => None,
    };
    Ok(notify_log::ActiveModel {
        id: Set(l.id.clone()),
        realm: Set(l.realm.clone()),
        kind: Set(l.kind.to_string()),
        state: Set(l.state.to_string()),
        contact_id: Set(l.contact_id.clone()),
        channel_type: Set(l.channel_type.to_string()),
        contact_snapshot: Set(serde_json::to_string(&l.contact_snapshot)?),
        triggered_event_ids: Set(serde_json::to_string(&l.triggered_event_ids)?),
        retry_counter: Set(l.retry_counter as i32),
        last_retry_at: Set(l.last_retry_at),
        sent_at: Set(l.sent_at),
        error_detail: Set(error_detail),
        exhausted: Set(l.exhausted),
        created_at: Set(l.created_at),
    })
}

#[async_trait]
impl NotifyLogStore for AlertStore {
    async fn create_notify_log(&self, log: &NotifyLog) -> Result<()> {
        notify_log::Entity::insert(log_active_model(log)?)
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn update_notify_log(&self, log: &NotifyLog) -> Result<()> {
        let res = notify_log::Entity::update_many()
            .set(log_active_model(log)?)
            .filter(notify_log::Column::Id.eq(log.id.as_str()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: "notify_log",
                id: log.id.clone(),
            });
        }
        Ok(())
    }

    async fn failed_notify_logs(&self) -> Result<Vec<NotifyLog>> {
        let rows = notify_log::Entity::find()
            .filter(notify_log::Column::State.eq(NotifyState::Failed.as_str()))
            .filter(notify_log::Column::Exhausted.eq(false))
            .order_by_asc(notify_log::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_log).collect()
    }

    async fn failed_log_event_ids(&self, kind: NotifyKind) -> Result<HashSet<String>> {
        // 只取 id 列，不反序列化整条日志
        let rows: Vec<String> = notify_log::Entity::find()
            .select_only()
            .column(notify_log::Column::TriggeredEventIds)
            .filter(notify_log::Column::State.eq(NotifyState::Failed.as_str()))
            .filter(notify_log::Column::Kind.eq(kind.as_str()))
            .into_tuple()
            .all(self.db())
            .await?;
        let mut ids = HashSet::new();
        for raw in rows {
            ids.extend(serde_json::from_str::<Vec<String>>(&raw)?);
        }
        Ok(ids)
    }

    async fn get_notify_log(&self, id: &str) -> Result<Option<NotifyLog>> {
        let model = notify_log::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_log).transpose()
    }
}
