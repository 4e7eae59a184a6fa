use async_trait::async_trait;
use pulsewatch_common::types::Contact;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};

use crate::entities::{contact, rule_contact};
use crate::error::Result;
use crate::store::{parse_column, AlertStore};
use crate::ContactRegistry;

fn to_contact(m: contact::Model) -> Result<Contact> {
    Ok(Contact {
        id: m.id,
        realm: m.realm,
        name: m.name,
        channel_type: parse_column("channel_type", &m.channel_type)?,
        config: serde_json::from_str(&m.config_json)?,
        enabled: m.enabled,
        severities: serde_json::from_str(&m.severities)?,
        auto_apply: m.auto_apply,
        max_retry: m.max_retry.map(|v| v.max(0) as u32),
        retry_delay_secs: m.retry_delay_secs,
    })
}

impl AlertStore {
    pub async fn insert_contact(&self, c: &Contact) -> Result<()> {
        let am = contact::ActiveModel {
            id: Set(c.id.clone()),
            realm: Set(c.realm.clone()),
            name: Set(c.name.clone()),
            channel_type: Set(c.channel_type.to_string()),
            config_json: Set(serde_json::to_string(&c.config)?),
            enabled: Set(c.enabled),
            severities: Set(serde_json::to_string(&c.severities)?),
            auto_apply: Set(c.auto_apply),
            max_retry: Set(c.max_retry.map(|v| v as i32)),
            retry_delay_secs: Set(c.retry_delay_secs),
            created_at: Set(chrono::Utc::now().timestamp()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn contact_by_name(&self, realm: &str, name: &str) -> Result<Option<Contact>> {
        let model = contact::Entity::find()
            .filter(contact::Column::Realm.eq(realm))
            .filter(contact::Column::Name.eq(name))
            .one(self.db())
            .await?;
        model.map(to_contact).transpose()
    }
}

#[async_trait]
impl ContactRegistry for AlertStore {
    async fn contacts_for_rule(&self, rule_id: &str) -> Result<Vec<Contact>> {
        let bindings = rule_contact::Entity::find()
            .filter(rule_contact::Column::RuleId.eq(rule_id))
            .all(self.db())
            .await?;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = bindings.into_iter().map(|b| b.contact_id).collect();
        let rows = contact::Entity::find()
            .filter(contact::Column::Id.is_in(ids))
            .order_by_asc(contact::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_contact).collect()
    }

    async fn auto_apply_contacts(&self, realm: &str) -> Result<Vec<Contact>> {
        let rows = contact::Entity::find()
            .filter(contact::Column::Realm.eq(realm))
            .filter(contact::Column::Enabled.eq(true))
            .filter(contact::Column::AutoApply.eq(true))
            .order_by_asc(contact::Column::CreatedAt)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_contact).collect()
    }

    async fn bind_contact_to_rule(&self, rule_id: &str, contact_id: &str) -> Result<()> {
        let existing = rule_contact::Entity::find()
            .filter(rule_contact::Column::RuleId.eq(rule_id))
            .filter(rule_contact::Column::ContactId.eq(contact_id))
            .count(self.db())
            .await?;
        if existing > 0 {
            return Ok(());
        }
        let am = rule_contact::ActiveModel {
            rule_id: Set(rule_id.to_string()),
            contact_id: Set(contact_id.to_string()),
            created_at: Set(chrono::Utc::now().timestamp()),
        };
        rule_contact::Entity::insert(am).exec(self.db()).await?;
        Ok(())
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        let model = contact::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_contact).transpose()
    }
}
