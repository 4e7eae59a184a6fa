use pulsewatch_common::types::Rule;
use pulsewatch_storage::{Result, RuleCatalog};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// (realm, resource)
type ResourceKey = (String, String);

/// CRUD operation reported by the catalog or contact registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// In-memory index of enabled rules by resource and cache key.
///
/// Readers never observe a partially rebuilt index: [`RuleCache::rebuild`]
/// loads everything first and swaps the map in one write.
#[derive(Default)]
pub struct RuleCache {
    inner: RwLock<HashMap<ResourceKey, HashMap<String, Vec<Rule>>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, HashMap<String, Vec<Rule>>>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, HashMap<String, Vec<Rule>>>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn insert(map: &mut HashMap<ResourceKey, HashMap<String, Vec<Rule>>>, rule: Rule) {
        map.entry((rule.realm.clone(), rule.resource.clone()))
            .or_default()
            .entry(rule.cache_key())
            .or_default()
            .push(rule);
    }

    /// Reloads every enabled rule from the catalog. On error the previous
    /// index is kept.
    pub async fn rebuild(&self, catalog: &dyn RuleCatalog) -> Result<usize> {
        let rules = catalog.all_enabled_rules().await?;
        let count = rules.len();
        let mut fresh = HashMap::new();
        for rule in rules {
            Self::insert(&mut fresh, rule);
        }
        *self.write() = fresh;
        tracing::info!(rules = count, "Rule cache rebuilt");
        Ok(count)
    }

    /// Cached rules of (realm, resource) whose payload key is in `keys`.
    pub fn lookup<'a, I>(&self, realm: &str, resource: &str, keys: I) -> Vec<Rule>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let map = self.read();
        let Some(by_key) = map.get(&(realm.to_string(), resource.to_string())) else {
            return Vec::new();
        };
        let wanted: Vec<&str> = keys.into_iter().collect();
        by_key
            .values()
            .flatten()
            .filter(|r| wanted.contains(&r.metric_key().as_str()))
            .cloned()
            .collect()
    }

    /// Applies a single rule change without a full rebuild.
    pub fn apply(&self, rule: &Rule, change: ChangeOp) {
        let mut map = self.write();
        for by_key in map.values_mut() {
            for rules in by_key.values_mut() {
                rules.retain(|r| r.id != rule.id);
            }
            by_key.retain(|_, rules| !rules.is_empty());
        }
        map.retain(|_, by_key| !by_key.is_empty());

        if change != ChangeOp::Delete && rule.enabled {
            Self::insert(&mut map, rule.clone());
        }
    }

    /// Number of cached rules.
    pub fn len(&self) -> usize {
        self.read()
            .values()
            .flat_map(|by_key| by_key.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
