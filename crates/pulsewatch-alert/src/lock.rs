use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-rule mutual exclusion for evaluations running in the same process.
///
/// Cross-process safety comes from the versioned state write; this only
/// avoids wasted conflicts between local workers.
#[derive(Default)]
pub struct RuleLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, rule_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // 清理无人持有的锁，避免表无限增长
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(rule_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
