//! Row ids for everything the pipeline writes: targets, provisioned rules,
//! triggered events and notify logs.
//!
//! Ids are snowflakes rendered as decimal strings, so they sort by creation
//! time and fit the `TEXT` primary keys of the alert store. Several server
//! instances sharing one database must run with distinct
//! `(machine_id, node_id)` pairs (`[instance]` in the server config).

use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

/// Largest machine or node part a snowflake can carry (5 bits each).
pub const MAX_ID_PART: i32 = 31;

static BUCKET: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Binds this process to `(machine_id, node_id)`. Parts outside
/// `0..=MAX_ID_PART` are clamped; the server config rejects them first.
///
/// Ids are still generated without a call to `init`, as instance `(1, 1)`.
pub fn init(machine_id: i32, node_id: i32) {
    let mut bucket = BUCKET
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *bucket = Some(SnowflakeIdBucket::new(
        machine_id.clamp(0, MAX_ID_PART),
        node_id.clamp(0, MAX_ID_PART),
    ));
}

pub fn next_id() -> String {
    let mut bucket = BUCKET
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    bucket
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn event_ids_never_repeat_within_a_flush_sized_burst() {
        let ids: HashSet<String> = (0..1000).map(|_| next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_grow_with_creation_order() {
        let first: i64 = next_id().parse().unwrap();
        let second: i64 = next_id().parse().unwrap();
        assert!(second > first);
    }
}
