use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use super::token::GateTokenRecord;

/// Live registry of issued gate tokens, keyed by the secure token string.
///
/// A token is valid only while its entry is present. Entries are removed on
/// first successful validation (`consume`) or by the expiry sweep. The map
/// is shared by cloning; all clones see the same entries.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    entries: Arc<DashMap<String, GateTokenRecord>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, record: GateTokenRecord) {
        self.entries.insert(record.token.clone(), record);
    }

    /// Atomically remove and return the record for `token`.
    ///
    /// `DashMap::remove` is the single-use enforcement point: under
    /// concurrent validation exactly one caller gets `Some`, every other
    /// caller gets `None`.
    pub fn consume(&self, token: &str) -> Option<GateTokenRecord> {
        self.entries.remove(token).map(|(_, record)| record)
    }

    /// Remove all expired entries. Called opportunistically on every issue
    /// and validate, and periodically from the background sweep job.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, record| record.expires_at > now);
        before - self.entries.len()
    }

    /// Current number of live tokens (for metrics / debugging).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::token::GateDirection;
    use chrono::Duration;

    fn record(token: &str, ttl_secs: i64) -> GateTokenRecord {
        let now = Utc::now();
        GateTokenRecord {
            token: token.to_string(),
            station_id: "miyapur".into(),
            station_code: "MYP".into(),
            rider_id: "rider-1".into(),
            direction: GateDirection::Entry,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            journey_id: None,
        }
    }

    #[test]
    fn test_consume_is_single_use() {
        let registry = TokenRegistry::new();
        registry.insert(record("tok-a", 300));
        assert!(registry.consume("tok-a").is_some());
        assert!(registry.consume("tok-a").is_none());
    }

    #[test]
    fn test_evict_expired_removes_only_stale_entries() {
        let registry = TokenRegistry::new();
        registry.insert(record("live", 300));
        registry.insert(record("stale", -1));
        let evicted = registry.evict_expired();
        assert_eq!(evicted, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.consume("live").is_some());
    }

    #[test]
    fn test_concurrent_consume_has_one_winner() {
        let registry = TokenRegistry::new();
        registry.insert(record("contested", 300));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = registry.clone();
            handles.push(std::thread::spawn(move || reg.consume("contested").is_some()));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }
}
