use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{StoreResult, StoredTokenRecord, TokenStore};

#[derive(Debug, Clone)]
struct StoredEntry {
    record: StoredTokenRecord,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(record: StoredTokenRecord, ttl: Option<Duration>) -> Self {
        Self {
            record,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

/// Single-process token store. `take` relies on `DashMap::remove`, which
/// holds the shard lock for the whole get-and-delete.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    // key -> entry
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;

        self.entries.retain(|key, entry| {
            if entry.is_expired() {
                log::debug!("Cleaned up expired token record: {}", key);
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            log::info!("Cleaned up {} expired token records", removed);
        }

        removed
    }

    pub fn record_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.record.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::new(record.clone(), ttl));
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired() {
                    return Ok(false);
                }
                slot.insert(StoredEntry::new(record.clone(), ttl));
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredEntry::new(record.clone(), ttl));
            }
        }
        Ok(true)
    }

    async fn replace(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<StoredTokenRecord>> {
        Ok(self
            .entries
            .insert(key.to_string(), StoredEntry::new(record.clone(), ttl))
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.record))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &StoredTokenRecord) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, entry| &entry.record == expected && !entry.is_expired())
            .is_some())
    }

    async fn take(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>> {
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(_, entry)| entry.record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Role, UserId};

    fn code_record() -> StoredTokenRecord {
        StoredTokenRecord::AuthorizationCode {
            user_id: UserId::new(),
            role: Role::Member,
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryTokenStore::new();
        let record = code_record();

        store.set("code:1", &record, None).await.unwrap();
        assert_eq!(store.get("code:1").await.unwrap(), Some(record));

        store.delete("code:1").await.unwrap();
        assert_eq!(store.get("code:1").await.unwrap(), None);
        // deleting again is fine
        store.delete("code:1").await.unwrap();
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = InMemoryTokenStore::new();
        let record = code_record();
        store.set("code:1", &record, None).await.unwrap();

        assert_eq!(store.take("code:1").await.unwrap(), Some(record));
        assert_eq!(store.take("code:1").await.unwrap(), None);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible() {
        let store = InMemoryTokenStore::new();
        store
            .set("code:1", &code_record(), Some(Duration::ZERO))
            .await
            .unwrap();

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.get("code:1").await.unwrap(), None);
        store
            .set("code:2", &code_record(), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(store.take("code:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemoryTokenStore::new();
        store
            .set("code:old", &code_record(), Some(Duration::ZERO))
            .await
            .unwrap();
        store.set("code:live", &code_record(), None).await.unwrap();

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_live_record() {
        let store = InMemoryTokenStore::new();
        let first = code_record();
        let second = code_record();

        assert!(store.insert_if_absent("code:1", &first, None).await.unwrap());
        assert!(!store.insert_if_absent("code:1", &second, None).await.unwrap());
        assert_eq!(store.get("code:1").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_insert_if_absent_reuses_expired_slot() {
        let store = InMemoryTokenStore::new();
        let fresh = code_record();
        store
            .set("code:1", &code_record(), Some(Duration::ZERO))
            .await
            .unwrap();

        std::thread::sleep(Duration::from_millis(5));

        assert!(store.insert_if_absent("code:1", &fresh, None).await.unwrap());
        assert_eq!(store.get("code:1").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_replace_returns_previous_live_record() {
        let store = InMemoryTokenStore::new();
        let first = code_record();
        let second = code_record();

        assert_eq!(store.replace("user:1", &first, None).await.unwrap(), None);
        assert_eq!(
            store.replace("user:1", &second, None).await.unwrap(),
            Some(first)
        );
        assert_eq!(store.get("user:1").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_delete_if_eq_spares_newer_record() {
        let store = InMemoryTokenStore::new();
        let old = code_record();
        let new = code_record();
        store.set("user:1", &old, None).await.unwrap();
        store.set("user:1", &new, None).await.unwrap();

        assert!(!store.delete_if_eq("user:1", &old).await.unwrap());
        assert_eq!(store.get("user:1").await.unwrap(), Some(new.clone()));

        assert!(store.delete_if_eq("user:1", &new).await.unwrap());
        assert_eq!(store.get("user:1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_if_absent_has_one_winner() {
        let store = InMemoryTokenStore::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent("code:race", &code_record(), None)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_has_one_winner() {
        let store = InMemoryTokenStore::new();
        store.set("code:race", &code_record(), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.take("code:race").await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
