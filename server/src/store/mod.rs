//! Token store: the only durable state of the credential server.
//!
//! Records are keyed by namespaced strings (`code:`, `sub:`, `user:`) so a
//! six-digit code can never collide with a token subject or a user id.
//! Single-use semantics rest on [`TokenStore::take`], which every backend
//! must implement as one atomic get-and-delete. `insert_if_absent`, `replace`
//! and `delete_if_eq` are atomic in the same sense.

mod memory;
mod redis_store;

pub use memory::InMemoryTokenStore;
pub use redis_store::{connect_redis_pool, RedisTokenStore};

use std::time::Duration;

use async_trait::async_trait;
use common::{Role, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("failed to create redis pool: {0}")]
    PoolCreate(#[from] deadpool_redis::CreatePoolError),

    #[error("corrupt record under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredTokenRecord {
    /// Outstanding authorization code, keyed by [`code_key`].
    AuthorizationCode { user_id: UserId, role: Role },
    /// Active session pair, keyed by [`user_key`] and by both subject keys.
    Session {
        user_id: UserId,
        access_subject: String,
        refresh_subject: String,
    },
}

impl StoredTokenRecord {
    pub fn user_id(&self) -> &UserId {
        match self {
            StoredTokenRecord::AuthorizationCode { user_id, .. } => user_id,
            StoredTokenRecord::Session { user_id, .. } => user_id,
        }
    }
}

pub fn code_key(code: &str) -> String {
    format!("code:{code}")
}

pub fn subject_key(subject: &str) -> String {
    format!("sub:{subject}")
}

pub fn user_key(user_id: &UserId) -> String {
    format!("user:{user_id}")
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>>;

    /// Insert or overwrite. `None` means the record never expires.
    async fn set(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Writes only when no live record exists under `key`. Returns whether
    /// the write happened.
    async fn insert_if_absent(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Insert or overwrite, returning the live record that was replaced.
    async fn replace(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<StoredTokenRecord>>;

    /// Idempotent: deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Deletes `key` only while it still holds `expected`. Returns whether a
    /// record was removed.
    async fn delete_if_eq(&self, key: &str, expected: &StoredTokenRecord) -> StoreResult<bool>;

    /// Atomically remove and return the record. Of two concurrent callers
    /// for the same key at most one observes `Some`.
    async fn take(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>>;
}
