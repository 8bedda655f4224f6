//! # Shared Keyed Store
//!
//! The call engine keeps no cross-request state in process memory. Every piece of
//! shared mutable truth (the waiting line, the per-agent occupancy markers, the
//! per-session locks and the session records) lives in a keyed store that offers
//! per-key atomic primitives and nothing more. There are no multi-key transactions.
//!
//! [`KeyedStore`] is the seam. It mirrors the small subset of the Redis command set
//! the engine relies on:
//!
//! | Operation            | Redis equivalent            |
//! |----------------------|-----------------------------|
//! | [`set_nx`]           | `SET key val NX PX ttl`     |
//! | [`set`]              | `SET key val [PX ttl]`      |
//! | [`get`] / [`exists`] | `GET` / `EXISTS`            |
//! | [`del`] / [`expire`] | `DEL` / `PEXPIRE`           |
//! | [`hset_many`]        | `HSET key f1 v1 f2 v2 ...`  |
//! | [`hget`] / [`hgetall`] | `HGET` / `HGETALL`        |
//! | [`zadd`] / [`zrem`]  | `ZADD` / `ZREM`             |
//! | [`zrange`] / [`zscore`] | `ZRANGE` / `ZSCORE`      |
//! | [`zincrby`]          | `ZINCRBY`                   |
//!
//! An in-process implementation, [`MemoryStore`], is provided for single-node
//! deployments and tests.
//!
//! [`set_nx`]: KeyedStore::set_nx
//! [`set`]: KeyedStore::set
//! [`get`]: KeyedStore::get
//! [`exists`]: KeyedStore::exists
//! [`del`]: KeyedStore::del
//! [`expire`]: KeyedStore::expire
//! [`hset_many`]: KeyedStore::hset_many
//! [`hget`]: KeyedStore::hget
//! [`hgetall`]: KeyedStore::hgetall
//! [`zadd`]: KeyedStore::zadd
//! [`zrem`]: KeyedStore::zrem
//! [`zrange`]: KeyedStore::zrange
//! [`zscore`]: KeyedStore::zscore
//! [`zincrby`]: KeyedStore::zincrby

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Errors raised by a keyed store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The key holds a value of a different type than the operation expects
    #[error("wrong type for key '{0}'")]
    WrongType(String),

    /// The backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Capability set the call engine requires from the shared store.
///
/// Every method is atomic with respect to the single key it touches.
/// Implementations must be safe to share between concurrent request handlers.
#[async_trait]
pub trait KeyedStore: Send + Sync + 'static {
    /// Set `key` to `value` with a TTL only if the key is absent.
    ///
    /// Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Unconditionally set a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Read a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Whether the key exists, whatever its type.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key. Returns `true` if something was removed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Set a TTL on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Upsert several hash fields at once.
    async fn hset_many(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()>;

    /// Read one hash field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Read every field of a hash. A missing key yields an empty map.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Add or re-score a sorted set member. Returns `true` if the member is new.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool>;

    /// Remove a sorted set member. Returns `true` if it was present.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Members by ascending score between two inclusive ranks.
    ///
    /// Negative ranks count from the end, as in Redis.
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// Score of a sorted set member.
    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Increment a member's score, creating it at `delta` if absent.
    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> StoreResult<f64>;

    /// Health probe.
    async fn ping(&self) -> StoreResult<()>;
}
