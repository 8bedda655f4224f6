//! In-process keyed store
//!
//! Every operation goes through the `DashMap` entry for its key, so it runs under
//! that key's shard lock and is atomic per key. TTLs are enforced lazily on access
//! and eagerly by [`MemoryStore::purge_expired`] / the background sweeper.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use ordered_float::OrderedFloat;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{KeyedStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(SortedSet),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Sorted set ordered by `(score, member)`, the same tie-break Redis uses.
#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) -> bool {
        let is_new = match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedFloat(old), member.to_string()));
                false
            }
            None => true,
        };
        self.ordered.insert((OrderedFloat(score), member.to_string()));
        is_new
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(OrderedFloat(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn range(&self, start: isize, stop: isize) -> Vec<String> {
        let len = self.len() as isize;
        if len == 0 {
            return Vec::new();
        }
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }
        self.ordered
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

/// `DashMap`-backed implementation of [`KeyedStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key, `None` if the key is missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                entry.expires_at.map(|at| at.saturating_duration_since(now))
            }
        })
    }

    /// Spawn a task that purges expired keys on a fixed period.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!("🧹 Purged {} expired keys", purged);
                }
            }
        })
    }

    /// Live entry for `key`, removing it first if it has expired.
    fn live_entry(&self, key: &str) -> MapEntry<'_, String, Entry> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                self.entries.entry(key.to_string())
            }
            other => other,
        }
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&Entry) -> StoreResult<T>) -> StoreResult<Option<T>> {
        match self.live_entry(key) {
            MapEntry::Occupied(occupied) => f(occupied.get()).map(Some),
            MapEntry::Vacant(_) => Ok(None),
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        match self.live_entry(key) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Str(value.to_string()), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(key, |entry| match &entry.value {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(wrong_type(key)),
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(matches!(self.live_entry(key), MapEntry::Occupied(_)))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        match self.live_entry(key) {
            MapEntry::Occupied(occupied) => {
                occupied.remove();
                Ok(true)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get_mut().expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn hset_many(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        match &mut entry.value {
            Value::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.to_string(), value.to_string());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.read(key, |entry| match &entry.value {
            Value::Hash(map) => Ok(map.get(field).cloned()),
            _ => Err(wrong_type(key)),
        })
        .map(Option::flatten)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.read(key, |entry| match &entry.value {
            Value::Hash(map) => Ok(map.clone()),
            _ => Err(wrong_type(key)),
        })
        .map(Option::unwrap_or_default)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| Entry::new(Value::ZSet(SortedSet::default()), None));
        match &mut entry.value {
            Value::ZSet(set) => Ok(set.insert(member, score)),
            _ => Err(wrong_type(key)),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut occupied) => {
                let (removed, now_empty) = match &mut occupied.get_mut().value {
                    Value::ZSet(set) => {
                        let removed = set.remove(member);
                        (removed, set.len() == 0)
                    }
                    _ => return Err(wrong_type(key)),
                };
                // Redis drops a sorted set once its last member goes
                if now_empty {
                    occupied.remove();
                }
                Ok(removed)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.read(key, |entry| match &entry.value {
            Value::ZSet(set) => Ok(set.range(start, stop)),
            _ => Err(wrong_type(key)),
        })
        .map(Option::unwrap_or_default)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.read(key, |entry| match &entry.value {
            Value::ZSet(set) => Ok(set.score(member)),
            _ => Err(wrong_type(key)),
        })
        .map(Option::flatten)
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> StoreResult<f64> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| Entry::new(Value::ZSet(SortedSet::default()), None));
        match &mut entry.value {
            Value::ZSet(set) => {
                let score = set.score(member).unwrap_or(0.0) + delta;
                set.insert(member, score);
                Ok(score)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
