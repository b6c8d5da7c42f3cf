//! Expiring cache layer over a raw key-value storage backend.
//!
//! Every value `key` is stored as JSON next to `key_expiry`, which holds the
//! absolute expiry instant in Unix milliseconds. Eviction is lazy: expired and
//! corrupt records are deleted by the read that discovers them.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{Report, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::Clock;
use super::storage::{KvStorage, WriteOp};
use super::traits::{CacheEntry, CacheResult, Revalidation};

/// Suffix of the companion key holding an entry's expiry instant.
pub const EXPIRY_SUFFIX: &str = "_expiry";

pub fn expiry_key(key: &str) -> String {
  format!("{key}{EXPIRY_SUFFIX}")
}

/// Outcome of reading the two raw records behind one entry.
enum RawRead<T> {
  Missing,
  Present(CacheEntry<T>),
  Corrupt(String),
}

/// Typed TTL cache shared by every episode cache.
#[derive(Clone)]
pub struct ExpiringCache {
  storage: Arc<dyn KvStorage>,
  clock: Arc<dyn Clock>,
}

impl ExpiringCache {
  pub fn new(storage: Arc<dyn KvStorage>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  pub fn storage(&self) -> &Arc<dyn KvStorage> {
    &self.storage
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Store `value` under `key`, expiring `ttl` from now.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let ops = self.set_ops(key, value, ttl)?;
    self.storage.apply(&ops)
  }

  /// The writes `set` would perform, for composing atomic multi-entry updates.
  pub fn set_ops<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<Vec<WriteOp>> {
    let data = serde_json::to_string(value)?;
    let expires_at = (self.clock.now() + ttl).timestamp_millis();
    Ok(vec![
      WriteOp::put(key, data),
      WriteOp::put(expiry_key(key), expires_at.to_string()),
    ])
  }

  /// The writes `remove` would perform.
  pub fn remove_ops(key: &str) -> Vec<WriteOp> {
    vec![WriteOp::remove(key), WriteOp::remove(expiry_key(key))]
  }

  /// Remove an entry. Idempotent.
  pub fn remove(&self, key: &str) -> Result<()> {
    self.storage.apply(&Self::remove_ops(key))
  }

  /// Fresh value for `key`, or `None`.
  ///
  /// Expired and corrupt entries are evicted before returning `None`.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let entry = self.peek::<T>(key)?;
    if entry.is_expired(self.clock.now()) {
      debug!(key, "cache entry expired, evicting");
      self.evict(key);
      return None;
    }
    Some(entry.value)
  }

  /// Entry for `key` regardless of expiry, so callers can tell stale from fresh.
  ///
  /// Corrupt entries are still evicted.
  pub fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
    match self.read_raw::<T>(key) {
      RawRead::Missing => None,
      RawRead::Present(entry) => Some(entry),
      RawRead::Corrupt(reason) => {
        warn!(key, %reason, "corrupt cache entry, evicting");
        self.evict(key);
        None
      }
    }
  }

  fn read_raw<T: DeserializeOwned>(&self, key: &str) -> RawRead<T> {
    let value = match self.storage.get(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        return RawRead::Missing;
      }
    };
    let expiry = match self.storage.get(&expiry_key(key)) {
      Ok(expiry) => expiry,
      Err(e) => {
        warn!(key, error = %e, "cache expiry read failed, treating as miss");
        return RawRead::Missing;
      }
    };

    match (value, expiry) {
      (None, None) => RawRead::Missing,
      (None, Some(_)) => RawRead::Corrupt("expiry without value".to_string()),
      (Some(_), None) => RawRead::Corrupt("value without expiry".to_string()),
      (Some(value), Some(expiry)) => {
        let expires_at = match expiry
          .trim()
          .parse::<i64>()
          .ok()
          .and_then(DateTime::from_timestamp_millis)
        {
          Some(at) => at,
          None => return RawRead::Corrupt(format!("unreadable expiry {expiry:?}")),
        };
        match serde_json::from_str::<T>(&value) {
          Ok(value) => RawRead::Present(CacheEntry { value, expires_at }),
          Err(e) => RawRead::Corrupt(e.to_string()),
        }
      }
    }
  }

  fn evict(&self, key: &str) {
    if let Err(e) = self.remove(key) {
      warn!(key, error = %e, "failed to evict cache entry");
    }
  }

  /// Fetch a single value with a cache-first strategy.
  ///
  /// 1. Fresh cache entry: returned without calling `fetcher`
  /// 2. Stale or missing: `fetcher` runs and its result replaces the entry
  /// 3. Fetch failed with a recoverable error and a stale copy exists: the
  ///    stale copy is served (offline mode) and left in place
  pub async fn fetch_one<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    E: std::error::Error + Revalidation + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
  {
    match self.peek::<T>(key) {
      Some(cached) if !cached.is_expired(self.clock.now()) => {
        debug!(key, "cache hit");
        Ok(CacheResult::from_cache(cached.value, cached.expires_at))
      }
      Some(stale) => match fetcher().await {
        Ok(data) => {
          self.set(key, &data, ttl)?;
          Ok(CacheResult::from_network(data))
        }
        Err(e) if e.keeps_stale() => {
          warn!(key, error = %e, "revalidation failed, serving stale entry");
          Ok(CacheResult::offline(stale.value, stale.expires_at, &e))
        }
        Err(e) => Err(Report::new(e)),
      },
      None => {
        let data = fetcher().await.map_err(Report::new)?;
        self.set(key, &data, ttl)?;
        Ok(CacheResult::from_network(data))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::CacheSource;

  #[derive(Debug, thiserror::Error)]
  enum FakeError {
    #[error("offline")]
    Offline,
    #[error("malformed")]
    Malformed,
  }

  impl Revalidation for FakeError {
    fn keeps_stale(&self) -> bool {
      matches!(self, FakeError::Offline)
    }
  }

  fn cache() -> (ExpiringCache, Arc<MemoryStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
    let cache = ExpiringCache::new(storage.clone(), clock.clone());
    (cache, storage, clock)
  }

  #[test]
  fn test_readable_until_ttl_elapses() {
    let (cache, storage, clock) = cache();
    let ttl = Duration::hours(1);
    cache.set("k", &vec![1, 2, 3], ttl).unwrap();

    clock.advance(ttl - Duration::milliseconds(1));
    assert_eq!(cache.get::<Vec<u32>>("k"), Some(vec![1, 2, 3]));

    clock.advance(Duration::milliseconds(2));
    assert_eq!(cache.get::<Vec<u32>>("k"), None);
    // Lazily evicted
    assert_eq!(storage.get("k").unwrap(), None);
    assert_eq!(storage.get("k_expiry").unwrap(), None);
  }

  #[test]
  fn test_expired_exactly_at_boundary() {
    let (cache, _, clock) = cache();
    cache.set("k", &"v", Duration::seconds(10)).unwrap();

    clock.advance(Duration::seconds(10));
    assert_eq!(cache.get::<String>("k"), None);
  }

  #[test]
  fn test_remove_absent_key_is_noop() {
    let (cache, storage, _) = cache();
    storage.put("other", "1").unwrap();

    cache.remove("missing").unwrap();
    cache.remove("missing").unwrap();

    assert_eq!(storage.keys_with_prefix("").unwrap(), vec!["other".to_string()]);
  }

  #[test]
  fn test_corrupt_entry_self_heals() {
    let (cache, storage, clock) = cache();
    let expiry = clock.now_millis() + 60_000;
    storage.put("k", "{not json").unwrap();
    storage.put("k_expiry", &expiry.to_string()).unwrap();

    assert_eq!(cache.get::<Vec<u32>>("k"), None);
    assert_eq!(storage.get("k").unwrap(), None);
    assert_eq!(storage.get("k_expiry").unwrap(), None);
  }

  #[test]
  fn test_value_without_expiry_is_evicted() {
    let (cache, storage, _) = cache();
    storage.put("k", "[1]").unwrap();

    assert_eq!(cache.get::<Vec<u32>>("k"), None);
    assert_eq!(storage.get("k").unwrap(), None);
  }

  #[test]
  fn test_peek_reports_stale_without_evicting() {
    let (cache, storage, clock) = cache();
    cache.set("k", &5u32, Duration::minutes(1)).unwrap();
    clock.advance(Duration::minutes(2));

    let entry = cache.peek::<u32>("k").unwrap();
    assert_eq!(entry.value, 5);
    assert!(entry.is_expired(clock.now()));
    assert!(storage.get("k").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_fetch_one_serves_fresh_cache() {
    let (cache, _, _) = cache();
    cache.set("k", &1u32, Duration::hours(1)).unwrap();

    let result = cache
      .fetch_one("k", Duration::hours(1), || async { Ok::<_, FakeError>(2u32) })
      .await
      .unwrap();

    assert_eq!(result.data, 1);
    assert_eq!(result.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_fetch_one_falls_back_to_stale_on_failure() {
    let (cache, _, clock) = cache();
    cache.set("k", &1u32, Duration::hours(1)).unwrap();
    clock.advance(Duration::hours(2));

    let result = cache
      .fetch_one::<u32, _, _, _>("k", Duration::hours(1), || async { Err(FakeError::Offline) })
      .await
      .unwrap();

    assert_eq!(result.data, 1);
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.revalidation_error.as_deref(), Some("offline"));
    assert!(!result.is_fresh());
  }

  #[tokio::test]
  async fn test_fetch_one_propagates_unrecoverable_failure() {
    let (cache, _, clock) = cache();
    cache.set("k", &1u32, Duration::hours(1)).unwrap();
    clock.advance(Duration::hours(2));

    let err = cache
      .fetch_one::<u32, _, _, _>("k", Duration::hours(1), || async { Err(FakeError::Malformed) })
      .await
      .unwrap_err();

    assert!(matches!(err.downcast_ref::<FakeError>(), Some(FakeError::Malformed)));
    // Stale copy untouched
    assert_eq!(cache.peek::<u32>("k").unwrap().value, 1);
  }

  #[tokio::test]
  async fn test_fetch_one_missing_propagates_failure() {
    let (cache, _, _) = cache();

    let result = cache
      .fetch_one::<u32, _, _, _>("k", Duration::hours(1), || async { Err(FakeError::Offline) })
      .await;

    assert!(result.is_err());
  }
}
