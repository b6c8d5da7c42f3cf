use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::{debug, info, warn};

use super::keys;
use crate::backend::{AnimeId, Backend, EpisodeNumber};
use crate::cache::{CacheResult, ExpiringCache, WriteOp};

/// How long a fetched episode list is trusted.
pub fn availability_ttl() -> Duration {
  Duration::hours(24)
}

/// Cached episode list plus whether it is still inside its freshness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
  pub episodes: Vec<EpisodeNumber>,
  pub is_fresh: bool,
  pub expires_at: DateTime<Utc>,
}

impl Availability {
  pub fn contains(&self, episode: EpisodeNumber) -> bool {
    self.episodes.binary_search(&episode).is_ok()
  }
}

/// Per-anime list of episodes confirmed streamable.
#[derive(Clone)]
pub struct AvailabilityCache {
  cache: ExpiringCache,
}

impl AvailabilityCache {
  pub fn new(cache: ExpiringCache) -> Self {
    Self { cache }
  }

  /// Cached list with its freshness. Stale lists are kept so callers can show them.
  pub fn get(&self, anime_id: AnimeId) -> Option<Availability> {
    let entry = self
      .cache
      .peek::<Vec<EpisodeNumber>>(&keys::available_episodes(anime_id))?;
    let is_fresh = !entry.is_expired(self.cache.now());
    Some(Availability {
      episodes: normalize(entry.value),
      is_fresh,
      expires_at: entry.expires_at,
    })
  }

  /// Cached list only while fresh. Never touches the network.
  pub fn get_fresh(&self, anime_id: AnimeId) -> Option<Vec<EpisodeNumber>> {
    self
      .cache
      .get::<Vec<EpisodeNumber>>(&keys::available_episodes(anime_id))
      .map(normalize)
  }

  pub fn store_ops(&self, anime_id: AnimeId, episodes: &[EpisodeNumber]) -> Result<Vec<WriteOp>> {
    let episodes = normalize(episodes.to_vec());
    if let Some(previous) = self.get(anime_id) {
      if previous.episodes.iter().any(|e| !episodes.contains(e)) {
        warn!(
          %anime_id,
          before = previous.episodes.len(),
          after = episodes.len(),
          "available episode list shrank"
        );
      }
    }
    self
      .cache
      .set_ops(&keys::available_episodes(anime_id), &episodes, availability_ttl())
  }

  /// Replace the cached list with a fresh TTL.
  pub fn store(&self, anime_id: AnimeId, episodes: &[EpisodeNumber]) -> Result<()> {
    let ops = self.store_ops(anime_id, episodes)?;
    self.cache.storage().apply(&ops)
  }

  /// Fetch the list from the availability endpoint and replace the cache.
  ///
  /// Any backend failure leaves the cache as it was and is returned to the caller.
  pub async fn refresh(&self, backend: &dyn Backend, anime_id: AnimeId) -> Result<Vec<EpisodeNumber>> {
    let episodes = normalize(backend.fetch_available_episodes(anime_id).await?);
    self.store(anime_id, &episodes)?;
    info!(%anime_id, count = episodes.len(), "refreshed available episodes");
    Ok(episodes)
  }

  /// Cached list if fresh, otherwise refreshed. Transient failures fall back to a stale copy.
  pub async fn ensure(
    &self,
    backend: &dyn Backend,
    anime_id: AnimeId,
  ) -> Result<CacheResult<Vec<EpisodeNumber>>> {
    let key = keys::available_episodes(anime_id);
    let result = self
      .cache
      .fetch_one(&key, availability_ttl(), || async {
        backend
          .fetch_available_episodes(anime_id)
          .await
          .map(normalize)
      })
      .await?;
    debug!(%anime_id, source = ?result.source, "resolved available episodes");
    Ok(CacheResult {
      data: normalize(result.data),
      ..result
    })
  }

  pub fn clear(&self, anime_id: AnimeId) -> Result<()> {
    self.cache.remove(&keys::available_episodes(anime_id))
  }
}

/// Sorted, deduplicated, positive episode numbers.
pub(super) fn normalize(mut episodes: Vec<EpisodeNumber>) -> Vec<EpisodeNumber> {
  episodes.retain(|e| *e > 0);
  episodes.sort_unstable();
  episodes.dedup();
  episodes
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::BackendError;
  use crate::cache::{CacheSource, Clock, KvStorage, ManualClock, MemoryStorage};
  use crate::testing::FakeBackend;
  use std::sync::Arc;

  fn is_validation(err: &color_eyre::Report) -> bool {
    err
      .downcast_ref::<BackendError>()
      .is_some_and(BackendError::is_validation)
  }

  fn setup() -> (AvailabilityCache, Arc<MemoryStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
    let cache = AvailabilityCache::new(ExpiringCache::new(storage.clone(), clock.clone()));
    (cache, storage, clock)
  }

  #[test]
  fn test_get_reports_staleness() {
    let (cache, _, clock) = setup();
    cache.store(AnimeId(1), &[3, 1, 2, 2]).unwrap();

    let fresh = cache.get(AnimeId(1)).unwrap();
    assert_eq!(fresh.episodes, vec![1, 2, 3]);
    assert!(fresh.is_fresh);
    assert!(fresh.contains(2));

    clock.advance(Duration::hours(24));
    let stale = cache.get(AnimeId(1)).unwrap();
    assert!(!stale.is_fresh);
    assert_eq!(cache.get_fresh(AnimeId(1)), None);
  }

  #[tokio::test]
  async fn test_refresh_replaces_entry() {
    let (cache, storage, clock) = setup();
    let backend = FakeBackend::default();
    backend.set_available(AnimeId(7), vec![1, 2, 3]);

    let episodes = cache.refresh(&backend, AnimeId(7)).await.unwrap();
    assert_eq!(episodes, vec![1, 2, 3]);
    assert_eq!(storage.get("available_episodes_7").unwrap().as_deref(), Some("[1,2,3]"));

    let expiry: i64 = storage
      .get("available_episodes_7_expiry")
      .unwrap()
      .unwrap()
      .parse()
      .unwrap();
    assert_eq!(expiry, clock.now_millis() + 24 * 3_600_000);
  }

  #[tokio::test]
  async fn test_refresh_validation_error_leaves_cache() {
    let (cache, _, _) = setup();
    cache.store(AnimeId(7), &[1]).unwrap();
    let backend = FakeBackend::default();
    backend.fail_with(|| BackendError::validation("available episodes", "expected a list"));

    let err = cache.refresh(&backend, AnimeId(7)).await.unwrap_err();
    assert!(is_validation(&err));
    assert_eq!(cache.get_fresh(AnimeId(7)), Some(vec![1]));
  }

  #[tokio::test]
  async fn test_ensure_serves_stale_when_offline() {
    let (cache, _, clock) = setup();
    cache.store(AnimeId(7), &[1, 2]).unwrap();
    clock.advance(Duration::hours(25));

    let backend = FakeBackend::default();
    backend.fail_with(|| BackendError::Timeout {
      endpoint: "available episodes".into(),
    });

    let result = cache.ensure(&backend, AnimeId(7)).await.unwrap();
    assert_eq!(result.data, vec![1, 2]);
    assert_eq!(result.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_ensure_uses_fresh_cache() {
    let (cache, _, _) = setup();
    cache.store(AnimeId(7), &[1, 2]).unwrap();
    let backend = FakeBackend::default();

    let result = cache.ensure(&backend, AnimeId(7)).await.unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(backend.calls(), 0);
  }
}
