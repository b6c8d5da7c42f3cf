use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::warn;

use super::keys;
use crate::backend::{AnimeId, EpisodeNumber};
use crate::cache::{ExpiringCache, WriteOp};

/// Airing predictions move around, so they are trusted for much less than availability.
pub fn airing_ttl() -> Duration {
  Duration::hours(1)
}

/// Predicted release time of the next episode, per (anime, episode).
#[derive(Clone)]
pub struct AiringCache {
  cache: ExpiringCache,
}

impl AiringCache {
  pub fn new(cache: ExpiringCache) -> Self {
    Self { cache }
  }

  pub fn get(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<DateTime<Utc>> {
    self.cache.get(&keys::next_airing(anime_id, episode))
  }

  /// Writes for `set`. `None` removes the entry instead of caching a null.
  pub fn set_ops(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    next_airing: Option<DateTime<Utc>>,
  ) -> Result<Vec<WriteOp>> {
    let key = keys::next_airing(anime_id, episode);
    match next_airing {
      Some(at) => self.cache.set_ops(&key, &at, airing_ttl()),
      None => Ok(ExpiringCache::remove_ops(&key)),
    }
  }

  pub fn set(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    next_airing: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let ops = self.set_ops(anime_id, episode, next_airing)?;
    self.cache.storage().apply(&ops)
  }

  pub fn clear(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<()> {
    self.cache.remove(&keys::next_airing(anime_id, episode))
  }

  /// Every fresh prediction cached for `anime_id`, by episode.
  pub fn all_for(&self, anime_id: AnimeId) -> Vec<(EpisodeNumber, DateTime<Utc>)> {
    self
      .episodes_for(anime_id)
      .into_iter()
      .filter_map(|episode| Some((episode, self.get(anime_id, episode)?)))
      .collect()
  }

  /// Drop every prediction cached for `anime_id`.
  pub fn clear_all(&self, anime_id: AnimeId) -> Result<()> {
    let ops: Vec<WriteOp> = self
      .episodes_for(anime_id)
      .into_iter()
      .flat_map(|episode| ExpiringCache::remove_ops(&keys::next_airing(anime_id, episode)))
      .collect();
    self.cache.storage().apply(&ops)
  }

  fn episodes_for(&self, anime_id: AnimeId) -> Vec<EpisodeNumber> {
    let prefix = keys::next_airing_prefix(anime_id);
    match self.cache.storage().keys_with_prefix(&prefix) {
      Ok(found) => found
        .iter()
        .filter_map(|key| keys::parse_episode_suffix(key, &prefix))
        .collect(),
      Err(e) => {
        warn!(%anime_id, error = %e, "failed to scan airing entries");
        Vec::new()
      }
    }
  }
}

/// State of a countdown to a predicted airing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
  Remaining(Duration),
  /// Terminal: the target has passed and the countdown stops.
  AiringNow,
}

impl Countdown {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Countdown::AiringNow)
  }

  /// `2d 3h 4m 5s`, leading zero units dropped.
  pub fn label(&self) -> String {
    match self {
      Countdown::AiringNow => "Airing now".to_string(),
      Countdown::Remaining(left) => {
        let secs = left.num_seconds();
        let (days, hours, minutes, seconds) =
          (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60, secs % 60);
        if days > 0 {
          format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
        } else if hours > 0 {
          format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
          format!("{}m {}s", minutes, seconds)
        } else {
          format!("{}s", seconds)
        }
      }
    }
  }
}

pub fn countdown(target: DateTime<Utc>, now: DateTime<Utc>) -> Countdown {
  if now >= target {
    Countdown::AiringNow
  } else {
    Countdown::Remaining(target - now)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{KvStorage, ManualClock, MemoryStorage};
  use std::sync::Arc;

  fn setup() -> (AiringCache, Arc<MemoryStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
    let cache = AiringCache::new(ExpiringCache::new(storage.clone(), clock.clone()));
    (cache, storage, clock)
  }

  fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
  }

  #[test]
  fn test_null_evicts_prior_prediction() {
    let (cache, storage, _) = setup();
    cache
      .set(AnimeId(5), 2, Some(at("2025-01-01T00:00:00Z")))
      .unwrap();
    assert_eq!(cache.get(AnimeId(5), 2), Some(at("2025-01-01T00:00:00Z")));

    cache.set(AnimeId(5), 2, None).unwrap();
    assert_eq!(cache.get(AnimeId(5), 2), None);
    assert_eq!(storage.get("next_airing_5_2").unwrap(), None);
    assert_eq!(storage.get("next_airing_5_2_expiry").unwrap(), None);
  }

  #[test]
  fn test_one_hour_ttl() {
    let (cache, _, clock) = setup();
    cache
      .set(AnimeId(5), 2, Some(at("2025-01-01T00:00:00Z")))
      .unwrap();

    clock.advance(Duration::minutes(59));
    assert!(cache.get(AnimeId(5), 2).is_some());
    clock.advance(Duration::minutes(1));
    assert!(cache.get(AnimeId(5), 2).is_none());
  }

  #[test]
  fn test_all_for_and_clear_all() {
    let (cache, storage, _) = setup();
    cache.set(AnimeId(5), 1, Some(at("2025-01-01T00:00:00Z"))).unwrap();
    cache.set(AnimeId(5), 3, Some(at("2025-01-08T00:00:00Z"))).unwrap();
    cache.set(AnimeId(50), 1, Some(at("2025-01-01T00:00:00Z"))).unwrap();

    let all = cache.all_for(AnimeId(5));
    assert_eq!(all.iter().map(|(e, _)| *e).collect::<Vec<_>>(), vec![1, 3]);

    cache.clear_all(AnimeId(5)).unwrap();
    assert!(cache.all_for(AnimeId(5)).is_empty());
    assert!(storage.get("next_airing_50_1").unwrap().is_some());
  }

  #[test]
  fn test_countdown() {
    let now = at("2025-01-01T00:00:00Z");
    let target = now + Duration::seconds(90_061);

    let remaining = countdown(target, now);
    assert_eq!(remaining.label(), "1d 1h 1m 1s");
    assert!(!remaining.is_terminal());

    assert_eq!(countdown(target, target), Countdown::AiringNow);
    assert_eq!(countdown(now, target).label(), "Airing now");
  }
}
