use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::keys;
use crate::backend::{AnimeId, EpisodeNumber, WatchPointer};
use crate::cache::{Clock, KvStorage};

/// Pointers older than this are no longer offered for resume.
pub fn resume_horizon() -> Duration {
  Duration::days(7)
}

/// A pointer that passed the horizon check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCandidate {
  pub anime_id: AnimeId,
  pub episode: EpisodeNumber,
  pub watched_at: DateTime<Utc>,
}

/// Where the user last was, one pointer per anime.
#[derive(Clone)]
pub struct LastWatched {
  storage: Arc<dyn KvStorage>,
  clock: Arc<dyn Clock>,
}

impl LastWatched {
  pub fn new(storage: Arc<dyn KvStorage>, clock: Arc<dyn Clock>) -> Self {
    Self { storage, clock }
  }

  /// Point `anime_id` at `episode`, stamped now. Replaces any earlier pointer.
  pub fn mark_watching(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<WatchPointer> {
    let pointer = WatchPointer {
      episode_number: episode,
      timestamp: self.clock.now_millis(),
    };
    self.put(anime_id, &pointer)?;
    Ok(pointer)
  }

  /// Store a pointer as-is, keeping its original timestamp.
  pub fn put(&self, anime_id: AnimeId, pointer: &WatchPointer) -> Result<()> {
    let raw = serde_json::to_string(pointer)?;
    self.storage.put(&keys::last_watched(anime_id), &raw)
  }

  pub fn get(&self, anime_id: AnimeId) -> Option<WatchPointer> {
    let key = keys::last_watched(anime_id);
    let raw = match self.storage.get(&key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to read last watched pointer");
        return None;
      }
    };
    match serde_json::from_str::<WatchPointer>(&raw) {
      Ok(pointer) if pointer.episode_number > 0 => Some(pointer),
      _ => {
        warn!(key = %key, "corrupt last watched pointer, evicting");
        self.evict(anime_id);
        None
      }
    }
  }

  pub fn clear(&self, anime_id: AnimeId) -> Result<()> {
    self.storage.remove(&keys::last_watched(anime_id))
  }

  /// Every readable pointer. Corrupt ones are evicted along the way.
  pub fn pointers(&self) -> BTreeMap<AnimeId, WatchPointer> {
    let found = match self.storage.keys_with_prefix(keys::LAST_WATCHED_PREFIX) {
      Ok(found) => found,
      Err(e) => {
        warn!(error = %e, "failed to scan last watched pointers");
        return BTreeMap::new();
      }
    };

    found
      .iter()
      .filter_map(|key| keys::parse_last_watched(key))
      .filter_map(|anime_id| Some((anime_id, self.get(anime_id)?)))
      .collect()
  }

  /// The most recent pointer still inside the resume horizon.
  ///
  /// Pointers are visited newest first. Expired ones seen before the winner are
  /// purged; anything after the winner is left for a later call.
  pub fn resolve_resumable(&self) -> Option<ResumeCandidate> {
    let now = self.clock.now_millis();
    let horizon = resume_horizon().num_milliseconds();

    let mut candidates: Vec<_> = self.pointers().into_iter().collect();
    candidates.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then(a.0.cmp(&b.0)));

    for (anime_id, pointer) in candidates {
      match now.checked_sub(pointer.timestamp) {
        Some(age) if age <= horizon => {}
        Some(_) => {
          info!(%anime_id, episode = pointer.episode_number, "resume pointer expired, purging");
          self.evict(anime_id);
          continue;
        }
        None => {
          warn!(%anime_id, timestamp = pointer.timestamp, "resume pointer timestamp out of range, evicting");
          self.evict(anime_id);
          continue;
        }
      }
      let watched_at = match DateTime::from_timestamp_millis(pointer.timestamp) {
        Some(at) => at,
        None => {
          self.evict(anime_id);
          continue;
        }
      };
      debug!(%anime_id, episode = pointer.episode_number, "resumable episode found");
      return Some(ResumeCandidate {
        anime_id,
        episode: pointer.episode_number,
        watched_at,
      });
    }
    None
  }

  fn evict(&self, anime_id: AnimeId) {
    if let Err(e) = self.clear(anime_id) {
      warn!(%anime_id, error = %e, "failed to evict last watched pointer");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ManualClock, MemoryStorage};

  const NOW: i64 = 1_700_000_000_000;
  const WEEK_MS: i64 = 7 * 24 * 3_600_000;

  fn setup() -> (LastWatched, Arc<MemoryStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::at_millis(NOW));
    (LastWatched::new(storage.clone(), clock.clone()), storage, clock)
  }

  fn pointer(episode: u32, timestamp: i64) -> WatchPointer {
    WatchPointer {
      episode_number: episode,
      timestamp,
    }
  }

  #[test]
  fn test_mark_watching_overwrites() {
    let (last, storage, clock) = setup();
    last.mark_watching(AnimeId(9), 1).unwrap();
    clock.advance(Duration::minutes(5));
    last.mark_watching(AnimeId(9), 2).unwrap();

    assert_eq!(last.get(AnimeId(9)), Some(pointer(2, NOW + 300_000)));
    assert_eq!(
      storage.get("last_watched_9").unwrap().as_deref(),
      Some(r#"{"episodeNumber":2,"timestamp":1700000300000}"#)
    );
  }

  #[test]
  fn test_horizon_boundary() {
    let (last, storage, _) = setup();
    last.put(AnimeId(1), &pointer(3, NOW - WEEK_MS - 1)).unwrap();
    assert_eq!(last.resolve_resumable(), None);
    assert_eq!(storage.get("last_watched_1").unwrap(), None);

    last.put(AnimeId(2), &pointer(4, NOW - WEEK_MS + 1)).unwrap();
    let found = last.resolve_resumable().unwrap();
    assert_eq!((found.anime_id, found.episode), (AnimeId(2), 4));

    last.put(AnimeId(3), &pointer(5, NOW - WEEK_MS)).unwrap();
    last.clear(AnimeId(2)).unwrap();
    assert_eq!(last.resolve_resumable().map(|c| c.anime_id), Some(AnimeId(3)));
  }

  #[test]
  fn test_newest_pointer_wins_rest_left() {
    let (last, _, _) = setup();
    last.put(AnimeId(1), &pointer(1, NOW - 1_000)).unwrap();
    last.put(AnimeId(2), &pointer(7, NOW - 10)).unwrap();
    last.put(AnimeId(3), &pointer(2, NOW - WEEK_MS * 2)).unwrap();

    let found = last.resolve_resumable().unwrap();
    assert_eq!((found.anime_id, found.episode), (AnimeId(2), 7));
    assert_eq!(last.pointers().len(), 3);
  }

  #[test]
  fn test_corrupt_pointer_evicted() {
    let (last, storage, _) = setup();
    storage.put("last_watched_4", "{\"episodeNumber\":").unwrap();

    assert!(last.pointers().is_empty());
    assert_eq!(storage.get("last_watched_4").unwrap(), None);
  }

  #[test]
  fn test_out_of_range_timestamp_evicted() {
    let (last, storage, _) = setup();
    storage
      .put("last_watched_1", r#"{"episodeNumber":1,"timestamp":-9223372036854775808}"#)
      .unwrap();
    last.put(AnimeId(2), &pointer(3, NOW - 60_000)).unwrap();

    let found = last.resolve_resumable().unwrap();
    assert_eq!(found.anime_id, AnimeId(2));
    assert_eq!(last.resolve_resumable().map(|c| c.anime_id), Some(AnimeId(2)));

    last.clear(AnimeId(2)).unwrap();
    assert_eq!(last.resolve_resumable(), None);
    assert_eq!(storage.get("last_watched_1").unwrap(), None);
  }
}
