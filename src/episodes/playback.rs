use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::warn;

use super::keys;
use crate::backend::{AnimeId, EpisodeNumber};
use crate::cache::KvStorage;

/// Last playback offset per (anime, episode), in seconds.
///
/// Positions never expire; they are superseded by the next save or cleared
/// when an episode plays to the end.
#[derive(Clone)]
pub struct PlaybackPositions {
  storage: Arc<dyn KvStorage>,
}

impl PlaybackPositions {
  pub fn new(storage: Arc<dyn KvStorage>) -> Self {
    Self { storage }
  }

  /// Overwrite the stored offset.
  pub fn save(&self, anime_id: AnimeId, episode: EpisodeNumber, seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
      return Err(eyre!("Invalid playback position: {}", seconds));
    }
    self
      .storage
      .put(&keys::watched(anime_id, episode), &seconds.to_string())
  }

  pub fn get(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<f64> {
    let key = keys::watched(anime_id, episode);
    let raw = match self.storage.get(&key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to read playback position");
        return None;
      }
    };

    match raw.trim().parse::<f64>() {
      Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Some(seconds),
      _ => {
        warn!(key = %key, raw = %raw, "corrupt playback position, evicting");
        if let Err(e) = self.storage.remove(&key) {
          warn!(key = %key, error = %e, "failed to evict playback position");
        }
        None
      }
    }
  }

  /// Offset to resume from. Zero offsets mean "start from the beginning".
  pub fn resume_offset(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<f64> {
    self.get(anime_id, episode).filter(|s| *s > 0.0)
  }

  pub fn clear(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<()> {
    self.storage.remove(&keys::watched(anime_id, episode))
  }

  /// Every readable position stored for `anime_id`, by episode.
  pub fn all_for(&self, anime_id: AnimeId) -> Vec<(EpisodeNumber, f64)> {
    let prefix = keys::watched_prefix(anime_id);
    let found = match self.storage.keys_with_prefix(&prefix) {
      Ok(found) => found,
      Err(e) => {
        warn!(%anime_id, error = %e, "failed to scan playback positions");
        return Vec::new();
      }
    };

    found
      .iter()
      .filter_map(|key| keys::parse_episode_suffix(key, &prefix))
      .filter_map(|episode| Some((episode, self.get(anime_id, episode)?)))
      .collect()
  }
}
