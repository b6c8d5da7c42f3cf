//! Persisted storage keys. Existing clients read these, so the layout is fixed.

use crate::backend::{AnimeId, EpisodeNumber};
use crate::cache::EXPIRY_SUFFIX;

pub const SELECTED_FILTERS: &str = "selectedFilters";
pub const LAST_WATCHED_PREFIX: &str = "last_watched_";

pub fn available_episodes(anime_id: AnimeId) -> String {
  format!("available_episodes_{}", anime_id)
}

pub fn next_airing(anime_id: AnimeId, episode: EpisodeNumber) -> String {
  format!("next_airing_{}_{}", anime_id, episode)
}

pub fn next_airing_prefix(anime_id: AnimeId) -> String {
  format!("next_airing_{}_", anime_id)
}

pub fn watched(anime_id: AnimeId, episode: EpisodeNumber) -> String {
  format!("watched_{}_{}", anime_id, episode)
}

pub fn watched_prefix(anime_id: AnimeId) -> String {
  format!("watched_{}_", anime_id)
}

pub fn last_watched(anime_id: AnimeId) -> String {
  format!("{}{}", LAST_WATCHED_PREFIX, anime_id)
}

/// Anime id of a `last_watched_{id}` key.
pub fn parse_last_watched(key: &str) -> Option<AnimeId> {
  key.strip_prefix(LAST_WATCHED_PREFIX)?.parse().ok()
}

/// Episode number of a per-episode key under `prefix`, skipping expiry companions.
pub fn parse_episode_suffix(key: &str, prefix: &str) -> Option<EpisodeNumber> {
  let rest = key.strip_prefix(prefix)?;
  if rest.ends_with(EXPIRY_SUFFIX) {
    return None;
  }
  rest.parse().ok().filter(|n| *n > 0)
}
