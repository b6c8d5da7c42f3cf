//! Backend collaborator: the HTTP service that owns catalog, scraping and
//! session data. The caches treat it as a key-value source whose expiry they
//! do not control.

pub mod api_types;
mod client;
mod error;
mod types;

use async_trait::async_trait;
use std::collections::BTreeMap;

pub use client::BackendClient;
pub use error::{BackendError, BackendResult};
pub use types::{
  AnimeCatalog, AnimeId, AnimeRecord, EpisodeData, EpisodeNumber, Lineages, ListStatus, Resolution,
  WatchPointer, DEFAULT_EPISODE_COUNT,
};

/// Operations the client consumes from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Lineage group id -> ordered anime ids.
  async fn fetch_lineages(&self) -> BackendResult<Lineages>;

  /// Anime id -> record.
  async fn fetch_animes(&self) -> BackendResult<AnimeCatalog>;

  /// Ask the backend to re-pull the user's list. Best effort, no payload.
  async fn refresh_user_data(&self) -> BackendResult<()>;

  /// Availability and next airing date in one round trip.
  async fn fetch_episode_data(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<EpisodeData>;

  /// Availability only (older endpoint).
  async fn fetch_available_episodes(&self, anime_id: AnimeId) -> BackendResult<Vec<EpisodeNumber>>;

  async fn fetch_resolutions(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Vec<Resolution>>;

  async fn save_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    seconds: f64,
  ) -> BackendResult<()>;

  async fn get_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Option<f64>>;

  async fn remove_playback_time(&self, anime_id: AnimeId, episode: EpisodeNumber)
    -> BackendResult<()>;

  async fn save_last_watched(&self, anime_id: AnimeId, episode: EpisodeNumber) -> BackendResult<()>;

  async fn get_last_watched(&self, anime_id: AnimeId) -> BackendResult<Option<WatchPointer>>;

  async fn clear_last_watched(&self, anime_id: AnimeId) -> BackendResult<()>;

  async fn get_last_watched_all(&self) -> BackendResult<BTreeMap<AnimeId, WatchPointer>>;
}
