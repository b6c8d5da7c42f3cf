//! One object owning every episode cache of a client session.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::airing::AiringCache;
use super::availability::{normalize, Availability, AvailabilityCache};
use super::filters::{FilterStore, SelectedFilters};
use super::keys;
use super::last_watched::{LastWatched, ResumeCandidate};
use super::playback::PlaybackPositions;
use crate::backend::{AnimeId, Backend, BackendResult, EpisodeData, EpisodeNumber, WatchPointer};
use crate::cache::{Clock, ExpiringCache, KvStorage, SystemClock, WriteOp};

/// Caches for one session over a single injected storage backend.
///
/// Positions and last-watched pointers can additionally be mirrored to the
/// backend's session endpoints. Mirroring is best effort: local state is the
/// source of truth and a failed mirror call is only logged.
#[derive(Clone)]
pub struct EpisodeCacheService {
  backend: Arc<dyn Backend>,
  storage: Arc<dyn KvStorage>,
  cache: ExpiringCache,
  availability: AvailabilityCache,
  airing: AiringCache,
  positions: PlaybackPositions,
  last_watched: LastWatched,
  filters: FilterStore,
  mirror: bool,
}

impl EpisodeCacheService {
  pub fn new(storage: Arc<dyn KvStorage>, backend: Arc<dyn Backend>) -> Self {
    Self::with_clock(storage, backend, Arc::new(SystemClock))
  }

  pub fn with_clock(
    storage: Arc<dyn KvStorage>,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let cache = ExpiringCache::new(storage.clone(), clock.clone());
    Self {
      availability: AvailabilityCache::new(cache.clone()),
      airing: AiringCache::new(cache.clone()),
      positions: PlaybackPositions::new(storage.clone()),
      last_watched: LastWatched::new(storage.clone(), clock),
      filters: FilterStore::new(storage.clone()),
      backend,
      storage,
      cache,
      mirror: false,
    }
  }

  /// Also push positions and pointers to the backend session.
  pub fn with_session_mirror(mut self, enabled: bool) -> Self {
    self.mirror = enabled;
    self
  }

  pub fn backend(&self) -> &Arc<dyn Backend> {
    &self.backend
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    self.cache.clock()
  }

  pub fn availability(&self) -> &AvailabilityCache {
    &self.availability
  }

  pub fn airing(&self) -> &AiringCache {
    &self.airing
  }

  pub fn positions(&self) -> &PlaybackPositions {
    &self.positions
  }

  pub fn last_watched(&self) -> &LastWatched {
    &self.last_watched
  }

  pub fn filters(&self) -> Option<SelectedFilters> {
    self.filters.load()
  }

  pub fn save_filters(&self, filters: &SelectedFilters) -> Result<()> {
    self.filters.save(filters)
  }

  /// Availability and next airing date for one episode.
  ///
  /// With `only_local` nothing leaves the process: both pieces must be cached
  /// and fresh, otherwise `None`. Otherwise one combined request is made and
  /// both caches are replaced from it in a single storage batch.
  pub async fn check_episodes(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    only_local: bool,
  ) -> Result<Option<EpisodeData>> {
    if only_local {
      return Ok(self.check_episodes_local(anime_id, episode));
    }

    let mut data = self.backend.fetch_episode_data(anime_id, episode).await?;
    data.available_episodes = normalize(data.available_episodes);

    let mut ops = self
      .availability
      .store_ops(anime_id, &data.available_episodes)?;
    ops.extend(
      self
        .airing
        .set_ops(anime_id, episode, data.next_airing_date)?,
    );
    self.storage.apply(&ops)?;

    info!(
      %anime_id,
      episode,
      available = data.available_episodes.len(),
      next_airing = ?data.next_airing_date,
      "episode data refreshed"
    );
    Ok(Some(data))
  }

  /// Cache-only half of `check_episodes`. Never fails.
  pub fn check_episodes_local(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<EpisodeData> {
    // Peek so an expired list stays around for offline reads
    let available = self
      .availability
      .get(anime_id)
      .filter(|a| a.is_fresh)
      .map(|a| a.episodes);
    let airing = self.airing.get(anime_id, episode);
    match (available, airing) {
      (Some(available_episodes), Some(next)) => Some(EpisodeData {
        available_episodes,
        next_airing_date: Some(next),
      }),
      _ => {
        debug!(%anime_id, episode, "local episode data incomplete");
        None
      }
    }
  }

  /// Cached availability, stale or not.
  pub fn get_availability(&self, anime_id: AnimeId) -> Option<Availability> {
    self.availability.get(anime_id)
  }

  /// Availability-only refresh through the older endpoint.
  pub async fn refresh_availability(&self, anime_id: AnimeId) -> Result<Vec<EpisodeNumber>> {
    self.availability.refresh(self.backend.as_ref(), anime_id).await
  }

  /// Refresh several anime at once, at most `concurrency` requests in flight.
  ///
  /// Results come back in completion order; one failure does not stop the rest.
  pub async fn refresh_availability_many(
    &self,
    anime_ids: &[AnimeId],
    concurrency: usize,
  ) -> Vec<(AnimeId, Result<Vec<EpisodeNumber>>)> {
    use futures::StreamExt;

    futures::stream::iter(anime_ids.iter().copied())
      .map(|anime_id| async move { (anime_id, self.refresh_availability(anime_id).await) })
      .buffer_unordered(concurrency.max(1))
      .collect()
      .await
  }

  /// Drop the cached availability of `anime_id` and the airing entry of `episode`.
  pub fn clear_cached_episode_data(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<()> {
    let mut ops = ExpiringCache::remove_ops(&keys::available_episodes(anime_id));
    ops.extend(ExpiringCache::remove_ops(&keys::next_airing(anime_id, episode)));
    self.storage.apply(&ops)
  }

  /// Drop the cached availability and every airing entry of `anime_id`.
  pub fn clear_cached_anime_data(&self, anime_id: AnimeId) -> Result<()> {
    let ops: Vec<WriteOp> = ExpiringCache::remove_ops(&keys::available_episodes(anime_id));
    self.storage.apply(&ops)?;
    self.airing.clear_all(anime_id)
  }

  pub async fn save_position(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    seconds: f64,
  ) -> Result<()> {
    self.positions.save(anime_id, episode, seconds)?;
    if self.mirror {
      mirrored(
        "save playback time",
        self.backend.save_playback_time(anime_id, episode, seconds).await,
      );
    }
    Ok(())
  }

  pub async fn clear_position(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<()> {
    self.positions.clear(anime_id, episode)?;
    if self.mirror {
      mirrored(
        "remove playback time",
        self.backend.remove_playback_time(anime_id, episode).await,
      );
    }
    Ok(())
  }

  /// Offset to resume `episode` from, if any progress beyond zero is known.
  ///
  /// Falls back to the backend session when nothing is stored locally.
  pub async fn resume_offset(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<f64> {
    if let Some(local) = self.positions.resume_offset(anime_id, episode) {
      return Some(local);
    }
    if !self.mirror || self.positions.get(anime_id, episode).is_some() {
      return None;
    }
    match self.backend.get_playback_time(anime_id, episode).await {
      Ok(remote) => remote.filter(|s| s.is_finite() && *s > 0.0),
      Err(e) => {
        warn!(%anime_id, episode, error = %e, "session playback time unavailable");
        None
      }
    }
  }

  pub async fn mark_watching(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<WatchPointer> {
    let pointer = self.last_watched.mark_watching(anime_id, episode)?;
    if self.mirror {
      mirrored(
        "save last watched",
        self.backend.save_last_watched(anime_id, episode).await,
      );
    }
    Ok(pointer)
  }

  /// Natural end of an episode: its position and the anime's pointer go away.
  pub async fn finish_episode(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Result<()> {
    self.clear_position(anime_id, episode).await?;
    self.clear_last_watched(anime_id).await?;
    info!(%anime_id, episode, "episode finished");
    Ok(())
  }

  /// Most recent pointer inside the resume horizon. Expired pointers seen on the way are purged.
  pub fn resolve_resumable(&self) -> Option<ResumeCandidate> {
    self.last_watched.resolve_resumable()
  }

  /// Pointer for one anime. Falls back to the backend session when none is
  /// stored locally, keeping what the session returns.
  pub async fn last_watched_pointer(&self, anime_id: AnimeId) -> Result<Option<WatchPointer>> {
    if let Some(local) = self.last_watched.get(anime_id) {
      return Ok(Some(local));
    }
    if !self.mirror {
      return Ok(None);
    }
    match self.backend.get_last_watched(anime_id).await? {
      Some(pointer) if pointer.episode_number > 0 => {
        self.last_watched.put(anime_id, &pointer)?;
        debug!(%anime_id, episode = pointer.episode_number, "last watched pointer taken from session");
        Ok(Some(pointer))
      }
      _ => Ok(None),
    }
  }

  /// Copy pointers the backend session has but local storage lacks, keeping
  /// their original timestamps. Returns how many were imported.
  pub async fn import_session_pointers(&self) -> Result<usize> {
    if !self.mirror {
      return Ok(0);
    }
    let remote = self.backend.get_last_watched_all().await?;
    let local = self.last_watched.pointers();

    let mut imported = 0;
    for (anime_id, pointer) in remote {
      if local.contains_key(&anime_id) || pointer.episode_number == 0 {
        continue;
      }
      self.last_watched.put(anime_id, &pointer)?;
      imported += 1;
    }
    if imported > 0 {
      info!(imported, "imported last watched pointers from session");
    }
    Ok(imported)
  }

  /// The user said no to resuming: the pointer is removed so the prompt does not come back.
  pub async fn decline_resume(&self, anime_id: AnimeId) -> Result<()> {
    self.clear_last_watched(anime_id).await?;
    info!(%anime_id, "resume declined");
    Ok(())
  }

  async fn clear_last_watched(&self, anime_id: AnimeId) -> Result<()> {
    self.last_watched.clear(anime_id)?;
    if self.mirror {
      mirrored(
        "clear last watched",
        self.backend.clear_last_watched(anime_id).await,
      );
    }
    Ok(())
  }
}

fn mirrored(what: &str, result: BackendResult<()>) {
  if let Err(e) = result {
    warn!(error = %e, "failed to {} on the backend session", what);
  }
}
