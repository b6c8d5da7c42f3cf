//! In-process backend double shared by the unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{
  AnimeCatalog, AnimeId, Backend, BackendError, BackendResult, EpisodeData, EpisodeNumber, Lineages,
  Resolution, WatchPointer,
};

type Failure = Arc<dyn Fn() -> BackendError + Send + Sync>;

#[derive(Default)]
struct FakeState {
  lineages: Lineages,
  animes: AnimeCatalog,
  available: HashMap<AnimeId, Vec<EpisodeNumber>>,
  episode_data: HashMap<(AnimeId, EpisodeNumber), EpisodeData>,
  resolutions: Vec<Resolution>,
  playback: BTreeMap<(AnimeId, EpisodeNumber), f64>,
  last_watched: BTreeMap<AnimeId, WatchPointer>,
  fail_all: Option<Failure>,
  fail_endpoints: HashMap<&'static str, Failure>,
  delays: HashMap<&'static str, Duration>,
  log: Vec<String>,
}

/// Programmable `Backend` that records every call it receives.
#[derive(Default)]
pub struct FakeBackend {
  state: Mutex<FakeState>,
  calls: AtomicUsize,
}

impl FakeBackend {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Endpoint names in call order, with their arguments.
  pub fn log(&self) -> Vec<String> {
    self.state.lock().unwrap().log.clone()
  }

  pub fn set_lineages(&self, lineages: Lineages) {
    self.state.lock().unwrap().lineages = lineages;
  }

  pub fn set_animes(&self, animes: AnimeCatalog) {
    self.state.lock().unwrap().animes = animes;
  }

  pub fn set_available(&self, anime_id: AnimeId, episodes: Vec<EpisodeNumber>) {
    self.state.lock().unwrap().available.insert(anime_id, episodes);
  }

  pub fn set_episode_data(&self, anime_id: AnimeId, episode: EpisodeNumber, data: EpisodeData) {
    self
      .state
      .lock()
      .unwrap()
      .episode_data
      .insert((anime_id, episode), data);
  }

  pub fn set_resolutions(&self, resolutions: Vec<Resolution>) {
    self.state.lock().unwrap().resolutions = resolutions;
  }

  pub fn set_server_position(&self, anime_id: AnimeId, episode: EpisodeNumber, seconds: f64) {
    self
      .state
      .lock()
      .unwrap()
      .playback
      .insert((anime_id, episode), seconds);
  }

  pub fn server_position(&self, anime_id: AnimeId, episode: EpisodeNumber) -> Option<f64> {
    self.state.lock().unwrap().playback.get(&(anime_id, episode)).copied()
  }

  pub fn server_last_watched(&self, anime_id: AnimeId) -> Option<WatchPointer> {
    self.state.lock().unwrap().last_watched.get(&anime_id).copied()
  }

  /// Every call fails with the error `f` builds.
  pub fn fail_with(&self, f: impl Fn() -> BackendError + Send + Sync + 'static) {
    self.state.lock().unwrap().fail_all = Some(Arc::new(f));
  }

  /// Calls to `endpoint` fail with the error `f` builds.
  pub fn fail_endpoint(
    &self,
    endpoint: &'static str,
    f: impl Fn() -> BackendError + Send + Sync + 'static,
  ) {
    self
      .state
      .lock()
      .unwrap()
      .fail_endpoints
      .insert(endpoint, Arc::new(f));
  }

  /// Calls to `endpoint` sleep for `delay` before answering.
  pub fn delay_endpoint(&self, endpoint: &'static str, delay: Duration) {
    self.state.lock().unwrap().delays.insert(endpoint, delay);
  }

  pub fn timeout(endpoint: &str) -> BackendError {
    BackendError::Timeout {
      endpoint: endpoint.to_string(),
    }
  }

  async fn enter(&self, endpoint: &'static str, args: String) -> BackendResult<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let (delay, failure) = {
      let mut state = self.state.lock().unwrap();
      state.log.push(format!("{}{}", endpoint, args));
      let failure = state
        .fail_endpoints
        .get(endpoint)
        .or(state.fail_all.as_ref())
        .cloned();
      (state.delays.get(endpoint).copied(), failure)
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    match failure {
      Some(f) => Err(f()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl Backend for FakeBackend {
  async fn fetch_lineages(&self) -> BackendResult<Lineages> {
    self.enter("lineage_data", String::new()).await?;
    Ok(self.state.lock().unwrap().lineages.clone())
  }

  async fn fetch_animes(&self) -> BackendResult<AnimeCatalog> {
    self.enter("animes", String::new()).await?;
    Ok(self.state.lock().unwrap().animes.clone())
  }

  async fn refresh_user_data(&self) -> BackendResult<()> {
    self.enter("refresh_user_list_status", String::new()).await
  }

  async fn fetch_episode_data(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<EpisodeData> {
    self
      .enter("episode_data", format!("/{}/{}", anime_id, episode))
      .await?;
    let state = self.state.lock().unwrap();
    Ok(
      state
        .episode_data
        .get(&(anime_id, episode))
        .cloned()
        .unwrap_or(EpisodeData {
          available_episodes: Vec::new(),
          next_airing_date: None,
        }),
    )
  }

  async fn fetch_available_episodes(&self, anime_id: AnimeId) -> BackendResult<Vec<EpisodeNumber>> {
    self
      .enter("available_episodes", format!("/{}", anime_id))
      .await?;
    let state = self.state.lock().unwrap();
    Ok(state.available.get(&anime_id).cloned().unwrap_or_default())
  }

  async fn fetch_resolutions(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Vec<Resolution>> {
    self
      .enter("resolutions", format!("/{}/{}", anime_id, episode))
      .await?;
    Ok(self.state.lock().unwrap().resolutions.clone())
  }

  async fn save_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    seconds: f64,
  ) -> BackendResult<()> {
    self
      .enter("save_playback_time", format!("/{}/{}", anime_id, episode))
      .await?;
    self.set_server_position(anime_id, episode, seconds);
    Ok(())
  }

  async fn get_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Option<f64>> {
    self
      .enter("get_playback_time", format!("/{}/{}", anime_id, episode))
      .await?;
    Ok(self.server_position(anime_id, episode))
  }

  async fn remove_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<()> {
    self
      .enter("remove_playback_time", format!("/{}/{}", anime_id, episode))
      .await?;
    self
      .state
      .lock()
      .unwrap()
      .playback
      .remove(&(anime_id, episode));
    Ok(())
  }

  async fn save_last_watched(&self, anime_id: AnimeId, episode: EpisodeNumber) -> BackendResult<()> {
    self
      .enter("save_last_watched", format!("/{}/{}", anime_id, episode))
      .await?;
    self.state.lock().unwrap().last_watched.insert(
      anime_id,
      WatchPointer {
        episode_number: episode,
        timestamp: chrono::Utc::now().timestamp_millis(),
      },
    );
    Ok(())
  }

  async fn get_last_watched(&self, anime_id: AnimeId) -> BackendResult<Option<WatchPointer>> {
    self
      .enter("get_last_watched", format!("/{}", anime_id))
      .await?;
    Ok(self.server_last_watched(anime_id))
  }

  async fn clear_last_watched(&self, anime_id: AnimeId) -> BackendResult<()> {
    self
      .enter("clear_last_watched", format!("/{}", anime_id))
      .await?;
    self.state.lock().unwrap().last_watched.remove(&anime_id);
    Ok(())
  }

  async fn get_last_watched_all(&self) -> BackendResult<BTreeMap<AnimeId, WatchPointer>> {
    self.enter("get_last_watched_all", String::new()).await?;
    Ok(self.state.lock().unwrap().last_watched.clone())
  }
}
