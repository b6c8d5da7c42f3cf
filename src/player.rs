//! Player glue: the single decoder slot, periodic position autosave and the
//! play / pause / end / resolution-switch lifecycle that writes into the caches.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{AnimeId, EpisodeNumber, Resolution};
use crate::config::PlaybackConfig;
use crate::episodes::EpisodeCacheService;

/// A streaming engine instance bound to one media element.
pub trait StreamEngine: Send {
  fn load(&mut self, locator: &str) -> Result<()>;
  fn seek(&mut self, seconds: f64);
  /// Release decoder resources. Called exactly once per instance.
  fn destroy(&mut self);
}

pub trait EngineFactory: Send + Sync {
  fn create(&self) -> Result<Box<dyn StreamEngine>>;
}

/// Current playhead of the media element, in seconds.
pub trait MediaClock: Send + Sync {
  fn current_time(&self) -> f64;
}

/// Holds at most one live engine.
pub struct DecoderSlot {
  factory: Arc<dyn EngineFactory>,
  active: Option<Box<dyn StreamEngine>>,
}

impl DecoderSlot {
  pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
    Self {
      factory,
      active: None,
    }
  }

  /// Destroy the current engine, then construct its replacement.
  ///
  /// If construction fails the slot is left empty.
  pub fn replace(&mut self) -> Result<&mut Box<dyn StreamEngine>> {
    self.teardown();
    let engine = self.factory.create()?;
    Ok(self.active.insert(engine))
  }

  pub fn is_active(&self) -> bool {
    self.active.is_some()
  }

  pub fn teardown(&mut self) {
    if let Some(mut engine) = self.active.take() {
      engine.destroy();
      debug!("stream engine destroyed");
    }
  }
}

impl Drop for DecoderSlot {
  fn drop(&mut self) {
    self.teardown();
  }
}

/// Background task saving the playhead every `period` while playing.
pub struct Autosave {
  handle: Option<JoinHandle<()>>,
}

impl Autosave {
  pub fn start(
    service: EpisodeCacheService,
    media: Arc<dyn MediaClock>,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    period: Duration,
  ) -> Self {
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let seconds = media.current_time();
        if let Err(e) = service.save_position(anime_id, episode, seconds).await {
          warn!(%anime_id, episode, error = %e, "autosave failed");
        }
      }
    });
    Self {
      handle: Some(handle),
    }
  }

  pub fn is_running(&self) -> bool {
    self.handle.as_ref().is_some_and(|h| !h.is_finished())
  }

  /// Stop the timer and wait for the task to exit, so a tick already in
  /// flight has finished writing before this returns.
  pub async fn cancel(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
      match handle.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(error = %e, "autosave task failed"),
      }
    }
  }
}

impl Drop for Autosave {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
  Idle,
  Playing,
  Paused,
  Ended,
}

/// One episode being watched.
pub struct PlaybackSession {
  service: EpisodeCacheService,
  media: Arc<dyn MediaClock>,
  slot: DecoderSlot,
  autosave: Option<Autosave>,
  autosave_period: Duration,
  current: Option<(AnimeId, EpisodeNumber)>,
  state: PlayerState,
}

impl PlaybackSession {
  /// Session autosaving every `playback.autosave_secs`.
  pub fn from_config(
    config: &PlaybackConfig,
    service: EpisodeCacheService,
    factory: Arc<dyn EngineFactory>,
    media: Arc<dyn MediaClock>,
  ) -> Self {
    Self::new(service, factory, media, Duration::from_secs(config.autosave_secs))
  }

  pub fn new(
    service: EpisodeCacheService,
    factory: Arc<dyn EngineFactory>,
    media: Arc<dyn MediaClock>,
    autosave_period: Duration,
  ) -> Self {
    Self {
      service,
      media,
      slot: DecoderSlot::new(factory),
      autosave: None,
      autosave_period,
      current: None,
      state: PlayerState::Idle,
    }
  }

  pub fn state(&self) -> PlayerState {
    self.state
  }

  pub fn current(&self) -> Option<(AnimeId, EpisodeNumber)> {
    self.current
  }

  pub fn is_autosaving(&self) -> bool {
    self.autosave.as_ref().is_some_and(Autosave::is_running)
  }

  /// Start `episode` from `locator`, resuming from the saved offset if there is one.
  pub async fn play(
    &mut self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    locator: &str,
  ) -> Result<Option<f64>> {
    self.stop_autosave().await;
    let resume_at = self.service.resume_offset(anime_id, episode).await;

    let engine = self.slot.replace()?;
    engine.load(locator)?;
    if let Some(seconds) = resume_at {
      engine.seek(seconds);
    }

    self.current = Some((anime_id, episode));
    self.service.mark_watching(anime_id, episode).await?;
    self.start_autosave(anime_id, episode);
    self.state = PlayerState::Playing;
    info!(%anime_id, episode, resume_at = ?resume_at, "playback started");
    Ok(resume_at)
  }

  /// Stop the autosave timer and persist the playhead.
  pub async fn pause(&mut self) -> Result<()> {
    let (anime_id, episode) = self.require_current()?;
    self.stop_autosave().await;
    self
      .service
      .save_position(anime_id, episode, self.media.current_time())
      .await?;
    self.state = PlayerState::Paused;
    Ok(())
  }

  pub async fn resume_playing(&mut self) -> Result<()> {
    let (anime_id, episode) = self.require_current()?;
    self.stop_autosave().await;
    self.start_autosave(anime_id, episode);
    self.state = PlayerState::Playing;
    Ok(())
  }

  /// Natural end of stream.
  pub async fn ended(&mut self) -> Result<()> {
    let (anime_id, episode) = self.require_current()?;
    self.stop_autosave().await;
    self.service.finish_episode(anime_id, episode).await?;
    self.state = PlayerState::Ended;
    Ok(())
  }

  /// Reload the current episode at another resolution, keeping the playhead.
  pub async fn switch_resolution(&mut self, label: &str) -> Result<Resolution> {
    let (anime_id, episode) = self.require_current()?;
    let resolutions = self
      .service
      .backend()
      .fetch_resolutions(anime_id, episode)
      .await?;
    let chosen = resolutions
      .into_iter()
      .find(|r| r.label == label)
      .ok_or_else(|| eyre!("Resolution {} not offered for {} episode {}", label, anime_id, episode))?;

    let position = self.media.current_time();
    let engine = self.slot.replace()?;
    engine.load(&chosen.locator)?;
    if position > 0.0 {
      engine.seek(position);
    }
    info!(%anime_id, episode, resolution = %chosen.label, "resolution switched");
    Ok(chosen)
  }

  /// Save where we are and release the engine.
  pub async fn stop(&mut self) -> Result<()> {
    if self.state == PlayerState::Playing {
      self.pause().await?;
    }
    self.stop_autosave().await;
    self.slot.teardown();
    self.state = PlayerState::Idle;
    Ok(())
  }

  /// Callers stop any running timer first.
  fn start_autosave(&mut self, anime_id: AnimeId, episode: EpisodeNumber) {
    self.autosave = Some(Autosave::start(
      self.service.clone(),
      self.media.clone(),
      anime_id,
      episode,
      self.autosave_period,
    ));
  }

  async fn stop_autosave(&mut self) {
    if let Some(mut autosave) = self.autosave.take() {
      autosave.cancel().await;
    }
  }

  fn require_current(&self) -> Result<(AnimeId, EpisodeNumber)> {
    self.current.ok_or_else(|| eyre!("No episode is loaded"))
  }
}
