//! Session bootstrap: pull remote metadata, rebuild episode state from the
//! caches, then look for something to resume.
//!
//! The phases run strictly forward, once per session:
//! `Init -> FetchingRemote -> MergingLocal -> Ready`.

use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{
  AnimeCatalog, AnimeId, BackendError, BackendResult, EpisodeNumber, Lineages, DEFAULT_EPISODE_COUNT,
};
use crate::episodes::{countdown, Countdown, EpisodeCacheService, ResumeCandidate, SelectedFilters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Init,
  FetchingRemote,
  MergingLocal,
  Ready,
}

impl Phase {
  fn next(self) -> Option<Phase> {
    match self {
      Phase::Init => Some(Phase::FetchingRemote),
      Phase::FetchingRemote => Some(Phase::MergingLocal),
      Phase::MergingLocal => Some(Phase::Ready),
      Phase::Ready => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSource {
  Lineages,
  Animes,
  UserRefresh,
}

/// A failure worth telling the user about. Never fatal to the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub source: RemoteSource,
  pub message: String,
  pub transient: bool,
}

/// Everything the UI needs to draw one anime's episode list, from cache reads alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimeEpisodeState {
  pub episode_count: u32,
  /// Cached availability, empty if nothing is cached
  pub available: Vec<EpisodeNumber>,
  pub availability_fresh: bool,
  /// Episodes known not to be streamable. Empty when availability is unknown.
  pub unavailable: Vec<EpisodeNumber>,
  pub countdowns: Vec<(EpisodeNumber, Countdown)>,
  pub positions: Vec<(EpisodeNumber, f64)>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientState {
  pub lineages: Lineages,
  pub animes: AnimeCatalog,
  pub filters: Option<SelectedFilters>,
  /// Lineages narrowed by the saved filters, or all of them when none are saved
  pub visible: Vec<(String, Vec<AnimeId>)>,
  pub episodes: BTreeMap<AnimeId, AnimeEpisodeState>,
  pub notices: Vec<Notice>,
  pub resumable: Option<ResumeCandidate>,
}

/// One run of the bootstrap state machine.
pub struct Bootstrap {
  service: EpisodeCacheService,
  deadline: Option<Duration>,
  phase: Phase,
  history: Vec<Phase>,
}

impl Bootstrap {
  pub fn new(service: EpisodeCacheService) -> Self {
    Self {
      service,
      deadline: None,
      phase: Phase::Init,
      history: vec![Phase::Init],
    }
  }

  /// Give each remote fetch at most `deadline`; an overrun counts as a timeout.
  pub fn with_deadline(mut self, deadline: Duration) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// Phases entered so far, in order.
  pub fn history(&self) -> &[Phase] {
    &self.history
  }

  fn advance(&mut self, to: Phase) -> Result<()> {
    if self.phase.next() != Some(to) {
      return Err(eyre!("Invalid bootstrap transition {:?} -> {:?}", self.phase, to));
    }
    info!(from = ?self.phase, to = ?to, "bootstrap phase");
    self.phase = to;
    self.history.push(to);
    Ok(())
  }

  /// Drive the machine to `Ready`.
  pub async fn run(mut self) -> Result<(ClientState, Vec<Phase>)> {
    let mut state = ClientState::default();

    self.advance(Phase::FetchingRemote)?;
    self.fetch_remote(&mut state).await;

    self.advance(Phase::MergingLocal)?;
    self.merge_local(&mut state);

    self.advance(Phase::Ready)?;
    state.resumable = self.service.resolve_resumable();
    if let Some(candidate) = &state.resumable {
      info!(anime_id = %candidate.anime_id, episode = candidate.episode, "resumable episode");
    }

    Ok((state, self.history))
  }

  async fn fetch_remote(&self, state: &mut ClientState) {
    let backend = self.service.backend();
    let (lineages, animes, refreshed) = tokio::join!(
      self.bounded("lineage data", backend.fetch_lineages()),
      self.bounded("animes", backend.fetch_animes()),
      self.bounded("user data refresh", backend.refresh_user_data()),
    );

    match lineages {
      Ok(lineages) => state.lineages = lineages,
      Err(e) => state.notices.push(notice(RemoteSource::Lineages, e)),
    }
    match animes {
      Ok(animes) => state.animes = animes,
      Err(e) => state.notices.push(notice(RemoteSource::Animes, e)),
    }
    if let Err(e) = refreshed {
      state.notices.push(notice(RemoteSource::UserRefresh, e));
    }

    debug!(
      lineages = state.lineages.len(),
      animes = state.animes.len(),
      notices = state.notices.len(),
      "remote fetch complete"
    );
  }

  async fn bounded<T>(
    &self,
    endpoint: &str,
    fut: impl Future<Output = BackendResult<T>>,
  ) -> BackendResult<T> {
    match self.deadline {
      Some(deadline) => match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
          endpoint: endpoint.to_string(),
        }),
      },
      None => fut.await,
    }
  }

  fn merge_local(&self, state: &mut ClientState) {
    state.filters = self.service.filters();
    state.visible = match &state.filters {
      Some(filters) => state.lineages.visible(&state.animes, filters),
      None => state
        .lineages
        .0
        .iter()
        .map(|(group, ids)| (group.clone(), ids.clone()))
        .collect(),
    };

    let ids: BTreeSet<AnimeId> = state
      .animes
      .keys()
      .copied()
      .chain(state.lineages.0.values().flatten().copied())
      .collect();

    let now = self.service.clock().now();
    for anime_id in ids {
      let episode_count = state
        .animes
        .get(&anime_id)
        .map(|a| a.episode_count())
        .unwrap_or(DEFAULT_EPISODE_COUNT);

      let availability = self.service.get_availability(anime_id);
      let (available, availability_fresh, unavailable) = match availability {
        Some(a) => {
          let unavailable = (1..=episode_count).filter(|e| !a.contains(*e)).collect();
          (a.episodes, a.is_fresh, unavailable)
        }
        None => (Vec::new(), false, Vec::new()),
      };

      let countdowns = self
        .service
        .airing()
        .all_for(anime_id)
        .into_iter()
        .map(|(episode, target)| (episode, countdown(target, now)))
        .collect();

      state.episodes.insert(
        anime_id,
        AnimeEpisodeState {
          episode_count,
          available,
          availability_fresh,
          unavailable,
          countdowns,
          positions: self.service.positions().all_for(anime_id),
        },
      );
    }
  }
}

fn notice(source: RemoteSource, err: BackendError) -> Notice {
  warn!(?source, error = %err, "bootstrap fetch failed");
  Notice {
    source,
    transient: err.is_transient(),
    message: err.to_string(),
  }
}
