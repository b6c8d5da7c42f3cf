//! Domain types shared by the backend client and the caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::episodes::SelectedFilters;

/// Opaque numeric identifier of a tracked series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimeId(pub u64);

impl fmt::Display for AnimeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for AnimeId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim().parse().map(AnimeId)
  }
}

/// 1-based episode number.
pub type EpisodeNumber = u32;

/// Episode count assumed when the catalog does not know it.
pub const DEFAULT_EPISODE_COUNT: u32 = 12;

/// The user's list entry for an anime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListStatus {
  pub status: Option<String>,
  pub score: Option<u32>,
  pub episodes_watched: u32,
}

/// Anime record as needed by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeRecord {
  pub id: AnimeId,
  pub title: String,
  pub english_title: Option<String>,
  pub picture: Option<String>,
  /// Airing status, e.g. "currently_airing"
  pub status: Option<String>,
  pub num_episodes: Option<u32>,
  pub list_status: Option<ListStatus>,
}

impl AnimeRecord {
  /// English title if known, with the user's score appended when they rated it.
  pub fn display_title(&self) -> String {
    let title = self
      .english_title
      .as_deref()
      .filter(|t| !t.is_empty())
      .unwrap_or(&self.title);

    match self.list_status.as_ref().and_then(|s| s.score) {
      Some(score) if score >= 1 => format!("{} ({})", title, score),
      _ => title.to_string(),
    }
  }

  pub fn watch_status(&self) -> &str {
    self
      .list_status
      .as_ref()
      .and_then(|s| s.status.as_deref())
      .unwrap_or("not_in_list")
  }

  pub fn airing_status(&self) -> &str {
    self.status.as_deref().unwrap_or("unknown")
  }

  pub fn episode_count(&self) -> u32 {
    self
      .num_episodes
      .filter(|n| *n > 0)
      .unwrap_or(DEFAULT_EPISODE_COUNT)
  }
}

/// All anime known to the backend, keyed by id.
pub type AnimeCatalog = BTreeMap<AnimeId, AnimeRecord>;

/// Lineage groups: related seasons in display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lineages(pub BTreeMap<String, Vec<AnimeId>>);

impl Lineages {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Lineages with only the anime passing both filter sets, order preserved.
  ///
  /// Ids missing from the catalog are skipped. Groups left empty are kept so
  /// the caller can still lay out one slot per lineage.
  pub fn visible(
    &self,
    catalog: &AnimeCatalog,
    filters: &SelectedFilters,
  ) -> Vec<(String, Vec<AnimeId>)> {
    self
      .0
      .iter()
      .map(|(group, ids)| {
        let shown = ids
          .iter()
          .filter(|id| {
            catalog
              .get(id)
              .is_some_and(|anime| filters.accepts(anime.watch_status(), anime.airing_status()))
          })
          .copied()
          .collect();
        (group.clone(), shown)
      })
      .collect()
  }
}

/// Combined availability and airing data for one (anime, episode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeData {
  pub available_episodes: Vec<EpisodeNumber>,
  pub next_airing_date: Option<DateTime<Utc>>,
}

/// One selectable stream quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
  pub label: String,
  pub locator: String,
}

/// Where the user last was in a series. Persisted as `{episodeNumber, timestamp}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPointer {
  pub episode_number: EpisodeNumber,
  /// Unix milliseconds
  pub timestamp: i64,
}
