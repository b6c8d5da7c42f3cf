//! Serde-deserializable types matching backend responses, plus the validation
//! that turns them into domain types.
//!
//! Nothing parsed from the wire is trusted past this module: every response is
//! checked here and either becomes a domain value or a `BackendError::Validation`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use super::error::{BackendError, BackendResult};
use super::types::{
  AnimeCatalog, AnimeId, AnimeRecord, EpisodeData, EpisodeNumber, Lineages, ListStatus, Resolution,
  WatchPointer,
};
use crate::episodes::locator;

/// Deserialize a JSON value, reporting shape mismatches as validation errors.
pub fn decode<T: DeserializeOwned>(endpoint: &str, value: Value) -> BackendResult<T> {
  serde_json::from_value(value).map_err(|e| BackendError::validation(endpoint, e.to_string()))
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPicture {
  pub medium: Option<String>,
  pub large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAlternativeTitles {
  pub en: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiListStatus {
  pub status: Option<String>,
  pub score: Option<u32>,
  #[serde(default)]
  pub num_episodes_watched: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApiAnime {
  pub id: u64,
  #[serde(default)]
  pub title: String,
  pub alternative_titles: Option<ApiAlternativeTitles>,
  pub main_picture: Option<ApiPicture>,
  pub status: Option<String>,
  pub num_episodes: Option<u32>,
  pub my_list_status: Option<ApiListStatus>,
}

impl From<ApiAnime> for AnimeRecord {
  fn from(a: ApiAnime) -> Self {
    AnimeRecord {
      id: AnimeId(a.id),
      title: a.title,
      english_title: a.alternative_titles.and_then(|t| t.en),
      picture: a.main_picture.and_then(|p| p.large.or(p.medium)),
      status: a.status,
      num_episodes: a.num_episodes,
      list_status: a.my_list_status.map(|s| ListStatus {
        status: s.status,
        score: s.score,
        episodes_watched: s.num_episodes_watched,
      }),
    }
  }
}

/// `/animes`: object of id -> anime record.
pub fn parse_catalog(endpoint: &str, value: Value) -> BackendResult<AnimeCatalog> {
  let raw: BTreeMap<String, ApiAnime> = decode(endpoint, value)?;
  raw
    .into_iter()
    .map(|(key, anime)| {
      let key_id: AnimeId = key
        .parse()
        .map_err(|_| BackendError::validation(endpoint, format!("anime key {key:?} is not an id")))?;
      if key_id.0 != anime.id {
        return Err(BackendError::validation(
          endpoint,
          format!("anime key {} does not match record id {}", key_id, anime.id),
        ));
      }
      Ok((key_id, AnimeRecord::from(anime)))
    })
    .collect()
}

/// `/lineage_data`: object of group id -> ordered list of anime ids.
pub fn parse_lineages(endpoint: &str, value: Value) -> BackendResult<Lineages> {
  decode(endpoint, value)
}

// ============================================================================
// Episode data
// ============================================================================

/// Combined episode data response, fields left raw until validated.
#[derive(Debug, Deserialize)]
pub struct ApiEpisodeData {
  #[serde(rename = "availableEpisodes", default)]
  pub available_episodes: Value,
  #[serde(rename = "nextAiringDate", default)]
  pub next_airing_date: Value,
}

impl ApiEpisodeData {
  pub fn validate(self, endpoint: &str) -> BackendResult<EpisodeData> {
    Ok(EpisodeData {
      available_episodes: parse_available(endpoint, self.available_episodes)?,
      next_airing_date: parse_airing_date(endpoint, self.next_airing_date)?,
    })
  }
}

/// Availability list: numbers or stream locators, reduced to sorted unique episode numbers.
///
/// A missing or null list means "nothing available"; any other non-list is rejected.
pub fn parse_available(endpoint: &str, value: Value) -> BackendResult<Vec<EpisodeNumber>> {
  let items = match value {
    Value::Null => return Ok(Vec::new()),
    Value::Array(items) => items,
    other => {
      return Err(BackendError::validation(
        endpoint,
        format!("availableEpisodes should be a list, got {}", json_kind(&other)),
      ))
    }
  };

  let mut episodes: Vec<EpisodeNumber> = items
    .iter()
    .filter_map(|item| {
      let n = locator::episode_number(item);
      if n.is_none() {
        warn!(endpoint, locator = %item, "no episode number in locator, skipping");
      }
      n
    })
    .collect();
  episodes.sort_unstable();
  episodes.dedup();
  Ok(episodes)
}

/// ISO-8601 timestamp or null. Naive timestamps are taken as UTC.
pub fn parse_airing_date(endpoint: &str, value: Value) -> BackendResult<Option<DateTime<Utc>>> {
  match value {
    Value::Null => Ok(None),
    Value::String(s) if s.trim().is_empty() => Ok(None),
    Value::String(s) => parse_iso8601(&s)
      .map(Some)
      .ok_or_else(|| BackendError::validation(endpoint, format!("unreadable nextAiringDate {s:?}"))),
    other => Err(BackendError::validation(
      endpoint,
      format!("nextAiringDate should be a string or null, got {}", json_kind(&other)),
    )),
  }
}

fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
    .or_else(|| {
      NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
    })
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "a list",
    Value::Object(_) => "an object",
  }
}

// ============================================================================
// Resolutions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiResolution {
  pub resolution: String,
  pub url: String,
}

impl From<ApiResolution> for Resolution {
  fn from(r: ApiResolution) -> Self {
    Resolution {
      label: r.resolution,
      locator: r.url,
    }
  }
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPlaybackTimeBody {
  pub mal_anime_id: AnimeId,
  pub episode_number: EpisodeNumber,
  pub current_time: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEpisodeRefBody {
  pub mal_anime_id: AnimeId,
  pub episode_number: EpisodeNumber,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAnimeRefBody {
  pub mal_anime_id: AnimeId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPlaybackTime {
  pub current_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLastWatched {
  pub last_watched: Option<WatchPointer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLastWatchedAll {
  #[serde(default)]
  pub last_watched: BTreeMap<String, WatchPointer>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const EP: &str = "/api/get_episode_data/42/1";

  #[test]
  fn test_episode_data_from_locators() {
    let raw: ApiEpisodeData = serde_json::from_value(json!({
      "availableEpisodes": ["https://x/ep?n=2", "https://x/ep?n=1", "https://x/ep?n=2"],
      "nextAiringDate": null
    }))
    .unwrap();

    let data = raw.validate(EP).unwrap();
    assert_eq!(data.available_episodes, vec![1, 2]);
    assert_eq!(data.next_airing_date, None);
  }

  #[test]
  fn test_missing_fields_mean_empty() {
    let raw: ApiEpisodeData = serde_json::from_value(json!({})).unwrap();
    let data = raw.validate(EP).unwrap();
    assert!(data.available_episodes.is_empty());
    assert!(data.next_airing_date.is_none());
  }

  #[test]
  fn test_non_list_availability_is_validation_error() {
    let err = parse_available(EP, json!({"1": "x"})).unwrap_err();
    assert!(err.is_validation());
    assert!(!err.is_transient());
  }

  #[test]
  fn test_airing_date_formats() {
    let utc = parse_airing_date(EP, json!("2025-03-01T00:00:00Z")).unwrap();
    let naive = parse_airing_date(EP, json!("2025-03-01T00:00:00")).unwrap();
    let offset = parse_airing_date(EP, json!("2025-03-01T09:00:00+09:00")).unwrap();
    assert_eq!(utc, naive);
    assert_eq!(utc, offset);
    assert!(parse_airing_date(EP, json!("tomorrow")).is_err());
    assert!(parse_airing_date(EP, json!(12)).is_err());
    assert_eq!(parse_airing_date(EP, json!("")).unwrap(), None);
  }

  #[test]
  fn test_parse_catalog() {
    let catalog = parse_catalog(
      "/animes",
      json!({
        "42": {
          "id": 42,
          "title": "Sousou no Frieren",
          "alternative_titles": {"en": "Frieren"},
          "main_picture": {"medium": "m.jpg", "large": "l.jpg"},
          "status": "finished_airing",
          "num_episodes": 28,
          "my_list_status": {"status": "watching", "score": 9, "num_episodes_watched": 3}
        }
      }),
    )
    .unwrap();

    let anime = &catalog[&AnimeId(42)];
    assert_eq!(anime.display_title(), "Frieren (9)");
    assert_eq!(anime.picture.as_deref(), Some("l.jpg"));
    assert_eq!(anime.episode_count(), 28);
  }

  #[test]
  fn test_catalog_key_mismatch_rejected() {
    let err = parse_catalog("/animes", json!({"1": {"id": 2, "title": "x"}})).unwrap_err();
    assert!(err.is_validation());
  }

  #[test]
  fn test_parse_lineages() {
    let lineages = parse_lineages("/lineage_data", json!({"g1": [1, 2], "g2": [3]})).unwrap();
    assert_eq!(lineages.0["g1"], vec![AnimeId(1), AnimeId(2)]);
    assert!(parse_lineages("/lineage_data", json!([1, 2])).is_err());
  }
}
