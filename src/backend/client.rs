use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::api_types::{
  decode, parse_available, parse_catalog, parse_lineages, ApiAnimeRefBody, ApiEpisodeData,
  ApiEpisodeRefBody, ApiErrorBody, ApiLastWatched, ApiLastWatchedAll, ApiPlaybackTime,
  ApiPlaybackTimeBody, ApiResolution,
};
use super::error::{BackendError, BackendResult};
use super::types::{
  AnimeCatalog, AnimeId, EpisodeData, EpisodeNumber, Lineages, Resolution, WatchPointer,
};
use super::Backend;
use crate::config::BackendConfig;

/// HTTP client for the anime backend
#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  base: Url,
}

impl BackendClient {
  pub fn new(config: &BackendConfig) -> Result<Self> {
    let mut base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid backend url {}: {}", config.url, e))?;
    // Joining relative paths keeps any path prefix of the base
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  fn url(&self, path: &str) -> BackendResult<Url> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| BackendError::validation(path, format!("bad request url: {e}")))
  }

  async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> BackendResult<reqwest::Response> {
    debug!(endpoint, "backend request");
    let response = request.send().await.map_err(|e| transport(endpoint, e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
      .map(|b| b.error)
      .unwrap_or_else(|_| {
        let body = body.trim();
        if body.is_empty() {
          status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
          body.to_string()
        }
      });

    Err(BackendError::Status {
      endpoint: endpoint.to_string(),
      status: status.as_u16(),
      message,
    })
  }

  async fn get_json(&self, endpoint: &str, url: Url) -> BackendResult<Value> {
    let response = self.send(endpoint, self.http.get(url)).await?;
    response.json::<Value>().await.map_err(|e| {
      if e.is_decode() {
        BackendError::validation(endpoint, format!("body is not JSON: {e}"))
      } else {
        transport(endpoint, e)
      }
    })
  }

  async fn get(&self, path: &str) -> BackendResult<Value> {
    self.get_json(path, self.url(path)?).await
  }

  async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> BackendResult<()> {
    self
      .send(path, self.http.post(self.url(path)?).json(body))
      .await
      .map(|_| ())
  }
}

fn transport(endpoint: &str, e: reqwest::Error) -> BackendError {
  if e.is_timeout() {
    BackendError::Timeout {
      endpoint: endpoint.to_string(),
    }
  } else {
    BackendError::Transport {
      endpoint: endpoint.to_string(),
      source: e,
    }
  }
}

#[async_trait]
impl Backend for BackendClient {
  async fn fetch_lineages(&self) -> BackendResult<Lineages> {
    let endpoint = "/lineage_data";
    parse_lineages(endpoint, self.get(endpoint).await?)
  }

  async fn fetch_animes(&self) -> BackendResult<AnimeCatalog> {
    let endpoint = "/animes";
    parse_catalog(endpoint, self.get(endpoint).await?)
  }

  async fn refresh_user_data(&self) -> BackendResult<()> {
    let endpoint = "/refresh_user_list_status";
    self
      .send(endpoint, self.http.get(self.url(endpoint)?))
      .await
      .map(|_| ())
  }

  async fn fetch_episode_data(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<EpisodeData> {
    let endpoint = format!("/api/get_episode_data/{}/{}", anime_id, episode);
    let raw: ApiEpisodeData = decode(&endpoint, self.get(&endpoint).await?)?;
    raw.validate(&endpoint)
  }

  async fn fetch_available_episodes(&self, anime_id: AnimeId) -> BackendResult<Vec<EpisodeNumber>> {
    let endpoint = format!("/check_available_episodes/{}", anime_id);
    parse_available(&endpoint, self.get(&endpoint).await?)
  }

  async fn fetch_resolutions(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Vec<Resolution>> {
    let endpoint = format!("/api/get_resolutions/{}/{}", anime_id, episode);
    let raw: Vec<ApiResolution> = decode(&endpoint, self.get(&endpoint).await?)?;
    Ok(raw.into_iter().map(Resolution::from).collect())
  }

  async fn save_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
    seconds: f64,
  ) -> BackendResult<()> {
    let body = ApiPlaybackTimeBody {
      mal_anime_id: anime_id,
      episode_number: episode,
      current_time: seconds,
    };
    self.post("/api/save_playback_time", &body).await
  }

  async fn get_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<Option<f64>> {
    let endpoint = "/api/get_playback_time";
    let mut url = self.url(endpoint)?;
    url
      .query_pairs_mut()
      .append_pair("malAnimeId", &anime_id.to_string())
      .append_pair("episodeNumber", &episode.to_string());

    let raw: ApiPlaybackTime = decode(endpoint, self.get_json(endpoint, url).await?)?;
    Ok(raw.current_time.filter(|t| t.is_finite() && *t >= 0.0))
  }

  async fn remove_playback_time(
    &self,
    anime_id: AnimeId,
    episode: EpisodeNumber,
  ) -> BackendResult<()> {
    let body = ApiEpisodeRefBody {
      mal_anime_id: anime_id,
      episode_number: episode,
    };
    self.post("/api/remove_playback_time", &body).await
  }

  async fn save_last_watched(&self, anime_id: AnimeId, episode: EpisodeNumber) -> BackendResult<()> {
    let body = ApiEpisodeRefBody {
      mal_anime_id: anime_id,
      episode_number: episode,
    };
    self.post("/api/save_last_watched", &body).await
  }

  async fn get_last_watched(&self, anime_id: AnimeId) -> BackendResult<Option<WatchPointer>> {
    let endpoint = "/api/get_last_watched";
    let mut url = self.url(endpoint)?;
    url
      .query_pairs_mut()
      .append_pair("malAnimeId", &anime_id.to_string());

    let raw: ApiLastWatched = decode(endpoint, self.get_json(endpoint, url).await?)?;
    Ok(raw.last_watched)
  }

  async fn clear_last_watched(&self, anime_id: AnimeId) -> BackendResult<()> {
    let body = ApiAnimeRefBody {
      mal_anime_id: anime_id,
    };
    self.post("/api/clear_last_watched", &body).await
  }

  async fn get_last_watched_all(&self) -> BackendResult<BTreeMap<AnimeId, WatchPointer>> {
    let endpoint = "/api/get_last_watched_all";
    let raw: ApiLastWatchedAll = decode(endpoint, self.get(endpoint).await?)?;

    Ok(
      raw
        .last_watched
        .into_iter()
        .filter_map(|(key, pointer)| match key.parse::<AnimeId>() {
          Ok(id) => Some((id, pointer)),
          Err(_) => {
            warn!(key = %key, "ignoring last-watched entry with non-numeric anime id");
            None
          }
        })
        .collect(),
    )
  }
}
