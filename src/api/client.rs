//! Hound backend HTTP client
//!
//! Wraps the JSON API under `/api/v1`. Every request carries the session
//! cookie and the `X-Client` header. Responses arrive wrapped as
//! `{"status": "success", "data": ...}`; errors as `{"error": "..."}`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::auth::{AuthObserver, NoopObserver};
use crate::models::{
    nullable_vec, EpisodeKey, EpisodeReference, MediaReference, MediaType, ProviderResult,
    Rewatch, SeasonEpisode, StreamCandidate, StreamProtocol, StreamSearchResponse, WatchAction,
    WatchProgress,
};

/// Default client identifier sent in `X-Client`
pub const DEFAULT_CLIENT_NAME: &str = "desktop";

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Session expired (401)")]
    SessionExpired,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    Server(u16),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::RequestFailed(err.to_string())
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Success envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
}

/// Error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireSearch {
    #[serde(default)]
    providers: Option<Vec<WireProvider>>,
}

#[derive(Debug, Deserialize)]
struct WireProvider {
    provider: String,
    #[serde(default)]
    streams: Option<Vec<WireStream>>,
}

/// Stream object as returned by the providers endpoint
#[derive(Debug, Deserialize)]
struct WireStream {
    encoded_data: String,
    #[serde(default, deserialize_with = "loose_flag")]
    cached: bool,
    #[serde(default)]
    p2p: String,
    #[serde(default)]
    resolution: String,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    data: Option<WireParsedData>,
}

#[derive(Debug, Deserialize)]
struct WireParsedData {
    #[serde(default)]
    codec: String,
    #[serde(default)]
    audio: Option<Vec<String>>,
}

impl WireStream {
    /// Convert API response to our StreamCandidate model
    fn into_candidate(self, provider_name: &str) -> StreamCandidate {
        let (codec, audio_tracks) = match self.data {
            Some(d) => (
                Some(d.codec).filter(|c| !c.is_empty()),
                d.audio.unwrap_or_default(),
            ),
            None => (None, Vec::new()),
        };
        StreamCandidate {
            encoded_data: self.encoded_data,
            stream_protocol: StreamProtocol::from_wire(&self.p2p),
            resolution: Some(self.resolution).filter(|r| !r.is_empty()),
            file_size: self.file_size.filter(|&s| s > 0),
            codec,
            audio_tracks,
            cached: self.cached,
            provider_name: provider_name.to_string(),
        }
    }
}

impl WireSearch {
    fn into_response(self) -> StreamSearchResponse {
        let providers = self
            .providers
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                let streams = p
                    .streams
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| s.into_candidate(&p.provider))
                    .collect();
                ProviderResult {
                    provider_name: p.provider,
                    streams,
                }
            })
            .collect();
        StreamSearchResponse { providers }
    }
}

/// Accepts `true`, `"true"` or anything else as false
fn loose_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[derive(Debug, Deserialize)]
struct WireSeason {
    #[serde(default)]
    season: Option<WireSeasonDetails>,
}

#[derive(Debug, Deserialize)]
struct WireSeasonDetails {
    #[serde(default, deserialize_with = "nullable_vec")]
    episodes: Vec<SeasonEpisode>,
}

/// Body for upserting watch progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackUpdate {
    pub current_progress_seconds: u64,
    pub total_duration_seconds: u64,
    pub encoded_data: String,
    pub stream_protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
}

/// Server acknowledgement of a progress upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct PlaybackAck {
    /// Server converted this report into a watch event
    #[serde(default)]
    pub watched: bool,
}

/// Body for appending a watch event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub action_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_ids: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<String>,
}

impl HistoryEntry {
    pub const WATCH: &'static str = "watch";

    /// Mark a movie watched
    pub fn movie(watched_at: Option<DateTime<Utc>>) -> Self {
        Self {
            action_type: Self::WATCH,
            episode_ids: None,
            season_number: None,
            episode_number: None,
            watched_at: watched_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Mark a single episode watched; the server keys episodes by `episode_id`
    pub fn episode(
        episode_id: u64,
        episode: &EpisodeReference,
        watched_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            action_type: Self::WATCH,
            episode_ids: Some(vec![episode_id]),
            season_number: Some(episode.season_number),
            episode_number: Some(episode.episode_number),
            watched_at: watched_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Mark a batch of episodes (by backend id) watched
    pub fn episodes(episode_ids: Vec<u64>, watched_at: Option<DateTime<Utc>>) -> Self {
        Self {
            action_type: Self::WATCH,
            episode_ids: Some(episode_ids),
            season_number: None,
            episode_number: None,
            watched_at: watched_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RewatchBody {
    rewatch_started_at: String,
}

/// Body for clearing progress; both unset clears every episode of a show
#[derive(Debug, Default, Serialize)]
struct ClearPlaybackBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    season_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode_number: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DeleteHistoryBody<'a> {
    watch_event_ids: &'a [i64],
}

/// The per-title watch action is not wrapped in `data`
#[derive(Debug, Deserialize)]
struct WatchActionBody {
    #[serde(default)]
    watch_action: Option<WatchAction>,
}

// =============================================================================
// Client
// =============================================================================

/// Hound backend client
#[derive(Clone)]
pub struct HoundClient {
    base_url: String,
    client: reqwest::Client,
    client_name: String,
    session_cookie: Option<String>,
    auth: Arc<dyn AuthObserver>,
}

impl HoundClient {
    /// Create a client for the given server (e.g. `http://localhost:2323`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            session_cookie: None,
            auth: Arc::new(NoopObserver),
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Cookie header value carrying the session credentials
    pub fn with_session_cookie(mut self, cookie: Option<String>) -> Self {
        self.session_cookie = cookie.filter(|c| !c.is_empty());
        self
    }

    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth = observer;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("X-Client", &self.client_name)
            .header("Accept", "application/json");
        match &self.session_cookie {
            Some(cookie) => builder.header(reqwest::header::COOKIE, cookie),
            None => builder,
        }
    }

    /// Send a request and map the status; returns the raw body on success
    async fn send(&self, builder: RequestBuilder) -> Result<String, ApiError> {
        let response = self.prepare(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED => {
                self.auth.session_expired();
                Err(ApiError::SessionExpired)
            }
            StatusCode::BAD_REQUEST => Err(ApiError::BadRequest(error_message(&body))),
            s if s.is_server_error() => {
                warn!(status = s.as_u16(), "server error from hound backend");
                Err(ApiError::Server(s.as_u16()))
            }
            s => Err(ApiError::Status(s.as_u16())),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let body = self.send(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("JSON parse error: {}", e)))
    }

    /// GET and unwrap the `data` field (null becomes `None`)
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        debug!(path, "GET");
        let envelope: Envelope<T> = self.fetch(self.client.get(self.url(path))).await?;
        Ok(envelope.data)
    }

    // -------------------------------------------------------------------------
    // Streams
    // -------------------------------------------------------------------------

    /// Search providers for a title (and episode, for shows)
    pub async fn search_providers(
        &self,
        reference: &MediaReference,
        episode: Option<&EpisodeReference>,
    ) -> Result<StreamSearchResponse, ApiError> {
        let mut path = format!("{}/providers", reference.api_path());
        if let Some(ep) = episode {
            path.push_str(&format!(
                "?season={}&episode={}",
                ep.season_number, ep.episode_number
            ));
        }
        let search: Option<WireSearch> = self.get_data(&path).await?;
        Ok(search
            .map(WireSearch::into_response)
            .unwrap_or_default())
    }

    /// Ask the server to add a p2p source before it can be streamed
    pub async fn materialize(&self, encoded_data: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/torrent/{}", urlencoding::encode(encoded_data));
        debug!(path, "POST");
        self.send(self.client.post(self.url(&path))).await?;
        Ok(())
    }

    /// Byte-stream URL handed to the player
    pub fn stream_url(&self, encoded_data: &str) -> String {
        self.url(&format!(
            "/api/v1/stream/{}",
            urlencoding::encode(encoded_data)
        ))
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Raw media details for the catalog view
    pub async fn media_details(
        &self,
        reference: &MediaReference,
    ) -> Result<serde_json::Value, ApiError> {
        let data: Option<serde_json::Value> = self.get_data(&reference.api_path()).await?;
        Ok(data.unwrap_or(serde_json::Value::Null))
    }

    /// Episodes of a season, ordered by episode number
    pub async fn season(
        &self,
        show: &MediaReference,
        season: u32,
    ) -> Result<Vec<SeasonEpisode>, ApiError> {
        let path = format!("{}/season/{}", show.api_path(), season);
        let data: Option<WireSeason> = self.get_data(&path).await?;
        let mut episodes = data
            .and_then(|s| s.season)
            .map(|s| s.episodes)
            .unwrap_or_default();
        episodes.sort_by_key(|e| e.episode_number);
        Ok(episodes)
    }

    // -------------------------------------------------------------------------
    // Progress
    // -------------------------------------------------------------------------

    /// Upsert progress for a movie or episode
    pub async fn set_playback(
        &self,
        reference: &MediaReference,
        update: &PlaybackUpdate,
    ) -> Result<PlaybackAck, ApiError> {
        let path = format!("{}/playback", reference.api_path());
        debug!(path, current = update.current_progress_seconds, "POST");
        self.fetch(self.client.post(self.url(&path)).json(update))
            .await
    }

    /// Progress records for every episode of a season
    pub async fn season_playback(
        &self,
        show: &MediaReference,
        season: u32,
    ) -> Result<Vec<WatchProgress>, ApiError> {
        let path = format!("{}/season/{}/playback", show.api_path(), season);
        Ok(self.get_data(&path).await?.unwrap_or_default())
    }

    /// Progress record for a movie, if any
    pub async fn movie_playback(
        &self,
        movie: &MediaReference,
    ) -> Result<Option<WatchProgress>, ApiError> {
        let path = format!("{}/playback", movie.api_path());
        self.get_data(&path).await
    }

    /// Drop progress records
    ///
    /// For shows, `episode` narrows the delete to one episode; `None` clears
    /// the whole show. Movies send no body.
    pub async fn delete_playback(
        &self,
        reference: &MediaReference,
        episode: Option<EpisodeKey>,
    ) -> Result<(), ApiError> {
        let path = format!("{}/playback", reference.api_path());
        debug!(path, "DELETE");
        let mut builder = self.client.delete(self.url(&path));
        if reference.media_type() == MediaType::TvShow {
            let body = episode
                .map(|k| ClearPlaybackBody {
                    season_number: Some(k.season),
                    episode_number: Some(k.episode),
                })
                .unwrap_or_default();
            builder = builder.json(&body);
        }
        self.send(builder).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Continue Watching
    // -------------------------------------------------------------------------

    /// One suggested action per title, across the library
    pub async fn continue_watching(&self) -> Result<Vec<WatchAction>, ApiError> {
        Ok(self
            .get_data("/api/v1/continue_watching")
            .await?
            .unwrap_or_default())
    }

    /// Suggested action for one title; `None` once there is nothing left
    pub async fn next_watch_action(
        &self,
        reference: &MediaReference,
    ) -> Result<Option<WatchAction>, ApiError> {
        let path = format!("{}/continue_watching", reference.api_path());
        debug!(path, "GET");
        let body: WatchActionBody = self.fetch(self.client.get(self.url(&path))).await?;
        Ok(body.watch_action)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Append a watch event
    pub async fn add_history(
        &self,
        reference: &MediaReference,
        entry: &HistoryEntry,
    ) -> Result<(), ApiError> {
        let path = format!("{}/history", reference.api_path());
        debug!(path, "POST");
        self.send(self.client.post(self.url(&path)).json(entry))
            .await?;
        Ok(())
    }

    /// Rewatches (with events) limited to one season
    pub async fn season_history(
        &self,
        show: &MediaReference,
        season: u32,
    ) -> Result<Vec<Rewatch>, ApiError> {
        let path = format!("{}/season/{}/history", show.api_path(), season);
        Ok(self.get_data(&path).await?.unwrap_or_default())
    }

    /// Every rewatch for a title
    pub async fn history(&self, reference: &MediaReference) -> Result<Vec<Rewatch>, ApiError> {
        let path = format!("{}/history", reference.api_path());
        Ok(self.get_data(&path).await?.unwrap_or_default())
    }

    /// Remove watch events by id
    pub async fn delete_history(
        &self,
        reference: &MediaReference,
        watch_event_ids: &[i64],
    ) -> Result<(), ApiError> {
        let path = format!("{}/history", reference.api_path());
        debug!(path, count = watch_event_ids.len(), "DELETE");
        let body = DeleteHistoryBody { watch_event_ids };
        self.send(self.client.delete(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }

    /// Open a new rewatch grouping for a show
    pub async fn start_rewatch(
        &self,
        show: &MediaReference,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Rewatch>, ApiError> {
        let path = format!("{}/history/rewatch", show.api_path());
        debug!(path, "POST");
        let mut builder = self.client.post(self.url(&path));
        if let Some(ts) = started_at {
            builder = builder.json(&RewatchBody {
                rewatch_started_at: ts.to_rfc3339(),
            });
        }
        let envelope: Envelope<Rewatch> = self.fetch(builder).await?;
        Ok(envelope.data)
    }
}

/// Pull the message out of an `{"error": ...}` body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { error }) => error.to_string(),
        Err(_) => body.trim().to_string(),
    }
}
