//! Data structures shared across the Hound client
//!
//! Organized by domain:
//! - **Media**: media/episode references identifying a title on the backend
//! - **Streams**: provider search results and stream candidates
//! - **Progress**: per-episode/movie playback position records
//! - **History**: watch events grouped into rewatches
//! - **Continue Watching**: the server's next watch action per title
//! - **Catalog**: season episode listings used for play decisions

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

// =============================================================================
// Media References
// =============================================================================

/// Media type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    #[serde(alias = "tv")]
    TvShow,
    Game,
}

impl MediaType {
    /// URL path segment used by the backend routes
    pub fn path_segment(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::TvShow => "tv",
            MediaType::Game => "game",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Movie => write!(f, "Movie"),
            MediaType::TvShow => write!(f, "TV Show"),
            MediaType::Game => write!(f, "Game"),
        }
    }
}

/// Errors from parsing or constructing references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Invalid media id '{0}' (expected source-id, e.g. tmdb-1399)")]
    InvalidMediaId(String),
    #[error("Episode numbers start at 1")]
    InvalidEpisodeNumber,
}

fn media_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([a-z0-9]+)-(\S+)$").ok())
        .as_ref()
}

/// Identifies a title within a provider namespace (e.g. `tmdb-1399`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    media_type: MediaType,
    media_source: String,
    source_id: String,
}

impl MediaReference {
    pub fn new(
        media_type: MediaType,
        media_source: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            media_type,
            media_source: media_source.into(),
            source_id: source_id.into(),
        }
    }

    /// Parse a `source-id` string such as `tmdb-1399`
    pub fn parse(media_type: MediaType, id: &str) -> Result<Self, ReferenceError> {
        let caps = media_id_pattern()
            .and_then(|re| re.captures(id.trim()))
            .ok_or_else(|| ReferenceError::InvalidMediaId(id.to_string()))?;
        Ok(Self::new(media_type, &caps[1], &caps[2]))
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn media_source(&self) -> &str {
        &self.media_source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// `{source}-{id}` as used in backend URL paths
    pub fn path_id(&self) -> String {
        format!("{}-{}", self.media_source, self.source_id)
    }

    /// `/api/v1/{movie|tv|game}/{source}-{id}`
    pub fn api_path(&self) -> String {
        format!(
            "/api/v1/{}/{}",
            self.media_type.path_segment(),
            self.path_id()
        )
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.media_type, self.path_id())
    }
}

/// Episode of a TV show. Season 0 holds specials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeReference {
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_source_id: String,
}

impl EpisodeReference {
    pub fn new(
        season_number: u32,
        episode_number: u32,
        episode_source_id: impl Into<String>,
    ) -> Result<Self, ReferenceError> {
        if episode_number == 0 {
            return Err(ReferenceError::InvalidEpisodeNumber);
        }
        Ok(Self {
            season_number,
            episode_number,
            episode_source_id: episode_source_id.into(),
        })
    }

    /// `(season, episode)` pair used to match progress and watch events
    pub fn key(&self) -> EpisodeKey {
        EpisodeKey {
            season: self.season_number,
            episode: self.episode_number,
        }
    }

    /// Numeric backend id, if known
    pub fn backend_id(&self) -> Option<u64> {
        self.episode_source_id.trim().parse().ok()
    }
}

impl fmt::Display for EpisodeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season_number, self.episode_number)
    }
}

/// Season/episode coordinates without the source id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeKey {
    pub season: u32,
    pub episode: u32,
}

// =============================================================================
// Stream Models
// =============================================================================

/// How a candidate is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Peer-to-peer; must be materialized on the server before streaming
    P2p,
    #[default]
    #[serde(other)]
    Direct,
}

impl StreamProtocol {
    /// Map the backend's free-form protocol string
    pub fn from_wire(s: &str) -> Self {
        if s.eq_ignore_ascii_case("p2p") {
            StreamProtocol::P2p
        } else {
            StreamProtocol::Direct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::P2p => "p2p",
            StreamProtocol::Direct => "direct",
        }
    }
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One playable option returned by a provider search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCandidate {
    /// Opaque backend token; round-tripped verbatim
    pub encoded_data: String,
    pub stream_protocol: StreamProtocol,
    pub resolution: Option<String>,
    pub file_size: Option<u64>,
    pub codec: Option<String>,
    #[serde(default)]
    pub audio_tracks: Vec<String>,
    pub cached: bool,
    pub provider_name: String,
}

impl StreamCandidate {
    /// Format size for display
    pub fn format_size(&self) -> String {
        match self.file_size {
            Some(bytes) if bytes >= 1024 * 1024 * 1024 => {
                format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
            }
            Some(bytes) if bytes >= 1024 * 1024 => {
                format!("{:.0} MB", bytes as f64 / (1024.0 * 1024.0))
            }
            Some(bytes) => format!("{} KB", bytes / 1024),
            None => "? GB".to_string(),
        }
    }
}

impl fmt::Display for StreamCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}{}",
            self.resolution.as_deref().unwrap_or("???"),
            self.format_size(),
            self.codec.as_deref().unwrap_or("-"),
            self.stream_protocol,
            if self.cached { " (cached)" } else { "" }
        )
    }
}

/// Candidates from a single provider, in the provider's ranking order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_name: String,
    pub streams: Vec<StreamCandidate>,
}

/// Position of a candidate inside a [`StreamSearchResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIndex {
    pub provider: usize,
    pub stream: usize,
}

/// Full provider search result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamSearchResponse {
    pub providers: Vec<ProviderResult>,
}

impl StreamSearchResponse {
    /// All candidates in provider order, with their indices
    pub fn candidates(&self) -> impl Iterator<Item = (CandidateIndex, &StreamCandidate)> {
        self.providers.iter().enumerate().flat_map(|(p, provider)| {
            provider.streams.iter().enumerate().map(move |(s, stream)| {
                (
                    CandidateIndex {
                        provider: p,
                        stream: s,
                    },
                    stream,
                )
            })
        })
    }

    pub fn candidate_count(&self) -> usize {
        self.providers.iter().map(|p| p.streams.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.candidate_count() == 0
    }

    pub fn get(&self, index: CandidateIndex) -> Option<&StreamCandidate> {
        self.providers.get(index.provider)?.streams.get(index.stream)
    }

    /// Candidate at a flat position (as listed by [`Self::candidates`])
    pub fn nth(&self, n: usize) -> Option<(CandidateIndex, &StreamCandidate)> {
        self.candidates().nth(n)
    }

    /// Locate a candidate by its encoded data anywhere in the result
    pub fn find_encoded(&self, encoded_data: &str) -> Option<CandidateIndex> {
        self.candidates()
            .find(|(_, c)| c.encoded_data == encoded_data)
            .map(|(i, _)| i)
    }

    /// Default pick: a candidate matching `expected_encoded_data` if present,
    /// otherwise the first candidate in provider order.
    pub fn default_index(&self, expected_encoded_data: Option<&str>) -> Option<CandidateIndex> {
        expected_encoded_data
            .and_then(|enc| self.find_encoded(enc))
            .or_else(|| self.candidates().next().map(|(i, _)| i))
    }
}

// =============================================================================
// Progress Models
// =============================================================================

/// Furthest playback point of the current rewatch cycle for one movie/episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchProgress {
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub media_source: String,
    #[serde(default)]
    pub source_id: String,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub episode_id: Option<String>,
    pub current_progress_seconds: f64,
    pub total_duration_seconds: f64,
    #[serde(default)]
    pub encoded_data: String,
    #[serde(default)]
    pub stream_protocol: String,
    pub last_watched_at: Option<i64>,
}

impl WatchProgress {
    pub fn episode_key(&self) -> Option<EpisodeKey> {
        Some(EpisodeKey {
            season: self.season_number?,
            episode: self.episode_number?,
        })
    }

    /// Position clamped to the total duration
    pub fn clamped_position(&self) -> f64 {
        self.current_progress_seconds
            .clamp(0.0, self.total_duration_seconds.max(0.0))
    }

    /// Started but not finished
    pub fn is_in_progress(&self) -> bool {
        self.current_progress_seconds > 0.0
            && self.current_progress_seconds < self.total_duration_seconds
    }

    /// Fraction watched in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total_duration_seconds <= 0.0 {
            return 0.0;
        }
        self.clamped_position() / self.total_duration_seconds
    }
}

impl fmt::Display for WatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({:.0}%)",
            format_seconds(self.clamped_position()),
            format_seconds(self.total_duration_seconds),
            self.fraction() * 100.0
        )
    }
}

/// Format seconds as HH:MM:SS or MM:SS
pub fn format_seconds(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let s = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, s)
    } else {
        format!("{:02}:{:02}", mins, s)
    }
}

// =============================================================================
// History Models
// =============================================================================

/// Immutable record appended when a movie/episode is marked watched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Backend id, needed to delete the event
    #[serde(default)]
    pub watch_event_id: i64,
    #[serde(default)]
    pub source_id: String,
    pub watched_at: DateTime<Utc>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub watch_type: Option<String>,
}

impl WatchEvent {
    pub fn episode_key(&self) -> Option<EpisodeKey> {
        Some(EpisodeKey {
            season: self.season_number?,
            episode: self.episode_number?,
        })
    }
}

/// Grouping boundary for watch events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewatch {
    #[serde(default)]
    pub rewatch_id: i64,
    pub rewatch_started_at: DateTime<Utc>,
    /// Unset (or the zero timestamp) while the rewatch is still open
    #[serde(default, deserialize_with = "unset_time")]
    pub rewatch_finished_at: Option<DateTime<Utc>>,
    /// The backend sends `null` for a rewatch without events
    #[serde(default, deserialize_with = "nullable_vec")]
    pub watch_events: Vec<WatchEvent>,
}

impl Rewatch {
    pub fn is_finished(&self) -> bool {
        self.rewatch_finished_at.is_some()
    }
}

/// Accepts `null` where a list is expected
pub(crate) fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Maps `null` and the zero timestamp (`0001-01-01T00:00:00Z`) to `None`
fn unset_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|t| t.year() > 1))
}

/// Rewatch with the greatest start time
pub fn latest_rewatch(rewatches: &[Rewatch]) -> Option<&Rewatch> {
    rewatches.iter().max_by_key(|r| r.rewatch_started_at)
}

// =============================================================================
// Continue Watching Models
// =============================================================================

/// Kind of action the server suggests for a title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchActionType {
    NextEpisode,
    Resume,
}

/// Episode the server suggests playing next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextEpisode {
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub episode_id: Option<String>,
}

/// Continue watching tile: one per title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchAction {
    pub media_type: MediaType,
    pub media_source: String,
    pub source_id: String,
    pub watch_action_type: WatchActionType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub air_date: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub next_episode: Option<NextEpisode>,
    #[serde(default)]
    pub watch_progress: Option<WatchProgress>,
}

impl WatchAction {
    pub fn reference(&self) -> MediaReference {
        MediaReference::new(self.media_type, &self.media_source, &self.source_id)
    }

    /// Episode the action points at, from whichever payload it carries
    pub fn episode(&self) -> Option<EpisodeReference> {
        match self.watch_action_type {
            WatchActionType::NextEpisode => {
                let next = self.next_episode.as_ref()?;
                EpisodeReference::new(
                    next.season_number?,
                    next.episode_number?,
                    next.episode_id.clone().unwrap_or_default(),
                )
                .ok()
            }
            WatchActionType::Resume => {
                let progress = self.watch_progress.as_ref()?;
                EpisodeReference::new(
                    progress.season_number?,
                    progress.episode_number?,
                    progress.episode_id.clone().unwrap_or_default(),
                )
                .ok()
            }
        }
    }
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.episode() {
            Some(ep) => format!("{} {}", self.reference().path_id(), ep),
            None => self.reference().path_id(),
        };
        match (self.watch_action_type, &self.watch_progress) {
            (WatchActionType::Resume, Some(p)) => write!(
                f,
                "Resume {} at {}",
                what,
                format_seconds(p.clamped_position())
            ),
            (WatchActionType::Resume, None) => write!(f, "Resume {}", what),
            (WatchActionType::NextEpisode, _) => write!(f, "Next episode {}", what),
        }
    }
}

// =============================================================================
// Catalog Models
// =============================================================================

/// Episode as listed in a season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonEpisode {
    /// Backend (e.g. TMDB) unique id of the episode
    pub id: u64,
    pub season_number: u32,
    pub episode_number: u32,
    #[serde(default)]
    pub name: String,
    pub runtime: Option<u32>,
}

impl SeasonEpisode {
    pub fn key(&self) -> EpisodeKey {
        EpisodeKey {
            season: self.season_number,
            episode: self.episode_number,
        }
    }

    pub fn reference(&self) -> EpisodeReference {
        EpisodeReference {
            season_number: self.season_number,
            episode_number: self.episode_number.max(1),
            episode_source_id: self.id.to_string(),
        }
    }
}

impl fmt::Display for SeasonEpisode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S{:02}E{:02} - {}",
            self.season_number, self.episode_number, self.name
        )
    }
}
