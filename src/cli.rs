//! CLI - Command Line Interface for the Hound client
//!
//! Every workflow is scriptable. All output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # What would the play button do?
//! hound next tv tmdb-1399 --season 1
//!
//! # List candidates and play one
//! hound streams tv tmdb-1399 -s 1 -e 3
//! hound play tv tmdb-1399 -s 1 -e 3 --pick 2
//!
//! # Record progress and history
//! hound progress movie tmdb-603 --position 1200 --duration 8160 --stream <encoded>
//! hound watched tv tmdb-1399 --episode-ids 63056,63057
//! hound rewatch tmdb-1399 --yes
//!
//! # Undo
//! hound forget tv tmdb-1399 -s 1 -e 3
//! hound unwatch tv tmdb-1399 --event-ids 812,813
//!
//! # Pick up where you left off
//! hound continue
//! ```

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::error::HoundError;
use crate::models::{EpisodeReference, MediaReference, MediaType, ReferenceError};
use crate::stream::PlayerType;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Local player not found
    PlayerNotFound = 4,
    /// No streams available
    NoStreams = 5,
    /// P2P source could not be materialized
    SourceUnavailable = 6,
    /// Session expired; log in again
    SessionExpired = 7,
}

impl ExitCode {
    /// Exit code for a workflow error
    pub fn from_error(err: &HoundError) -> Self {
        match err {
            e if e.is_session_expired() => ExitCode::SessionExpired,
            HoundError::NoStreamsFound => ExitCode::NoStreams,
            HoundError::SourceUnavailable(_) => ExitCode::SourceUnavailable,
            HoundError::ProviderSearch(_) | HoundError::Api(_) => ExitCode::NetworkError,
            _ => ExitCode::Error,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Hound - stream, resume and track your media library
#[derive(Parser, Debug)]
#[command(
    name = "hound",
    version,
    about = "Scriptable client for the Hound media server",
    long_about = "Resolve streams, play them locally and keep watch history \
                  in sync with a Hound server.",
    after_help = "EXAMPLES:\n\
                  hound continue                        Continue watching\n\
                  hound next tv tmdb-1399 -s 1          What to play next\n\
                  hound streams movie tmdb-603          List stream candidates\n\
                  hound play tv tmdb-1399 -s 1 -e 3     Play an episode\n\
                  hound history tv tmdb-1399 --json     Watch history"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Get details for a movie or show
    #[command(visible_alias = "i")]
    Info(InfoCmd),

    /// List stream candidates for a movie or episode
    #[command(visible_alias = "st")]
    Streams(StreamsCmd),

    /// Resolve a stream and play it locally
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Report a playback position
    Progress(ProgressCmd),

    /// Mark a movie or episodes watched
    Watched(WatchedCmd),

    /// Show what the play button would do
    Next(NextCmd),

    /// List watch history grouped by rewatch
    #[command(visible_alias = "h")]
    History(HistoryCmd),

    /// Start a new rewatch of a show
    Rewatch(RewatchCmd),

    /// Show what to watch next, for one title or the whole library
    #[command(visible_alias = "c")]
    Continue(ContinueCmd),

    /// Clear saved playback progress
    Forget(ForgetCmd),

    /// Delete watch events from history
    Unwatch(UnwatchCmd),
}

// =============================================================================
// Shared Arguments
// =============================================================================

/// Media type as typed on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Tv,
    Game,
}

impl From<MediaKind> for MediaType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Movie => MediaType::Movie,
            MediaKind::Tv => MediaType::TvShow,
            MediaKind::Game => MediaType::Game,
        }
    }
}

/// Title identification: `<kind> <source-id>`
#[derive(Args, Debug, Clone)]
pub struct TitleArgs {
    /// Media type
    #[arg(value_enum)]
    pub kind: MediaKind,

    /// Source-prefixed id (e.g., tmdb-1399)
    pub id: String,
}

impl TitleArgs {
    pub fn reference(&self) -> Result<MediaReference, ReferenceError> {
        MediaReference::parse(self.kind.into(), &self.id)
    }
}

/// Episode selection for shows
#[derive(Args, Debug, Clone, Default)]
pub struct EpisodeArgs {
    /// Season number
    #[arg(long, short = 's')]
    pub season: Option<u32>,

    /// Episode number
    #[arg(long, short = 'e')]
    pub episode: Option<u32>,

    /// Backend episode id (optional, used when marking watched)
    #[arg(long)]
    pub episode_id: Option<String>,
}

impl EpisodeArgs {
    /// Episode reference if both season and episode were given
    pub fn reference(&self) -> Result<Option<EpisodeReference>, ReferenceError> {
        match (self.season, self.episode) {
            (Some(season), Some(episode)) => EpisodeReference::new(
                season,
                episode,
                self.episode_id.clone().unwrap_or_default(),
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

/// Local player selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerChoice {
    /// VLC media player (default)
    #[default]
    Vlc,
    /// mpv media player
    Mpv,
}

impl From<PlayerChoice> for PlayerType {
    fn from(choice: PlayerChoice) -> Self {
        match choice {
            PlayerChoice::Vlc => PlayerType::Vlc,
            PlayerChoice::Mpv => PlayerType::Mpv,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Get the catalog entry for a title
#[derive(Args, Debug)]
pub struct InfoCmd {
    #[command(flatten)]
    pub title: TitleArgs,
}

/// List every candidate the providers return (select mode)
#[derive(Args, Debug)]
pub struct StreamsCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    #[command(flatten)]
    pub episode: EpisodeArgs,

    /// Encoded data of the stream watched last, to mark as default
    #[arg(long)]
    pub prefer: Option<String>,
}

/// Play a movie or episode in a local player
#[derive(Args, Debug)]
pub struct PlayCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    // Omitted for shows means "what's next"
    #[command(flatten)]
    pub episode: EpisodeArgs,

    /// Play the candidate at this position of `streams` instead of the default
    #[arg(long)]
    pub pick: Option<usize>,

    /// Start at this position (seconds) instead of the resume point
    #[arg(long)]
    pub from: Option<f64>,

    /// Local player (overrides config)
    #[arg(long, value_enum)]
    pub player: Option<PlayerChoice>,
}

/// Report the current position of a stream played elsewhere
#[derive(Args, Debug)]
pub struct ProgressCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    #[command(flatten)]
    pub episode: EpisodeArgs,

    /// Current position in seconds
    #[arg(long)]
    pub position: f64,

    /// Total duration in seconds
    #[arg(long)]
    pub duration: f64,

    /// Encoded data of the stream being played
    #[arg(long)]
    pub stream: String,

    /// Stream is peer-to-peer
    #[arg(long)]
    pub p2p: bool,
}

/// Append watch events
#[derive(Args, Debug)]
pub struct WatchedCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    /// Backend episode ids, comma-separated (required for shows)
    #[arg(long, value_delimiter = ',')]
    pub episode_ids: Vec<u64>,

    /// When it was watched (RFC 3339, default now)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

/// Show the default play action
#[derive(Args, Debug)]
pub struct NextCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    /// Season to inspect (shows only)
    #[arg(long, short = 's', default_value = "1")]
    pub season: u32,
}

/// List rewatches and their watch events
#[derive(Args, Debug)]
pub struct HistoryCmd {
    #[command(flatten)]
    pub title: TitleArgs,
}

/// Start a new rewatch; history is kept but "watched" resets
#[derive(Args, Debug)]
pub struct RewatchCmd {
    /// Show id (e.g., tmdb-1399)
    pub id: String,

    /// Confirm starting the rewatch
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Rewatch start time (RFC 3339, default now)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

/// Continue watching, optionally for a single title
#[derive(Args, Debug)]
pub struct ContinueCmd {
    /// Media type (with an id, limits the answer to one title)
    #[arg(value_enum, requires = "id")]
    pub kind: Option<MediaKind>,

    /// Source-prefixed id (e.g., tmdb-1399)
    pub id: Option<String>,
}

impl ContinueCmd {
    /// The single title asked about, if any
    pub fn reference(&self) -> Result<Option<MediaReference>, ReferenceError> {
        match (self.kind, self.id.as_deref()) {
            (Some(kind), Some(id)) => MediaReference::parse(kind.into(), id).map(Some),
            _ => Ok(None),
        }
    }
}

/// Drop progress records; for shows without -s/-e the whole show is cleared
#[derive(Args, Debug)]
pub struct ForgetCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    #[command(flatten)]
    pub episode: EpisodeArgs,
}

/// Delete watch events by id (as listed by `history`)
#[derive(Args, Debug)]
pub struct UnwatchCmd {
    #[command(flatten)]
    pub title: TitleArgs,

    /// Watch event ids, comma-separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub event_ids: Vec<i64>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Status OK response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusOk {
    pub status: &'static str,
}

impl Default for StatusOk {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print human-readable lines, or `data` as JSON
    pub fn print_or<T: Serialize>(&self, data: T, lines: &[String]) -> anyhow::Result<()> {
        if self.json {
            return self.print(data);
        }
        for line in lines {
            println!("{}", line);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print a workflow error with its semantic exit code
    pub fn fail(&self, err: &HoundError) -> ExitCode {
        self.error(err.to_string(), ExitCode::from_error(err))
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
