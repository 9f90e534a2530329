//! Hound client - stream resolution, playback and watch history
//!
//! A scriptable client for the Hound media server. Picks which stream to play,
//! binds it to a local player while reporting progress, and works out whether
//! the play button should resume, continue or start over.
//!
//! # Modules
//!
//! - `models` - Media references, stream candidates, progress and history
//! - `api` - Hound backend HTTP client and session-expiry observer
//! - `stream` - Stream resolver, playback sessions and player surfaces
//! - `history` - Play action decisions and watch history operations
//! - `config` - Config file and environment overrides
//! - `cli` / `commands` - Command line interface

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod stream;

// Re-export commonly used types
pub use models::{
    EpisodeReference, MediaReference, MediaType, Rewatch, SeasonEpisode, StreamCandidate,
    StreamProtocol, StreamSearchResponse, WatchAction, WatchEvent, WatchProgress,
};

pub use api::{AuthObserver, HoundClient, SessionState};
pub use config::Config;
pub use error::HoundError;
pub use history::{decide, PlayAction, Reconciler};
pub use stream::{
    PlaybackController, PlaybackOutcome, PlaybackTarget, PlayerSurface, ProgressReport,
    ResolveMode, ResolveState, ResumeHint, StreamResolver, SurfaceState,
};
