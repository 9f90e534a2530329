//! Streaming workflows
//!
//! - Resolver: provider search with a per-title state machine
//! - Session: binding a candidate to the player and reporting progress
//! - Player: local VLC/mpv surfaces
//! - Ipc: reading the position back from a running player

#[cfg(unix)]
pub mod ipc;
pub mod player;
pub mod resolver;
pub mod session;

pub use player::{
    DetachedSurface, LocalPlayer, PlayerError, PlayerSurface, PlayerType, SurfaceState,
};
pub use resolver::{Resolution, ResolveMode, ResolveState, ResumeHint, StreamResolver};
pub use session::{
    PlaybackController, PlaybackOutcome, PlaybackSession, PlaybackTarget, ProgressReport,
};
