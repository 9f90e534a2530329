//! Hound backend API
//!
//! - client: HTTP transport, envelopes and endpoint wrappers
//! - auth: session-expiry observer injected into the client

pub mod auth;
pub mod client;

pub use auth::{AuthObserver, NoopObserver, SessionState};
pub use client::{ApiError, HistoryEntry, HoundClient, PlaybackAck, PlaybackUpdate};
