//! Workflow error taxonomy
//!
//! Transport failures (`ApiError`) are mapped into these variants at the
//! workflow boundary so callers can react per category.

use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by stream resolution, playback and history workflows
#[derive(Debug, Clone, Error)]
pub enum HoundError {
    #[error("No streams found")]
    NoStreamsFound,

    #[error("Error getting streams: {0}")]
    ProviderSearch(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Watch history unavailable: {0}")]
    ReconciliationDataMissing(String),

    #[error("Your current rewatch is already empty")]
    RewatchAlreadyEmpty,

    #[error("No backend episode id for {0}")]
    EpisodeIdMissing(String),

    #[error("Request superseded")]
    Cancelled,

    #[error("Player error: {0}")]
    Player(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl HoundError {
    /// Map a transport error raised while searching providers
    pub fn from_search(err: ApiError) -> Self {
        match err {
            ApiError::SessionExpired => HoundError::SessionExpired,
            other => HoundError::ProviderSearch(other.to_string()),
        }
    }

    /// Map a transport error raised while materializing a p2p source
    pub fn from_materialize(err: ApiError) -> Self {
        match err {
            ApiError::SessionExpired => HoundError::SessionExpired,
            other => HoundError::SourceUnavailable(other.to_string()),
        }
    }

    /// Map any other transport error, keeping session expiry distinct
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::SessionExpired => HoundError::SessionExpired,
            other => HoundError::Api(other),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            HoundError::SessionExpired | HoundError::Api(ApiError::SessionExpired)
        )
    }
}
