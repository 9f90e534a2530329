//! Stream resolution
//!
//! Searches the backend's providers for a title/episode and picks a default
//! candidate. Each `(title, episode)` key moves through
//! `Idle -> Searching -> Ready | Failed`; a resolve that arrives while the key
//! is `Searching` joins the in-flight search instead of issuing a new one.
//! Results are never cached: once a search settles, the next resolve for the
//! same key starts a fresh search.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::HoundClient;
use crate::error::HoundError;
use crate::models::{
    CandidateIndex, EpisodeReference, MediaReference, StreamCandidate, StreamSearchResponse,
};

/// How the resolved set will be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// Open playback with the default candidate immediately
    Direct,
    /// Show every candidate and let the user override the default
    Select,
}

impl fmt::Display for ResolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveMode::Direct => write!(f, "direct"),
            ResolveMode::Select => write!(f, "select"),
        }
    }
}

/// Source the user was previously watching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeHint {
    pub expected_encoded_data: Option<String>,
}

impl ResumeHint {
    pub fn new(encoded_data: impl Into<String>) -> Self {
        let encoded: String = encoded_data.into();
        Self {
            expected_encoded_data: Some(encoded).filter(|e| !e.is_empty()),
        }
    }
}

/// Search state for one `(title, episode)` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveState {
    #[default]
    Idle,
    Searching,
    Ready,
    Failed,
}

/// Identity of a search
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    pub reference: MediaReference,
    pub episode: Option<EpisodeReference>,
}

impl ResolveKey {
    pub fn new(reference: &MediaReference, episode: Option<&EpisodeReference>) -> Self {
        Self {
            reference: reference.clone(),
            episode: episode.cloned(),
        }
    }
}

/// Outcome of a successful resolve
#[derive(Debug, Clone)]
pub struct Resolution {
    pub mode: ResolveMode,
    pub response: Arc<StreamSearchResponse>,
    /// Where the default candidate sits in `response`
    pub default_index: CandidateIndex,
    pub default_candidate: StreamCandidate,
    /// Default was chosen because it matched the resume hint
    pub matched_hint: bool,
}

impl Resolution {
    /// Candidate at a flat listing position (select mode override)
    pub fn pick(&self, n: usize) -> Option<StreamCandidate> {
        self.response.nth(n).map(|(_, c)| c.clone())
    }

    /// Flat position of the default candidate in the listing
    pub fn default_position(&self) -> usize {
        self.response
            .candidates()
            .position(|(i, _)| i == self.default_index)
            .unwrap_or(0)
    }
}

type SearchResult = Result<Arc<StreamSearchResponse>, HoundError>;
type SharedSearch = Shared<BoxFuture<'static, SearchResult>>;

#[derive(Default)]
struct Entry {
    state: ResolveState,
    in_flight: Option<SharedSearch>,
    busy: HashMap<ResolveMode, usize>,
}

type Entries = Arc<Mutex<HashMap<ResolveKey, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<ResolveKey, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a mode's busy mark when the resolve finishes or is dropped
struct BusyGuard<'a> {
    entries: &'a Entries,
    key: &'a ResolveKey,
    mode: ResolveMode,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut entries = lock(self.entries);
        if let Some(count) = entries
            .get_mut(self.key)
            .and_then(|e| e.busy.get_mut(&self.mode))
        {
            *count = count.saturating_sub(1);
        }
    }
}

/// Resolves provider streams with a centrally guarded state machine
pub struct StreamResolver {
    client: HoundClient,
    entries: Entries,
}

impl StreamResolver {
    pub fn new(client: HoundClient) -> Self {
        Self {
            client,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current state of a key
    pub fn state(
        &self,
        reference: &MediaReference,
        episode: Option<&EpisodeReference>,
    ) -> ResolveState {
        lock(&self.entries)
            .get(&ResolveKey::new(reference, episode))
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// Whether a resolve for `mode` is currently waiting on a search
    pub fn is_busy(
        &self,
        reference: &MediaReference,
        episode: Option<&EpisodeReference>,
        mode: ResolveMode,
    ) -> bool {
        lock(&self.entries)
            .get(&ResolveKey::new(reference, episode))
            .and_then(|e| e.busy.get(&mode))
            .is_some_and(|&n| n > 0)
    }

    /// Search providers and choose a default candidate
    ///
    /// Fails with `NoStreamsFound` on an empty result and `ProviderSearch` on
    /// transport/server errors. If `cancel` fires before the result arrives,
    /// the result is discarded and `Cancelled` is returned.
    pub async fn resolve(
        &self,
        reference: &MediaReference,
        episode: Option<&EpisodeReference>,
        mode: ResolveMode,
        hint: Option<&ResumeHint>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, HoundError> {
        let key = ResolveKey::new(reference, episode);
        let search = self.begin(&key, mode);
        let busy = BusyGuard {
            entries: &self.entries,
            key: &key,
            mode,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HoundError::Cancelled),
            result = search => result,
        };
        drop(busy);

        if cancel.is_cancelled() {
            debug!(%reference, %mode, "discarding superseded stream search result");
            return Err(HoundError::Cancelled);
        }

        let response = outcome?;
        let expected = hint.and_then(|h| h.expected_encoded_data.as_deref());
        let default_index = response
            .default_index(expected)
            .ok_or(HoundError::NoStreamsFound)?;
        let default_candidate = response
            .get(default_index)
            .cloned()
            .ok_or(HoundError::NoStreamsFound)?;
        let matched_hint = expected.is_some_and(|e| e == default_candidate.encoded_data);

        info!(
            %reference,
            %mode,
            candidates = response.candidate_count(),
            provider = %default_candidate.provider_name,
            matched_hint,
            "resolved streams"
        );

        Ok(Resolution {
            mode,
            response,
            default_index,
            default_candidate,
            matched_hint,
        })
    }

    /// Join the in-flight search for `key` or start a new one
    fn begin(&self, key: &ResolveKey, mode: ResolveMode) -> SharedSearch {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_default();
        *entry.busy.entry(mode).or_insert(0) += 1;

        if let Some(search) = &entry.in_flight {
            debug!(reference = %key.reference, %mode, "joining in-flight stream search");
            return search.clone();
        }

        entry.state = ResolveState::Searching;
        let search = self.search(key.clone()).shared();
        entry.in_flight = Some(search.clone());
        search
    }

    /// The network search; settles the key's state when it completes
    fn search(&self, key: ResolveKey) -> BoxFuture<'static, SearchResult> {
        let client = self.client.clone();
        let entries = Arc::clone(&self.entries);
        async move {
            let result = client
                .search_providers(&key.reference, key.episode.as_ref())
                .await
                .map_err(HoundError::from_search)
                .and_then(|response| {
                    if response.is_empty() {
                        Err(HoundError::NoStreamsFound)
                    } else {
                        Ok(Arc::new(response))
                    }
                });

            if let Some(entry) = lock(&entries).get_mut(&key) {
                entry.state = match result {
                    Ok(_) => ResolveState::Ready,
                    Err(_) => ResolveState::Failed,
                };
                entry.in_flight = None;
            }
            result
        }
        .boxed()
    }
}
