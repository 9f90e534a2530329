//! Watch history reconciliation
//!
//! Decides what the play button does for a title: resume an unfinished
//! episode, continue with the next one, or start from the beginning. Only the
//! latest rewatch counts towards "watched"; older rewatches stay in history
//! but do not influence the decision. A finished season rolls over to the
//! first episode of the next one.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{ApiError, HistoryEntry, HoundClient};
use crate::error::HoundError;
use crate::models::{
    format_seconds, latest_rewatch, EpisodeKey, EpisodeReference, MediaReference, Rewatch,
    SeasonEpisode, WatchAction, WatchActionType, WatchProgress,
};
use crate::stream::ResumeHint;

// =============================================================================
// Play Action
// =============================================================================

/// Default action for a title's play button
///
/// `episode` is `None` for movies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlayAction {
    Start {
        episode: Option<EpisodeReference>,
    },
    Resume {
        episode: Option<EpisodeReference>,
        position_seconds: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        encoded_data: Option<String>,
    },
    NextEpisode {
        episode: EpisodeReference,
    },
}

impl PlayAction {
    pub fn episode(&self) -> Option<&EpisodeReference> {
        match self {
            PlayAction::Start { episode } | PlayAction::Resume { episode, .. } => episode.as_ref(),
            PlayAction::NextEpisode { episode } => Some(episode),
        }
    }

    /// Where playback should begin
    pub fn start_seconds(&self) -> f64 {
        match self {
            PlayAction::Resume {
                position_seconds, ..
            } => *position_seconds,
            _ => 0.0,
        }
    }

    /// Stream the user was last watching, to prefer it when resolving
    pub fn resume_hint(&self) -> Option<ResumeHint> {
        match self {
            PlayAction::Resume {
                encoded_data: Some(enc),
                ..
            } => Some(ResumeHint::new(enc.clone())),
            _ => None,
        }
    }

    pub fn is_resume(&self) -> bool {
        matches!(self, PlayAction::Resume { .. })
    }

    /// Play action equivalent to a server-suggested watch action
    pub fn from_watch_action(action: &WatchAction) -> Option<Self> {
        match action.watch_action_type {
            WatchActionType::NextEpisode => Some(PlayAction::NextEpisode {
                episode: action.episode()?,
            }),
            WatchActionType::Resume => {
                let progress = action.watch_progress.as_ref()?;
                Some(PlayAction::Resume {
                    episode: action.episode(),
                    position_seconds: progress.clamped_position(),
                    encoded_data: Some(progress.encoded_data.clone()).filter(|e| !e.is_empty()),
                })
            }
        }
    }
}

impl fmt::Display for PlayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = |ep: Option<&EpisodeReference>| ep.map(|e| format!(" {}", e)).unwrap_or_default();
        match self {
            PlayAction::Start { episode } => write!(f, "Play{}", label(episode.as_ref())),
            PlayAction::Resume {
                episode,
                position_seconds,
                ..
            } => write!(
                f,
                "Resume{} at {}",
                label(episode.as_ref()),
                format_seconds(*position_seconds)
            ),
            PlayAction::NextEpisode { episode } => write!(f, "Next episode {}", episode),
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Compute the play action for one season
///
/// `episodes` is the season listing in episode order.
pub fn decide(
    season: u32,
    episodes: &[SeasonEpisode],
    latest: Option<&Rewatch>,
    progress: &[WatchProgress],
) -> PlayAction {
    if let Some(action) = resume_action(episodes, progress) {
        return action;
    }

    let prefix = watched_prefix(episodes, latest);
    if prefix > 0 {
        if let Some(next) = episodes.get(prefix) {
            return PlayAction::NextEpisode {
                episode: next.reference(),
            };
        }
    }

    start_action(season, episodes)
}

/// Number of leading episodes watched in the latest rewatch
fn watched_prefix(episodes: &[SeasonEpisode], latest: Option<&Rewatch>) -> usize {
    let watched: HashSet<EpisodeKey> = latest
        .map(|r| {
            r.watch_events
                .iter()
                .filter_map(|e| e.episode_key())
                .collect()
        })
        .unwrap_or_default();

    episodes
        .iter()
        .take_while(|e| watched.contains(&e.key()))
        .count()
}

/// Every episode of the listing is watched in the latest rewatch
pub fn season_finished(episodes: &[SeasonEpisode], latest: Option<&Rewatch>) -> bool {
    !episodes.is_empty() && watched_prefix(episodes, latest) == episodes.len()
}

/// Resume `episode` if it has an unfinished progress record, else start it
pub fn episode_action(episode: EpisodeReference, progress: &[WatchProgress]) -> PlayAction {
    let record = progress
        .iter()
        .find(|p| p.episode_key() == Some(episode.key()) && p.is_in_progress());
    let Some(record) = record else {
        return PlayAction::Start {
            episode: Some(episode),
        };
    };

    let mut episode = episode;
    if episode.backend_id().is_none() {
        if let Some(id) = record.episode_id.as_ref().filter(|id| !id.is_empty()) {
            episode.episode_source_id = id.clone();
        }
    }
    PlayAction::Resume {
        episode: Some(episode),
        position_seconds: record.clamped_position(),
        encoded_data: Some(record.encoded_data.clone()).filter(|e| !e.is_empty()),
    }
}

/// Most recently touched unfinished episode; ties go to the lowest episode
fn resume_action(episodes: &[SeasonEpisode], progress: &[WatchProgress]) -> Option<PlayAction> {
    let best = progress
        .iter()
        .filter(|p| p.is_in_progress())
        .filter_map(|p| p.episode_key().filter(|k| k.episode > 0).map(|k| (k, p)))
        .min_by(|(ka, a), (kb, b)| {
            b.last_watched_at
                .cmp(&a.last_watched_at)
                .then_with(|| ka.cmp(kb))
        })?;

    let (key, record) = best;
    let episode = episodes
        .iter()
        .find(|e| e.key() == key)
        .map(SeasonEpisode::reference)
        .unwrap_or_else(|| EpisodeReference {
            season_number: key.season,
            episode_number: key.episode,
            episode_source_id: record.episode_id.clone().unwrap_or_default(),
        });

    Some(PlayAction::Resume {
        episode: Some(episode),
        position_seconds: record.clamped_position(),
        encoded_data: Some(record.encoded_data.clone()).filter(|e| !e.is_empty()),
    })
}

fn start_action(season: u32, episodes: &[SeasonEpisode]) -> PlayAction {
    let episode = episodes
        .first()
        .map(SeasonEpisode::reference)
        .unwrap_or_else(|| EpisodeReference {
            season_number: season,
            episode_number: 1,
            episode_source_id: String::new(),
        });
    PlayAction::Start {
        episode: Some(episode),
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Fetches history and progress and turns them into play actions
#[derive(Clone)]
pub struct Reconciler {
    client: HoundClient,
}

impl Reconciler {
    pub fn new(client: HoundClient) -> Self {
        Self { client }
    }

    /// Play action for a season of a show
    ///
    /// Never fails: missing data degrades to starting at episode 1.
    pub async fn play_action(&self, show: &MediaReference, season: u32) -> PlayAction {
        let episodes = match self.client.season(show, season).await {
            Ok(episodes) => episodes,
            Err(e) => {
                let err = HoundError::ReconciliationDataMissing(e.to_string());
                warn!(%show, season, error = %err, "season listing unavailable");
                return start_action(season, &[]);
            }
        };

        let fetched = tokio::try_join!(
            self.client.season_history(show, season),
            self.client.season_playback(show, season),
        );
        let (rewatches, progress) = match fetched {
            Ok(data) => data,
            Err(e) => {
                let err = HoundError::ReconciliationDataMissing(e.to_string());
                warn!(%show, season, error = %err, "falling back to start");
                return start_action(season, &episodes);
            }
        };

        let latest = latest_rewatch(&rewatches);
        let mut action = decide(season, &episodes, latest, &progress);
        if matches!(action, PlayAction::Start { .. }) && season_finished(&episodes, latest) {
            if let Some(next) = self.next_season_start(show, season).await {
                action = next;
            }
        }
        debug!(%show, season, %action, "play action");
        action
    }

    /// First episode of the season after `season`, if the show has one
    async fn next_season_start(&self, show: &MediaReference, season: u32) -> Option<PlayAction> {
        let next = season.checked_add(1)?;
        match self.client.season(show, next).await {
            Ok(episodes) => {
                let first = episodes.first()?;
                debug!(%show, season = next, "season finished, rolling over");
                Some(PlayAction::NextEpisode {
                    episode: first.reference(),
                })
            }
            Err(e) => {
                // End of show, or not fetchable: start the finished season over
                debug!(%show, season = next, error = %e, "no next season");
                None
            }
        }
    }

    /// Play action for an explicitly chosen episode
    ///
    /// Resumes it when its progress record is unfinished; a failed lookup
    /// plays it from the start.
    pub async fn episode_action(
        &self,
        show: &MediaReference,
        episode: EpisodeReference,
    ) -> PlayAction {
        match self.client.season_playback(show, episode.season_number).await {
            Ok(progress) => episode_action(episode, &progress),
            Err(e) => {
                let err = HoundError::ReconciliationDataMissing(e.to_string());
                warn!(%show, %episode, error = %err, "playing from the start");
                PlayAction::Start {
                    episode: Some(episode),
                }
            }
        }
    }

    /// Server-suggested next action for every title in progress
    pub async fn continue_watching(&self) -> Result<Vec<WatchAction>, HoundError> {
        self.client
            .continue_watching()
            .await
            .map_err(HoundError::from_api)
    }

    /// Server-suggested next action for one title; `None` at the end of a show
    pub async fn next_watch_action(
        &self,
        reference: &MediaReference,
    ) -> Result<Option<WatchAction>, HoundError> {
        self.client
            .next_watch_action(reference)
            .await
            .map_err(HoundError::from_api)
    }

    /// Drop progress records: one episode, a whole show, or a movie
    pub async fn clear_progress(
        &self,
        reference: &MediaReference,
        episode: Option<&EpisodeReference>,
    ) -> Result<(), HoundError> {
        self.client
            .delete_playback(reference, episode.map(EpisodeReference::key))
            .await
            .map_err(HoundError::from_api)?;
        match episode {
            Some(ep) => info!(%reference, episode = %ep, "cleared progress"),
            None => info!(%reference, "cleared progress"),
        }
        Ok(())
    }

    /// Remove watch events by id; nothing is sent for an empty list
    pub async fn delete_watch_events(
        &self,
        reference: &MediaReference,
        watch_event_ids: &[i64],
    ) -> Result<(), HoundError> {
        if watch_event_ids.is_empty() {
            return Ok(());
        }
        self.client
            .delete_history(reference, watch_event_ids)
            .await
            .map_err(HoundError::from_api)?;
        info!(%reference, count = watch_event_ids.len(), "deleted watch events");
        Ok(())
    }

    /// Play action for a movie
    pub async fn movie_action(&self, movie: &MediaReference) -> PlayAction {
        match self.client.movie_playback(movie).await {
            Ok(Some(p)) if p.is_in_progress() => PlayAction::Resume {
                episode: None,
                position_seconds: p.clamped_position(),
                encoded_data: Some(p.encoded_data).filter(|e| !e.is_empty()),
            },
            Ok(_) => PlayAction::Start { episode: None },
            Err(e) => {
                let err = HoundError::ReconciliationDataMissing(e.to_string());
                warn!(%movie, error = %err, "falling back to start");
                PlayAction::Start { episode: None }
            }
        }
    }

    /// Open a new rewatch; earlier watch events remain in history
    pub async fn start_rewatch(
        &self,
        show: &MediaReference,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Rewatch>, HoundError> {
        match self.client.start_rewatch(show, started_at).await {
            Ok(rewatch) => {
                info!(%show, "started rewatch");
                Ok(rewatch)
            }
            Err(ApiError::BadRequest(msg)) => {
                debug!(%show, msg = %msg, "rewatch rejected");
                Err(HoundError::RewatchAlreadyEmpty)
            }
            Err(e) => Err(HoundError::from_api(e)),
        }
    }

    /// Append watch events for episodes (by backend id)
    pub async fn mark_episodes_watched(
        &self,
        show: &MediaReference,
        episode_ids: Vec<u64>,
        watched_at: Option<DateTime<Utc>>,
    ) -> Result<(), HoundError> {
        let count = episode_ids.len();
        self.client
            .add_history(show, &HistoryEntry::episodes(episode_ids, watched_at))
            .await
            .map_err(HoundError::from_api)?;
        info!(%show, count, "marked episodes watched");
        Ok(())
    }

    /// Append a watch event for a movie
    pub async fn mark_movie_watched(
        &self,
        movie: &MediaReference,
        watched_at: Option<DateTime<Utc>>,
    ) -> Result<(), HoundError> {
        self.client
            .add_history(movie, &HistoryEntry::movie(watched_at))
            .await
            .map_err(HoundError::from_api)?;
        info!(%movie, "marked watched");
        Ok(())
    }

    /// Every rewatch for a title, newest first
    pub async fn history(&self, reference: &MediaReference) -> Result<Vec<Rewatch>, HoundError> {
        let mut rewatches = self
            .client
            .history(reference)
            .await
            .map_err(HoundError::from_api)?;
        rewatches.sort_by(|a, b| b.rewatch_started_at.cmp(&a.rewatch_started_at));
        Ok(rewatches)
    }
}
