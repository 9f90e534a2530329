//! Playback sessions
//!
//! A [`PlaybackController`] owns the player surface and at most one
//! [`PlaybackSession`]. Starting a session disposes the previous one first.
//! Progress is reported under a floor and a throttle interval; completion
//! appends a watch event and leaves the progress record alone.
//! [`PlaybackController::run`] drives all of this from the surface's own
//! position until the player closes.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::player::{PlayerSurface, SurfaceState};
use crate::api::{ApiError, HistoryEntry, HoundClient, PlaybackUpdate};
use crate::config::{DEFAULT_PROGRESS_FLOOR_SECS, DEFAULT_PROGRESS_INTERVAL_SECS};
use crate::error::HoundError;
use crate::models::{EpisodeReference, MediaReference, StreamCandidate, StreamProtocol};

/// The server rejects durations under a minute as invalid files
pub const MIN_TOTAL_DURATION_SECS: f64 = 60.0;

/// A ready surface this far short of the start offset gets an explicit seek
const START_SEEK_TOLERANCE_SECS: f64 = 5.0;

// =============================================================================
// Target
// =============================================================================

/// What a session is playing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackTarget {
    pub reference: MediaReference,
    pub episode: Option<EpisodeReference>,
}

impl PlaybackTarget {
    pub fn movie(reference: MediaReference) -> Self {
        Self {
            reference,
            episode: None,
        }
    }

    pub fn episode(show: MediaReference, episode: EpisodeReference) -> Self {
        Self {
            reference: show,
            episode: Some(episode),
        }
    }
}

impl fmt::Display for PlaybackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.episode {
            Some(ep) => write!(f, "{} {}", self.reference, ep),
            None => write!(f, "{}", self.reference),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Outcome of a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProgressReport {
    /// Position is under the reporting floor
    BelowFloor,
    /// Total duration too short for the server to accept
    TooShort,
    /// Last report was sent less than one interval ago
    Throttled,
    /// Server stored the position; `watched` if it auto-scrobbled
    Recorded { watched: bool },
    /// No session, or the session closed before the server answered
    Discarded,
}

/// How a driven session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlaybackOutcome {
    /// Last position read from the surface
    pub position: Option<f64>,
    pub duration: Option<f64>,
    /// Playback reached the end of the file
    pub ended: bool,
    /// A watch event was recorded, by auto-scrobble or by completion
    pub watched: bool,
    /// Report sent as the session stopped
    pub final_report: Option<ProgressReport>,
}

/// Binding of one candidate to the surface
#[derive(Debug)]
pub struct PlaybackSession {
    id: Uuid,
    target: PlaybackTarget,
    candidate: StreamCandidate,
    stream_url: String,
    pending_start: Option<f64>,
    last_report: Option<Instant>,
    last_position: Option<f64>,
    completed: bool,
    cancel: CancellationToken,
}

impl PlaybackSession {
    fn new(
        target: PlaybackTarget,
        candidate: StreamCandidate,
        stream_url: String,
        start_secs: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            candidate,
            stream_url,
            pending_start: Some(start_secs.max(0.0)),
            last_report: None,
            last_position: None,
            completed: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &PlaybackTarget {
        &self.target
    }

    pub fn candidate(&self) -> &StreamCandidate {
        &self.candidate
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Last position the server accepted
    pub fn last_position(&self) -> Option<f64> {
        self.last_position
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// First ready signal from the surface; yields the start offset once
    pub fn on_ready(&mut self) -> Option<f64> {
        self.pending_start.take()
    }

    fn update(&self, current: f64, total: f64) -> PlaybackUpdate {
        PlaybackUpdate {
            current_progress_seconds: current.min(total).max(0.0) as u64,
            total_duration_seconds: total as u64,
            encoded_data: self.candidate.encoded_data.clone(),
            stream_protocol: self.candidate.stream_protocol.as_str().to_string(),
            season_number: self.target.episode.as_ref().map(|e| e.season_number),
            episode_number: self.target.episode.as_ref().map(|e| e.episode_number),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Owns the player surface and the active session
pub struct PlaybackController<P: PlayerSurface> {
    client: HoundClient,
    surface: P,
    session: Option<PlaybackSession>,
    floor: Duration,
    interval: Duration,
}

impl<P: PlayerSurface> PlaybackController<P> {
    pub fn new(client: HoundClient, surface: P) -> Self {
        Self {
            client,
            surface,
            session: None,
            floor: Duration::from_secs(DEFAULT_PROGRESS_FLOOR_SECS),
            interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
        }
    }

    /// Override the reporting floor and throttle interval
    pub fn with_limits(mut self, floor: Duration, interval: Duration) -> Self {
        self.floor = floor;
        self.interval = interval;
        self
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut PlaybackSession> {
        self.session.as_mut()
    }

    pub fn surface(&self) -> &P {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut P {
        &mut self.surface
    }

    /// Token that ends the active session when cancelled (e.g. navigation)
    pub fn cancel_handle(&self) -> Option<CancellationToken> {
        self.session.as_ref().map(|s| s.cancel.clone())
    }

    /// Bind `candidate` to the surface, replacing any active session
    ///
    /// P2P candidates are materialized on the server before the surface is
    /// opened; if that fails the surface is left closed.
    pub async fn start_session(
        &mut self,
        target: PlaybackTarget,
        candidate: StreamCandidate,
        start_secs: f64,
    ) -> Result<&PlaybackSession, HoundError> {
        self.close();

        if candidate.stream_protocol == StreamProtocol::P2p {
            debug!(media = %target, "materializing p2p source");
            self.client
                .materialize(&candidate.encoded_data)
                .await
                .map_err(HoundError::from_materialize)?;
        }

        self.bind(target, candidate, start_secs)
    }

    /// Track a stream that is already being served, without materializing it
    pub fn attach(
        &mut self,
        target: PlaybackTarget,
        candidate: StreamCandidate,
        start_secs: f64,
    ) -> Result<&PlaybackSession, HoundError> {
        self.close();
        self.bind(target, candidate, start_secs)
    }

    fn bind(
        &mut self,
        target: PlaybackTarget,
        candidate: StreamCandidate,
        start_secs: f64,
    ) -> Result<&PlaybackSession, HoundError> {
        let stream_url = self.client.stream_url(&candidate.encoded_data);
        self.surface
            .open(&stream_url, start_secs)
            .map_err(|e| HoundError::Player(e.to_string()))?;

        let session = PlaybackSession::new(target, candidate, stream_url, start_secs);
        info!(
            session = %session.id,
            media = %session.target,
            protocol = %session.candidate.stream_protocol,
            start_secs,
            "playback started"
        );
        Ok(self.session.insert(session))
    }

    /// Report the current position
    pub async fn report_progress(
        &mut self,
        current: f64,
        total: f64,
    ) -> Result<ProgressReport, HoundError> {
        if self.close_if_cancelled() {
            return Ok(ProgressReport::Discarded);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(ProgressReport::Discarded);
        };

        if current < self.floor.as_secs_f64() {
            return Ok(ProgressReport::BelowFloor);
        }
        if total < MIN_TOTAL_DURATION_SECS {
            return Ok(ProgressReport::TooShort);
        }
        if session
            .last_report
            .is_some_and(|at| at.elapsed() < self.interval)
        {
            return Ok(ProgressReport::Throttled);
        }

        session.last_report = Some(Instant::now());
        let update = session.update(current, total);
        let reference = session.target.reference.clone();
        let cancel = session.cancel.clone();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            ack = self.client.set_playback(&reference, &update) => Some(ack),
        };

        let Some(ack) = result else {
            debug!(%reference, "progress response arrived after session closed");
            self.close();
            return Ok(ProgressReport::Discarded);
        };
        let ack = ack.map_err(HoundError::from_api)?;

        if let Some(session) = self.session.as_mut() {
            session.last_position = Some(update.current_progress_seconds as f64);
        }
        debug!(
            %reference,
            current = update.current_progress_seconds,
            watched = ack.watched,
            "progress recorded"
        );
        Ok(ProgressReport::Recorded {
            watched: ack.watched,
        })
    }

    /// Report regardless of the throttle interval, e.g. as playback stops
    pub async fn flush_progress(
        &mut self,
        current: f64,
        total: f64,
    ) -> Result<ProgressReport, HoundError> {
        if let Some(session) = self.session.as_mut() {
            session.last_report = None;
        }
        self.report_progress(current, total).await
    }

    /// Append a watch event for the active target
    ///
    /// Returns `false` when there is no session or it closed before the
    /// server answered. The progress record is never touched. An episode
    /// without a numeric backend id is looked up in its season listing
    /// first; if it is not there nothing is sent.
    pub async fn report_completion(&mut self) -> Result<bool, HoundError> {
        if self.close_if_cancelled() {
            return Ok(false);
        }
        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };

        let reference = session.target.reference.clone();
        let episode = session.target.episode.clone();
        let cancel = session.cancel.clone();
        let entry = match &episode {
            Some(ep) => {
                let id = match ep.backend_id() {
                    Some(id) => id,
                    None => self.lookup_episode_id(&reference, ep).await?,
                };
                HistoryEntry::episode(id, ep, None)
            }
            None => HistoryEntry::movie(None),
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = self.client.add_history(&reference, &entry) => Some(res),
        };

        match result {
            None => {
                debug!(%reference, "completion response arrived after session closed");
                self.close();
                Ok(false)
            }
            Some(res) => {
                res.map_err(HoundError::from_api)?;
                if let Some(session) = self.session.as_mut() {
                    session.completed = true;
                }
                info!(%reference, "marked watched");
                Ok(true)
            }
        }
    }

    /// Backend id of `episode` from its season listing
    async fn lookup_episode_id(
        &mut self,
        show: &MediaReference,
        episode: &EpisodeReference,
    ) -> Result<u64, HoundError> {
        let missing = |detail: String| {
            HoundError::EpisodeIdMissing(format!("{} {}{}", show, episode, detail))
        };
        let listing = match self.client.season(show, episode.season_number).await {
            Ok(listing) => listing,
            Err(ApiError::SessionExpired) => return Err(HoundError::SessionExpired),
            Err(e) => return Err(missing(format!(" ({})", e))),
        };
        let id = listing
            .iter()
            .find(|e| e.key() == episode.key())
            .map(|e| e.id)
            .ok_or_else(|| missing(String::new()))?;

        debug!(%show, %episode, id, "episode id resolved from season listing");
        if let Some(ep) = self
            .session
            .as_mut()
            .and_then(|s| s.target.episode.as_mut())
        {
            ep.episode_source_id = id.to_string();
        }
        Ok(id)
    }

    /// Drive the active session until the surface closes or `stop` fires
    ///
    /// Polls the surface every `tick`. The first ready signal applies the
    /// start offset; positions are reported under the floor and throttle;
    /// a last report goes out as playback stops, and a file played to the end
    /// appends a watch event unless the server already scrobbled it.
    pub async fn run(
        &mut self,
        tick: Duration,
        stop: &CancellationToken,
    ) -> Result<PlaybackOutcome, HoundError> {
        let mut outcome = PlaybackOutcome::default();
        if self.session.is_none() {
            return Ok(outcome);
        }

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.close_if_cancelled() {
                return Ok(outcome);
            }

            match self.surface.poll() {
                SurfaceState::Loading => {}
                SurfaceState::Playing { position, duration } => {
                    self.apply_start(position);
                    outcome.position = Some(position);
                    outcome.duration = Some(duration);
                    match self.report_progress(position, duration).await {
                        Ok(ProgressReport::Recorded { watched: true }) => outcome.watched = true,
                        Ok(ProgressReport::Discarded) => return Ok(outcome),
                        Ok(_) => {}
                        Err(e) if e.is_session_expired() => {
                            self.close();
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "progress report failed"),
                    }
                }
                SurfaceState::Ended { duration } => {
                    outcome.position = Some(duration);
                    outcome.duration = Some(duration);
                    outcome.ended = true;
                    break;
                }
                SurfaceState::Closed => break,
            }
        }

        if let (Some(position), Some(duration)) = (outcome.position, outcome.duration) {
            match self.flush_progress(position, duration).await {
                Ok(report) => {
                    if matches!(report, ProgressReport::Recorded { watched: true }) {
                        outcome.watched = true;
                    }
                    outcome.final_report = Some(report);
                }
                Err(e) if e.is_session_expired() => {
                    self.close();
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "final progress report failed"),
            }
        }
        if outcome.ended && !outcome.watched {
            match self.report_completion().await {
                Ok(recorded) => outcome.watched = recorded,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        self.close();
        Ok(outcome)
    }

    /// First ready signal: seek if the surface did not honour the start offset
    fn apply_start(&mut self, position: f64) {
        let Some(start) = self.session.as_mut().and_then(PlaybackSession::on_ready) else {
            return;
        };
        debug!(start, position, "surface ready");
        if start > 0.0 && position + START_SEEK_TOLERANCE_SECS < start {
            self.surface.seek(start);
        }
    }

    /// Tear down the session and release the surface
    ///
    /// Returns `true` if a session was torn down; later calls are no-ops.
    pub fn close(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.cancel.cancel();
        self.surface.close();
        debug!(session = %session.id, media = %session.target, "playback session closed");
        true
    }

    fn close_if_cancelled(&mut self) -> bool {
        let cancelled = self
            .session
            .as_ref()
            .is_some_and(|s| s.cancel.is_cancelled());
        if cancelled {
            warn!("session was cancelled externally, closing");
            self.close();
        }
        cancelled
    }
}

impl<P: PlayerSurface> Drop for PlaybackController<P> {
    fn drop(&mut self) {
        self.close();
    }
}
