//! Playback Session Tests
//!
//! Drives a [`PlaybackController`] over a recording surface against a mocked
//! Hound server: session lifecycle, p2p materialization, the progress floor,
//! throttling and completion. A scripted surface plays back a fixed sequence
//! of player states to exercise the polling loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hound_client::api::HoundClient;
use hound_client::error::HoundError;
use hound_client::models::{
    EpisodeReference, MediaReference, MediaType, StreamCandidate, StreamProtocol,
};
use hound_client::stream::{
    PlaybackController, PlaybackOutcome, PlaybackTarget, PlayerError, PlayerSurface,
    ProgressReport, ResolveMode, StreamResolver, SurfaceState,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Recording Surface
// =============================================================================

/// Surface that records every call instead of launching a player
#[derive(Clone, Default)]
struct RecordingSurface {
    events: Arc<Mutex<Vec<String>>>,
    open: bool,
}

impl RecordingSurface {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PlayerSurface for RecordingSurface {
    fn open(&mut self, url: &str, start_secs: f64) -> Result<(), PlayerError> {
        if self.open {
            return Err(PlayerError::AlreadyOpen);
        }
        self.open = true;
        self.events
            .lock()
            .unwrap()
            .push(format!("open {} @{}", url, start_secs));
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.events.lock().unwrap().push("close".to_string());
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Surface that reports a scripted sequence of states, repeating the last one
#[derive(Clone)]
struct ScriptedSurface {
    states: Arc<Mutex<VecDeque<SurfaceState>>>,
    events: Arc<Mutex<Vec<String>>>,
    open: bool,
}

impl ScriptedSurface {
    fn new(states: impl IntoIterator<Item = SurfaceState>) -> Self {
        Self {
            states: Arc::new(Mutex::new(states.into_iter().collect())),
            events: Arc::default(),
            open: false,
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PlayerSurface for ScriptedSurface {
    fn open(&mut self, url: &str, start_secs: f64) -> Result<(), PlayerError> {
        self.open = true;
        self.events
            .lock()
            .unwrap()
            .push(format!("open {} @{}", url, start_secs));
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.events.lock().unwrap().push("close".to_string());
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn poll(&mut self) -> SurfaceState {
        if !self.open {
            return SurfaceState::Closed;
        }
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            states.pop_front().unwrap()
        } else {
            states.front().copied().unwrap_or(SurfaceState::Closed)
        }
    }

    fn seek(&mut self, secs: f64) {
        self.events.lock().unwrap().push(format!("seek {}", secs));
    }
}

const TICK: Duration = Duration::from_millis(5);

fn playing(position: f64, duration: f64) -> SurfaceState {
    SurfaceState::Playing { position, duration }
}

fn scripted(
    server: &ServerGuard,
    states: impl IntoIterator<Item = SurfaceState>,
) -> (PlaybackController<ScriptedSurface>, ScriptedSurface) {
    let surface = ScriptedSurface::new(states);
    let controller = PlaybackController::new(HoundClient::new(server.url()), surface.clone());
    (controller, surface)
}

// =============================================================================
// Fixtures
// =============================================================================

fn candidate(enc: &str, protocol: StreamProtocol) -> StreamCandidate {
    StreamCandidate {
        encoded_data: enc.to_string(),
        stream_protocol: protocol,
        resolution: Some("1080p".to_string()),
        file_size: None,
        codec: None,
        audio_tracks: vec![],
        cached: protocol == StreamProtocol::Direct,
        provider_name: "aiostreams".to_string(),
    }
}

fn movie() -> PlaybackTarget {
    PlaybackTarget::movie(MediaReference::new(MediaType::Movie, "tmdb", "603"))
}

fn episode() -> PlaybackTarget {
    PlaybackTarget::episode(
        MediaReference::new(MediaType::TvShow, "tmdb", "1399"),
        EpisodeReference::new(1, 3, "63058").unwrap(),
    )
}

fn controller(server: &ServerGuard) -> (PlaybackController<RecordingSurface>, RecordingSurface) {
    let surface = RecordingSurface::default();
    let controller = PlaybackController::new(HoundClient::new(server.url()), surface.clone());
    (controller, surface)
}

async fn playback_mock(server: &mut ServerGuard, path: &str, hits: usize) -> mockito::Mock {
    server
        .mock("POST", path)
        .with_status(200)
        .with_body(r#"{"status": "success", "watched": false}"#)
        .expect(hits)
        .create_async()
        .await
}

// =============================================================================
// Session Lifecycle
// =============================================================================

/// Test: a direct candidate opens the stream URL without materializing
#[tokio::test]
async fn test_direct_candidate_opens_stream_url() {
    let mut server = Server::new_async().await;
    let materialize = server
        .mock("POST", Matcher::Regex(r"^/api/v1/torrent/".to_string()))
        .expect(0)
        .create_async()
        .await;

    let (mut controller, surface) = controller(&server);
    let session = controller
        .start_session(movie(), candidate("direct-1", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let expected_url = format!("{}/api/v1/stream/direct-1", server.url());
    assert_eq!(session.stream_url(), expected_url);
    assert_eq!(surface.events(), vec![format!("open {} @0", expected_url)]);
    materialize.assert_async().await;
}

/// Test: a p2p candidate is materialized before the surface opens
#[tokio::test]
async fn test_p2p_candidate_is_materialized_first() {
    let mut server = Server::new_async().await;
    let materialize = server
        .mock("POST", "/api/v1/torrent/magnet-1")
        .with_status(200)
        .with_body(r#"{"status": "success"}"#)
        .expect(1)
        .create_async()
        .await;

    let (mut controller, surface) = controller(&server);
    controller
        .start_session(movie(), candidate("magnet-1", StreamProtocol::P2p), 0.0)
        .await
        .unwrap();

    assert!(controller.surface().is_open());
    assert_eq!(surface.events().len(), 1);
    materialize.assert_async().await;
}

/// Test: a failed materialization never opens the surface
#[tokio::test]
async fn test_failed_materialization_is_source_unavailable() {
    let mut server = Server::new_async().await;
    let _materialize = server
        .mock("POST", "/api/v1/torrent/magnet-1")
        .with_status(500)
        .with_body(r#"{"error": "no peers"}"#)
        .create_async()
        .await;

    let (mut controller, surface) = controller(&server);
    let err = controller
        .start_session(movie(), candidate("magnet-1", StreamProtocol::P2p), 0.0)
        .await
        .unwrap_err();

    assert!(matches!(err, HoundError::SourceUnavailable(_)));
    assert!(surface.events().is_empty());
    assert!(controller.session().is_none());
}

/// Test: NoStreamsFound from the resolver leaves the surface untouched
#[tokio::test]
async fn test_no_streams_never_opens_surface() {
    let mut server = Server::new_async().await;
    let _providers = server
        .mock("GET", "/api/v1/movie/tmdb-603/providers")
        .with_status(200)
        .with_body(r#"{"status": "success", "data": {"providers": []}}"#)
        .create_async()
        .await;

    let client = HoundClient::new(server.url());
    let resolver = StreamResolver::new(client.clone());
    let surface = RecordingSurface::default();
    let controller = PlaybackController::new(client, surface.clone());

    let target = movie();
    let err = resolver
        .resolve(
            &target.reference,
            None,
            ResolveMode::Direct,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HoundError::NoStreamsFound));
    assert!(surface.events().is_empty());
    assert!(controller.session().is_none());
}

/// Test: the start offset is applied once on the first ready signal
#[tokio::test]
async fn test_start_offset_applied_once() {
    let server = Server::new_async().await;
    let (mut controller, surface) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 1200.0)
        .await
        .unwrap();

    assert!(surface.events()[0].ends_with("@1200"));
    let session = controller.session_mut().unwrap();
    assert_eq!(session.on_ready(), Some(1200.0));
    assert_eq!(session.on_ready(), None);
}

/// Test: starting a new session tears down the previous one first
#[tokio::test]
async fn test_new_session_disposes_previous() {
    let server = Server::new_async().await;
    let (mut controller, surface) = controller(&server);

    controller
        .start_session(movie(), candidate("first", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();
    let first_cancel = controller.cancel_handle().unwrap();

    controller
        .start_session(episode(), candidate("second", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let events = surface.events();
    assert_eq!(events.len(), 3);
    assert!(events[0].contains("/first"));
    assert_eq!(events[1], "close");
    assert!(events[2].contains("/second"));
    assert!(first_cancel.is_cancelled());
    assert_eq!(
        controller.session().map(|s| s.candidate().encoded_data.as_str()),
        Some("second")
    );
}

/// Test: closing twice releases the surface once
#[tokio::test]
async fn test_double_close_is_noop() {
    let server = Server::new_async().await;
    let (mut controller, surface) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    assert!(controller.close());
    assert!(!controller.close());
    assert_eq!(
        surface.events().iter().filter(|e| *e == "close").count(),
        1
    );
    assert!(controller.session().is_none());
}

// =============================================================================
// Progress Reporting
// =============================================================================

/// Test: no calls below the floor, exactly one at the floor
#[tokio::test]
async fn test_progress_floor() {
    let mut server = Server::new_async().await;
    let mock = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 1).await;

    let (mut controller, _) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    for current in 0..300 {
        let report = controller
            .report_progress(current as f64, 2400.0)
            .await
            .unwrap();
        assert_eq!(report, ProgressReport::BelowFloor);
    }
    let report = controller.report_progress(300.0, 2400.0).await.unwrap();
    assert_eq!(report, ProgressReport::Recorded { watched: false });
    assert_eq!(controller.session().unwrap().last_position(), Some(300.0));
    mock.assert_async().await;
}

/// Test: reports inside the interval are throttled
#[tokio::test]
async fn test_progress_throttled() {
    let mut server = Server::new_async().await;
    let mock = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 1).await;

    let (mut controller, _) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    assert_eq!(
        controller.report_progress(600.0, 2400.0).await.unwrap(),
        ProgressReport::Recorded { watched: false }
    );
    assert_eq!(
        controller.report_progress(610.0, 2400.0).await.unwrap(),
        ProgressReport::Throttled
    );
    mock.assert_async().await;
}

/// Test: with no interval every report above the floor is sent
#[tokio::test]
async fn test_zero_interval_reports_every_time() {
    let mut server = Server::new_async().await;
    let mock = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 2).await;

    let (controller, _) = controller(&server);
    let mut controller = controller.with_limits(Duration::from_secs(300), Duration::ZERO);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    controller.report_progress(600.0, 2400.0).await.unwrap();
    controller.report_progress(700.0, 2400.0).await.unwrap();
    mock.assert_async().await;
}

/// Test: episode reports carry season/episode and clamp to the duration
#[tokio::test]
async fn test_episode_progress_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/tv/tmdb-1399/playback")
        .match_header("x-client", "desktop")
        .match_body(Matcher::Json(json!({
            "current_progress_seconds": 2400,
            "total_duration_seconds": 2400,
            "encoded_data": "magnet-9",
            "stream_protocol": "p2p",
            "season_number": 1,
            "episode_number": 3
        })))
        .with_status(200)
        .with_body(r#"{"status": "success", "watched": true}"#)
        .expect(1)
        .create_async()
        .await;
    let _materialize = server
        .mock("POST", "/api/v1/torrent/magnet-9")
        .with_status(200)
        .create_async()
        .await;

    let (mut controller, _) = controller(&server);
    controller
        .start_session(episode(), candidate("magnet-9", StreamProtocol::P2p), 0.0)
        .await
        .unwrap();

    let report = controller.report_progress(2500.0, 2400.0).await.unwrap();
    assert_eq!(report, ProgressReport::Recorded { watched: true });
    mock.assert_async().await;
}

/// Test: durations under a minute are never reported
#[tokio::test]
async fn test_short_duration_not_reported() {
    let mut server = Server::new_async().await;
    let mock = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 0).await;

    let (controller, _) = controller(&server);
    let mut controller = controller.with_limits(Duration::ZERO, Duration::ZERO);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    assert_eq!(
        controller.report_progress(30.0, 45.0).await.unwrap(),
        ProgressReport::TooShort
    );
    mock.assert_async().await;
}

/// Test: without a session there is nothing to report
#[tokio::test]
async fn test_progress_without_session_is_discarded() {
    let server = Server::new_async().await;
    let (mut controller, _) = controller(&server);
    assert_eq!(
        controller.report_progress(600.0, 2400.0).await.unwrap(),
        ProgressReport::Discarded
    );
    assert!(!controller.report_completion().await.unwrap());
}

/// Test: a cancelled session discards reports and closes once
#[tokio::test]
async fn test_cancelled_session_discards_reports() {
    let mut server = Server::new_async().await;
    let mock = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 0).await;

    let (mut controller, surface) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    controller.cancel_handle().unwrap().cancel();
    assert_eq!(
        controller.report_progress(600.0, 2400.0).await.unwrap(),
        ProgressReport::Discarded
    );
    assert!(controller.session().is_none());
    assert!(!controller.close());
    assert_eq!(surface.events().last().map(String::as_str), Some("close"));
    mock.assert_async().await;
}

/// Test: a 401 during reporting surfaces as SessionExpired
#[tokio::test]
async fn test_progress_session_expired() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v1/movie/tmdb-603/playback")
        .with_status(401)
        .create_async()
        .await;

    let (mut controller, _) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let err = controller.report_progress(600.0, 2400.0).await.unwrap_err();
    assert!(err.is_session_expired());
}

// =============================================================================
// Completion
// =============================================================================

/// Test: completion appends history and leaves progress in place
#[tokio::test]
async fn test_completion_keeps_progress() {
    let mut server = Server::new_async().await;
    let progress = playback_mock(&mut server, "/api/v1/tv/tmdb-1399/playback", 1).await;
    let history = server
        .mock("POST", "/api/v1/tv/tmdb-1399/history")
        .match_body(Matcher::PartialJson(json!({
            "action_type": "watch",
            "episode_ids": [63058],
            "season_number": 1,
            "episode_number": 3
        })))
        .with_status(201)
        .with_body(r#"{"status": "success"}"#)
        .expect(1)
        .create_async()
        .await;
    let deletes = server
        .mock("DELETE", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let read_back = server
        .mock("GET", "/api/v1/tv/tmdb-1399/season/1/playback")
        .with_status(200)
        .with_body(
            r#"{"status": "success", "data": [{
                "media_type": "tvshow", "media_source": "tmdb", "source_id": "1399",
                "season_number": 1, "episode_number": 3, "episode_id": "63058",
                "current_progress_seconds": 1200, "total_duration_seconds": 2400,
                "encoded_data": "d", "stream_protocol": "direct", "last_watched_at": 1717000000
            }]}"#,
        )
        .create_async()
        .await;

    let client = HoundClient::new(server.url());
    let mut controller = PlaybackController::new(client.clone(), RecordingSurface::default());
    controller
        .start_session(episode(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    controller.report_progress(1200.0, 2400.0).await.unwrap();
    assert!(controller.report_completion().await.unwrap());
    assert!(controller.session().unwrap().is_completed());

    let show = MediaReference::new(MediaType::TvShow, "tmdb", "1399");
    let records = client.season_playback(&show, 1).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].current_progress_seconds, 1200.0);

    progress.assert_async().await;
    history.assert_async().await;
    deletes.assert_async().await;
    read_back.assert_async().await;
}

/// Test: movie completion sends a bare watch action
#[tokio::test]
async fn test_movie_completion_body() {
    let mut server = Server::new_async().await;
    let history = server
        .mock("POST", "/api/v1/movie/tmdb-603/history")
        .match_body(Matcher::Json(json!({"action_type": "watch"})))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let (mut controller, _) = controller(&server);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    assert!(controller.report_completion().await.unwrap());
    history.assert_async().await;
}

/// Test: an episode without a backend id is looked up in its season
#[tokio::test]
async fn test_completion_resolves_episode_id() {
    let mut server = Server::new_async().await;
    let listing = server
        .mock("GET", "/api/v1/tv/tmdb-1399/season/1")
        .with_status(200)
        .with_body(
            r#"{"status": "success", "data": {"season": {"episodes": [
                {"id": 63056, "season_number": 1, "episode_number": 1, "name": "Winter Is Coming"},
                {"id": 63057, "season_number": 1, "episode_number": 2, "name": "The Kingsroad"},
                {"id": 63058, "season_number": 1, "episode_number": 3, "name": "Lord Snow"}
            ]}}}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let history = server
        .mock("POST", "/api/v1/tv/tmdb-1399/history")
        .match_body(Matcher::Json(json!({
            "action_type": "watch",
            "episode_ids": [63058],
            "season_number": 1,
            "episode_number": 3
        })))
        .with_status(201)
        .with_body(r#"{"status": "success"}"#)
        .expect(1)
        .create_async()
        .await;

    let (mut controller, _) = controller(&server);
    let target = PlaybackTarget::episode(
        MediaReference::new(MediaType::TvShow, "tmdb", "1399"),
        EpisodeReference::new(1, 3, "").unwrap(),
    );
    controller
        .start_session(target, candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    assert!(controller.report_completion().await.unwrap());
    let episode = controller.session().unwrap().target().episode.clone().unwrap();
    assert_eq!(episode.episode_source_id, "63058");
    listing.assert_async().await;
    history.assert_async().await;
}

/// Test: an episode missing from its season is never sent without an id
#[tokio::test]
async fn test_completion_without_episode_id() {
    let mut server = Server::new_async().await;
    let _listing = server
        .mock("GET", "/api/v1/tv/tmdb-1399/season/1")
        .with_status(200)
        .with_body(r#"{"status": "success", "data": {"season": {"episodes": null}}}"#)
        .create_async()
        .await;
    let history = server
        .mock("POST", "/api/v1/tv/tmdb-1399/history")
        .expect(0)
        .create_async()
        .await;

    let (mut controller, _) = controller(&server);
    let target = PlaybackTarget::episode(
        MediaReference::new(MediaType::TvShow, "tmdb", "1399"),
        EpisodeReference::new(1, 3, "").unwrap(),
    );
    controller
        .start_session(target, candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let err = controller.report_completion().await.unwrap_err();
    assert!(matches!(err, HoundError::EpisodeIdMissing(_)));
    assert!(!controller.session().unwrap().is_completed());
    history.assert_async().await;
}

// =============================================================================
// Polling Loop
// =============================================================================

/// Test: a file played to the end reports progress and marks it watched
#[tokio::test]
async fn test_run_to_end_of_file() {
    let mut server = Server::new_async().await;
    let progress = playback_mock(&mut server, "/api/v1/tv/tmdb-1399/playback", 2).await;
    let history = server
        .mock("POST", "/api/v1/tv/tmdb-1399/history")
        .match_body(Matcher::PartialJson(json!({"episode_ids": [63058]})))
        .with_status(201)
        .with_body(r#"{"status": "success"}"#)
        .expect(1)
        .create_async()
        .await;

    let (controller, surface) = scripted(
        &server,
        [
            SurfaceState::Loading,
            playing(600.0, 1200.0),
            SurfaceState::Ended { duration: 1200.0 },
        ],
    );
    let mut controller = controller.with_limits(Duration::from_secs(300), Duration::ZERO);
    controller
        .start_session(episode(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let outcome = controller
        .run(TICK, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PlaybackOutcome {
            position: Some(1200.0),
            duration: Some(1200.0),
            ended: true,
            watched: true,
            final_report: Some(ProgressReport::Recorded { watched: false }),
        }
    );
    assert!(controller.session().is_none());
    assert_eq!(surface.events().last().map(String::as_str), Some("close"));
    progress.assert_async().await;
    history.assert_async().await;
}

/// Test: a player that ignored the start offset is seeked on first ready
#[tokio::test]
async fn test_run_seeks_to_start_offset() {
    let mut server = Server::new_async().await;
    let progress = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 0).await;

    let (mut controller, surface) =
        scripted(&server, [playing(3.0, 2400.0), SurfaceState::Closed]);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 1200.0)
        .await
        .unwrap();

    let outcome = controller
        .run(TICK, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.ended);
    assert_eq!(outcome.final_report, Some(ProgressReport::BelowFloor));

    let events = surface.events();
    assert_eq!(events.iter().filter(|e| e.starts_with("seek")).count(), 1);
    assert_eq!(events[1], "seek 1200");
    progress.assert_async().await;
}

/// Test: stopping the loop sends one last report past the throttle
#[tokio::test]
async fn test_run_stop_flushes_progress() {
    let mut server = Server::new_async().await;
    let progress = playback_mock(&mut server, "/api/v1/movie/tmdb-603/playback", 2).await;
    let history = server
        .mock("POST", "/api/v1/movie/tmdb-603/history")
        .expect(0)
        .create_async()
        .await;

    let (mut controller, surface) = scripted(&server, [playing(900.0, 2400.0)]);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let stop = CancellationToken::new();
    let stopper = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });

    let outcome = controller.run(TICK, &stop).await.unwrap();
    assert_eq!(outcome.position, Some(900.0));
    assert!(!outcome.ended);
    assert!(!outcome.watched);
    assert_eq!(
        outcome.final_report,
        Some(ProgressReport::Recorded { watched: false })
    );
    assert_eq!(surface.events().last().map(String::as_str), Some("close"));
    progress.assert_async().await;
    history.assert_async().await;
}

/// Test: a server-side scrobble is not followed by a second watch event
#[tokio::test]
async fn test_run_skips_completion_after_scrobble() {
    let mut server = Server::new_async().await;
    let _progress = server
        .mock("POST", "/api/v1/movie/tmdb-603/playback")
        .with_status(200)
        .with_body(r#"{"status": "success", "watched": true}"#)
        .create_async()
        .await;
    let history = server
        .mock("POST", "/api/v1/movie/tmdb-603/history")
        .expect(0)
        .create_async()
        .await;

    let (mut controller, _) = scripted(
        &server,
        [
            playing(2300.0, 2400.0),
            SurfaceState::Ended { duration: 2400.0 },
        ],
    );
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let outcome = controller
        .run(TICK, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.ended);
    assert!(outcome.watched);
    history.assert_async().await;
}

/// Test: an expired session stops the loop and releases the player
#[tokio::test]
async fn test_run_session_expired() {
    let mut server = Server::new_async().await;
    let _progress = server
        .mock("POST", "/api/v1/movie/tmdb-603/playback")
        .with_status(401)
        .create_async()
        .await;

    let (mut controller, surface) = scripted(&server, [playing(900.0, 2400.0)]);
    controller
        .start_session(movie(), candidate("d", StreamProtocol::Direct), 0.0)
        .await
        .unwrap();

    let err = controller
        .run(TICK, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_session_expired());
    assert!(controller.session().is_none());
    assert_eq!(surface.events().last().map(String::as_str), Some("close"));
}
