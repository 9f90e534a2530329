//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the resolver, playback controller and
//! reconciler. Each handler takes CLI args, the shared [`Context`] and Output,
//! returns ExitCode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::{HoundClient, SessionState};
use crate::cli::{
    ContinueCmd, ExitCode, ForgetCmd, HistoryCmd, InfoCmd, NextCmd, Output, PlayCmd, ProgressCmd,
    RewatchCmd, StatusOk, StreamsCmd, UnwatchCmd, WatchedCmd,
};
use crate::config::Config;
use crate::error::HoundError;
use crate::history::{PlayAction, Reconciler};
use crate::models::{
    format_seconds, EpisodeReference, MediaReference, MediaType, StreamCandidate, StreamProtocol,
};
use crate::stream::{
    DetachedSurface, LocalPlayer, PlaybackController, PlaybackOutcome, PlaybackTarget, PlayerType,
    ResolveMode, ResumeHint, StreamResolver,
};

/// How often the local player's position is read
const PLAYER_POLL_TICK: Duration = Duration::from_secs(1);

// =============================================================================
// Context
// =============================================================================

/// Configuration plus a client wired to clear the session on expiry
pub struct Context {
    pub config: Config,
    pub client: HoundClient,
    pub session: Arc<SessionState>,
}

impl Context {
    /// Load config (from `path` or the default location) and build the client
    pub fn load(path: Option<&Path>) -> Self {
        let config = match path {
            Some(p) => Config::load_from(p).with_env_overrides(),
            None => Config::load(),
        };
        let file = path.map(Path::to_path_buf).or_else(Config::path);
        Self::new(config, file)
    }

    /// Build the client; a 401 clears the cookie stored at `config_file`
    pub fn new(config: Config, config_file: Option<PathBuf>) -> Self {
        let session = Arc::new(SessionState::with_hook(move || {
            if let Some(path) = config_file.as_deref() {
                clear_session_cookie(path);
            }
        }));
        let client = HoundClient::new(&config.server_url)
            .with_client_name(&config.client_name)
            .with_session_cookie(config.session_cookie.clone())
            .with_auth_observer(session.clone());
        Self {
            config,
            client,
            session,
        }
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.client.clone())
    }

    fn player_type(&self, choice: Option<PlayerType>) -> PlayerType {
        choice
            .or_else(|| self.config.player.as_deref().and_then(PlayerType::from_name))
            .unwrap_or_default()
    }
}

fn clear_session_cookie(path: &Path) {
    if !path.exists() {
        return;
    }
    let mut stored = Config::load_from(path);
    if stored.session_cookie.take().is_none() {
        return;
    }
    if let Err(e) = stored.save_to(path) {
        warn!(error = %e, "failed to clear cached session");
    }
}

/// Print `data`, mapping serialization failures to a general error
fn emit<T: Serialize>(output: &Output, data: T, lines: &[String]) -> ExitCode {
    match output.print_or(data, lines) {
        Ok(()) => ExitCode::Success,
        Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
    }
}

// =============================================================================
// Info Command
// =============================================================================

pub async fn info_cmd(cmd: InfoCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.title.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    output.info(format!("Getting info for: {}", reference));

    match ctx.client.media_details(&reference).await {
        Ok(details) => {
            if let Err(e) = output.print(&details) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.fail(&HoundError::from_api(e)),
    }
}

// =============================================================================
// Streams Command
// =============================================================================

#[derive(Serialize)]
struct IndexedStream<'a> {
    index: usize,
    default: bool,
    #[serde(flatten)]
    stream: &'a StreamCandidate,
}

pub async fn streams_cmd(cmd: StreamsCmd, ctx: &Context, output: &Output) -> ExitCode {
    let (reference, episode) = match (cmd.title.reference(), cmd.episode.reference()) {
        (Ok(r), Ok(e)) => (r, e),
        (Err(e), _) => return output.error(e.to_string(), ExitCode::InvalidArgs),
        (_, Err(e)) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    output.info(format!("Finding streams for: {}", reference));

    let resolver = StreamResolver::new(ctx.client.clone());
    let hint = cmd.prefer.map(ResumeHint::new);
    let cancel = cancel_on_ctrl_c();
    let resolution = match resolver
        .resolve(
            &reference,
            episode.as_ref(),
            ResolveMode::Select,
            hint.as_ref(),
            &cancel,
        )
        .await
    {
        Ok(r) => r,
        Err(e) => return output.fail(&e),
    };

    let default_position = resolution.default_position();
    let indexed: Vec<IndexedStream> = resolution
        .response
        .candidates()
        .enumerate()
        .map(|(index, (_, stream))| IndexedStream {
            index,
            default: index == default_position,
            stream,
        })
        .collect();

    let lines: Vec<String> = indexed
        .iter()
        .map(|s| {
            format!(
                "{}{:>3}  {}  ({})",
                if s.default { "▸" } else { " " },
                s.index,
                s.stream,
                s.stream.provider_name
            )
        })
        .collect();

    emit(output, &indexed, &lines)
}

// =============================================================================
// Play Command
// =============================================================================

#[derive(Serialize)]
struct PlayResponse {
    status: &'static str,
    media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode: Option<EpisodeReference>,
    stream_url: String,
    start_seconds: f64,
    candidate: StreamCandidate,
    outcome: PlaybackOutcome,
}

pub async fn play_cmd(cmd: PlayCmd, ctx: &Context, output: &Output) -> ExitCode {
    let (reference, explicit_episode) = match (cmd.title.reference(), cmd.episode.reference()) {
        (Ok(r), Ok(e)) => (r, e),
        (Err(e), _) => return output.error(e.to_string(), ExitCode::InvalidArgs),
        (_, Err(e)) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    // Work out what to play and where to start
    let (episode, start, hint) = match (reference.media_type(), explicit_episode) {
        (MediaType::TvShow, Some(ep)) => {
            let action = ctx.reconciler().episode_action(&reference, ep).await;
            if action.is_resume() {
                output.info(&action);
            }
            let hint = action.resume_hint();
            (action.episode().cloned(), action.start_seconds(), hint)
        }
        (MediaType::TvShow, None) => {
            let season = cmd.episode.season.unwrap_or(1);
            let action = ctx.reconciler().play_action(&reference, season).await;
            output.info(&action);
            let hint = action.resume_hint();
            (action.episode().cloned(), action.start_seconds(), hint)
        }
        _ => {
            let action = ctx.reconciler().movie_action(&reference).await;
            if action.is_resume() {
                output.info(&action);
            }
            (None, action.start_seconds(), action.resume_hint())
        }
    };
    let start = cmd.from.unwrap_or(start);

    let target = match (reference.media_type(), episode) {
        (MediaType::TvShow, Some(ep)) => PlaybackTarget::episode(reference.clone(), ep),
        (MediaType::TvShow, None) => {
            return output.error("Could not determine an episode to play", ExitCode::InvalidArgs)
        }
        _ => PlaybackTarget::movie(reference.clone()),
    };

    let player_type = ctx.player_type(cmd.player.map(Into::into));
    let player = LocalPlayer::new(player_type);
    if !player.is_available().await {
        return output.error(
            format!(
                "{} not found. Install it first.",
                player_type.display_name()
            ),
            ExitCode::PlayerNotFound,
        );
    }

    // Resolve
    output.info(format!("Finding streams for: {}", target));
    let mode = if cmd.pick.is_some() {
        ResolveMode::Select
    } else {
        ResolveMode::Direct
    };
    let cancel = cancel_on_ctrl_c();
    let resolver = StreamResolver::new(ctx.client.clone());
    let resolution = match resolver
        .resolve(
            &target.reference,
            target.episode.as_ref(),
            mode,
            hint.as_ref(),
            &cancel,
        )
        .await
    {
        Ok(r) => r,
        Err(HoundError::Cancelled) => return ExitCode::Error,
        Err(e) => return output.fail(&e),
    };

    let candidate = match cmd.pick {
        Some(n) => match resolution.pick(n) {
            Some(c) => c,
            None => {
                return output.error(
                    format!(
                        "No stream at index {} ({} available)",
                        n,
                        resolution.response.candidate_count()
                    ),
                    ExitCode::InvalidArgs,
                )
            }
        },
        None => resolution.default_candidate.clone(),
    };

    // Play
    let mut controller = PlaybackController::new(ctx.client.clone(), player)
        .with_limits(ctx.config.progress_floor(), ctx.config.progress_interval());

    output.info(format!(
        "Playing {} in {} from {}...",
        candidate,
        player_type.display_name(),
        format_seconds(start)
    ));
    let stream_url = match controller
        .start_session(target.clone(), candidate.clone(), start)
        .await
    {
        Ok(session) => session.stream_url().to_string(),
        Err(e) => return output.fail(&e),
    };

    // Report from the player's own position until it closes or Ctrl-C
    let outcome = match controller.run(PLAYER_POLL_TICK, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => return output.fail(&e),
    };

    let mut lines = Vec::new();
    if let Some(position) = outcome.position {
        lines.push(format!("Stopped at {}", format_seconds(position)));
    }
    if outcome.watched {
        lines.push("Marked watched".to_string());
    }
    let response = PlayResponse {
        status: if outcome.ended { "finished" } else { "stopped" },
        media: target.reference.path_id(),
        episode: target.episode,
        stream_url,
        start_seconds: start,
        candidate,
        outcome,
    };
    emit(output, response, &lines)
}

/// Token cancelled when the user presses Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

// =============================================================================
// Progress Command
// =============================================================================

pub async fn progress_cmd(cmd: ProgressCmd, ctx: &Context, output: &Output) -> ExitCode {
    let (reference, episode) = match (cmd.title.reference(), cmd.episode.reference()) {
        (Ok(r), Ok(e)) => (r, e),
        (Err(e), _) => return output.error(e.to_string(), ExitCode::InvalidArgs),
        (_, Err(e)) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    let target = match (reference.media_type(), episode) {
        (MediaType::TvShow, Some(ep)) => PlaybackTarget::episode(reference, ep),
        (MediaType::TvShow, None) => {
            return output.error(
                "Shows need --season and --episode",
                ExitCode::InvalidArgs,
            )
        }
        _ => PlaybackTarget::movie(reference),
    };

    let candidate = StreamCandidate {
        encoded_data: cmd.stream,
        stream_protocol: if cmd.p2p {
            StreamProtocol::P2p
        } else {
            StreamProtocol::Direct
        },
        resolution: None,
        file_size: None,
        codec: None,
        audio_tracks: Vec::new(),
        cached: false,
        provider_name: String::new(),
    };

    let mut controller = PlaybackController::new(ctx.client.clone(), DetachedSurface::new())
        .with_limits(ctx.config.progress_floor(), ctx.config.progress_interval());
    if let Err(e) = controller.attach(target, candidate, cmd.position) {
        return output.fail(&e);
    }

    let report = match controller.report_progress(cmd.position, cmd.duration).await {
        Ok(r) => r,
        Err(e) => return output.fail(&e),
    };
    controller.close();

    let line = format!(
        "{} / {}: {:?}",
        format_seconds(cmd.position),
        format_seconds(cmd.duration),
        report
    );
    emit(output, report, &[line])
}

// =============================================================================
// Watched Command
// =============================================================================

pub async fn watched_cmd(cmd: WatchedCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.title.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    let reconciler = ctx.reconciler();
    let result = match reference.media_type() {
        MediaType::TvShow => {
            if cmd.episode_ids.is_empty() {
                return output.error("Shows need --episode-ids", ExitCode::InvalidArgs);
            }
            reconciler
                .mark_episodes_watched(&reference, cmd.episode_ids, cmd.at)
                .await
        }
        _ => reconciler.mark_movie_watched(&reference, cmd.at).await,
    };

    match result {
        Ok(()) => emit(output, StatusOk::default(), &["Marked watched".to_string()]),
        Err(e) => output.fail(&e),
    }
}

// =============================================================================
// Next Command
// =============================================================================

pub async fn next_cmd(cmd: NextCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.title.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    let action: PlayAction = match reference.media_type() {
        MediaType::TvShow => ctx.reconciler().play_action(&reference, cmd.season).await,
        _ => ctx.reconciler().movie_action(&reference).await,
    };
    let line = action.to_string();
    emit(output, action, &[line])
}

// =============================================================================
// History Command
// =============================================================================

pub async fn history_cmd(cmd: HistoryCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.title.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    let rewatches = match ctx.reconciler().history(&reference).await {
        Ok(r) => r,
        Err(e) => return output.fail(&e),
    };

    let mut lines = Vec::new();
    for rewatch in &rewatches {
        lines.push(format!(
            "Rewatch started {} ({} events)",
            rewatch.rewatch_started_at.format("%Y-%m-%d"),
            rewatch.watch_events.len()
        ));
        for event in &rewatch.watch_events {
            let what = match event.episode_key() {
                Some(k) => format!("S{:02}E{:02}", k.season, k.episode),
                None => reference.path_id(),
            };
            lines.push(format!(
                "  {}  {}  (#{})",
                event.watched_at.format("%Y-%m-%d %H:%M"),
                what,
                event.watch_event_id
            ));
        }
    }
    if rewatches.is_empty() {
        lines.push("No watch history".to_string());
    }

    emit(output, &rewatches, &lines)
}

// =============================================================================
// Rewatch Command
// =============================================================================

pub async fn rewatch_cmd(cmd: RewatchCmd, ctx: &Context, output: &Output) -> ExitCode {
    let show = match MediaReference::parse(MediaType::TvShow, &cmd.id) {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };
    if !cmd.yes {
        return output.error(
            "Starting a rewatch resets which episodes count as watched. Pass --yes to confirm.",
            ExitCode::InvalidArgs,
        );
    }

    match ctx.reconciler().start_rewatch(&show, cmd.at).await {
        Ok(Some(rewatch)) => {
            let line = format!(
                "Started rewatch at {}",
                rewatch.rewatch_started_at.format("%Y-%m-%d %H:%M")
            );
            emit(output, rewatch, &[line])
        }
        Ok(None) => emit(output, StatusOk::default(), &["Started rewatch".to_string()]),
        Err(e) => output.fail(&e),
    }
}

// =============================================================================
// Continue Command
// =============================================================================

pub async fn continue_cmd(cmd: ContinueCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };

    let reconciler = ctx.reconciler();
    let actions = match reference {
        Some(reference) => match reconciler.next_watch_action(&reference).await {
            Ok(action) => action.into_iter().collect(),
            Err(e) => return output.fail(&e),
        },
        None => match reconciler.continue_watching().await {
            Ok(actions) => actions,
            Err(e) => return output.fail(&e),
        },
    };

    let mut lines: Vec<String> = actions
        .iter()
        .map(|a| match a.title.as_str() {
            "" => a.to_string(),
            title => format!("{}  {}", a, title),
        })
        .collect();
    if lines.is_empty() {
        lines.push("Nothing to continue".to_string());
    }
    emit(output, &actions, &lines)
}

// =============================================================================
// Forget Command
// =============================================================================

pub async fn forget_cmd(cmd: ForgetCmd, ctx: &Context, output: &Output) -> ExitCode {
    let (reference, episode) = match (cmd.title.reference(), cmd.episode.reference()) {
        (Ok(r), Ok(e)) => (r, e),
        (Err(e), _) => return output.error(e.to_string(), ExitCode::InvalidArgs),
        (_, Err(e)) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };
    if reference.media_type() != MediaType::TvShow && episode.is_some() {
        return output.error("Only shows have episodes", ExitCode::InvalidArgs);
    }

    match ctx
        .reconciler()
        .clear_progress(&reference, episode.as_ref())
        .await
    {
        Ok(()) => {
            let what = match &episode {
                Some(ep) => format!("{} {}", reference, ep),
                None => reference.to_string(),
            };
            emit(
                output,
                StatusOk::default(),
                &[format!("Cleared progress for {}", what)],
            )
        }
        Err(e) => output.fail(&e),
    }
}

// =============================================================================
// Unwatch Command
// =============================================================================

pub async fn unwatch_cmd(cmd: UnwatchCmd, ctx: &Context, output: &Output) -> ExitCode {
    let reference = match cmd.title.reference() {
        Ok(r) => r,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };
    if cmd.event_ids.is_empty() {
        return output.error("Pass at least one --event-ids", ExitCode::InvalidArgs);
    }

    match ctx
        .reconciler()
        .delete_watch_events(&reference, &cmd.event_ids)
        .await
    {
        Ok(()) => emit(
            output,
            StatusOk::default(),
            &[format!("Deleted {} watch events", cmd.event_ids.len())],
        ),
        Err(e) => output.fail(&e),
    }
}
