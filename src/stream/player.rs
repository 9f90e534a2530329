//! Player surfaces
//!
//! A [`PlayerSurface`] is the single output a playback session renders to.
//! [`LocalPlayer`] opens the backend stream URL in VLC or mpv and reads the
//! position back over the player's control socket.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(unix)]
use super::ipc::PlayerIpc;

/// Supported local players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerType {
    /// VLC media player (default)
    #[default]
    Vlc,
    /// mpv media player
    Mpv,
}

impl PlayerType {
    /// Parse a player name from config/CLI
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vlc" => Some(PlayerType::Vlc),
            "mpv" => Some(PlayerType::Mpv),
            _ => None,
        }
    }

    /// Get the command name for this player
    pub fn command(&self) -> &'static str {
        match self {
            PlayerType::Vlc => {
                // On macOS, VLC is an app bundle - check for it
                #[cfg(target_os = "macos")]
                if std::path::Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            PlayerType::Mpv => "mpv",
        }
    }

    /// Short lowercase name, independent of the install location
    pub fn command_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "vlc",
            PlayerType::Mpv => "mpv",
        }
    }

    /// Arguments that expose a control socket at `socket` for position polling
    ///
    /// Both players are kept open at the end of the file so the end is seen
    /// over the socket before the window goes away.
    pub fn control_args(&self, socket: &Path) -> Vec<String> {
        match self {
            PlayerType::Vlc => vec![
                "--extraintf=rc".to_string(),
                format!("--rc-unix={}", socket.display()),
                "--play-and-pause".to_string(),
            ],
            PlayerType::Mpv => vec![
                format!("--input-ipc-server={}", socket.display()),
                "--keep-open=yes".to_string(),
            ],
        }
    }

    /// Arguments that open `url` and seek to `start_secs` once media is loaded
    pub fn args(&self, url: &str, start_secs: f64) -> Vec<String> {
        let start = start_secs.max(0.0).floor() as u64;
        let mut args = vec![url.to_string()];
        match self {
            PlayerType::Vlc => {
                if start > 0 {
                    args.push(format!("--start-time={}", start));
                }
                args.push("--no-video-title-show".to_string());
            }
            PlayerType::Mpv => {
                if start > 0 {
                    args.push(format!("--start={}", start));
                }
                args.push("--force-window=immediate".to_string());
            }
        }
        args
    }

    /// Get a display name for this player
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
        }
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Errors from player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
    #[error("Player is already open")]
    AlreadyOpen,
}

/// What a surface is doing at the moment it is polled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceState {
    /// Open, but no position is known yet
    Loading,
    /// Media is loaded; this is the first ready signal on its first occurrence
    Playing { position: f64, duration: f64 },
    /// End of file reached
    Ended { duration: f64 },
    /// Closed by the user, or never opened
    Closed,
}

/// Output a playback session binds a stream to
///
/// Implementations apply `start_secs` once, on their first ready signal.
pub trait PlayerSurface {
    /// Start rendering `url`, seeking to `start_secs` when ready
    fn open(&mut self, url: &str, start_secs: f64) -> Result<(), PlayerError>;

    /// Release the surface; must be safe to call when not open
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Non-blocking snapshot of playback
    ///
    /// Surfaces that cannot observe the position stay `Loading` while open.
    fn poll(&mut self) -> SurfaceState {
        if self.is_open() {
            SurfaceState::Loading
        } else {
            SurfaceState::Closed
        }
    }

    /// Move playback to `secs`
    fn seek(&mut self, _secs: f64) {}
}

/// Local player process as a surface
pub struct LocalPlayer {
    player_type: PlayerType,
    child: Option<Child>,
    #[cfg(unix)]
    ipc: Option<PlayerIpc>,
}

impl LocalPlayer {
    /// Create a new local player with the specified type
    pub fn new(player_type: PlayerType) -> Self {
        Self {
            player_type,
            child: None,
            #[cfg(unix)]
            ipc: None,
        }
    }

    /// Get the player type
    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    /// Check if the player is available on the system
    pub async fn is_available(&self) -> bool {
        let cmd = self.player_type.command();

        // If it's a full path (macOS app bundle), check if it exists
        if cmd.starts_with('/') {
            return std::path::Path::new(cmd).exists();
        }

        // Otherwise use 'which' to find in PATH
        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether the process is gone; reaps it if so
    fn exited(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(None) => false,
            Ok(Some(status)) => {
                debug!(player = %self.player_type, %status, "player exited");
                true
            }
            Err(e) => {
                warn!(player = %self.player_type, error = %e, "failed to check player process");
                true
            }
        }
    }

    #[cfg(unix)]
    fn read_state(&mut self) -> SurfaceState {
        let Some(ipc) = self.ipc.as_mut() else {
            return SurfaceState::Loading;
        };
        let clock = ipc.poll();
        match (clock.eof, clock.position, clock.duration) {
            (true, pos, dur) => SurfaceState::Ended {
                duration: dur.or(pos).unwrap_or(0.0),
            },
            (false, Some(position), Some(duration)) if duration > 0.0 => {
                SurfaceState::Playing { position, duration }
            }
            _ => SurfaceState::Loading,
        }
    }

    #[cfg(not(unix))]
    fn read_state(&mut self) -> SurfaceState {
        SurfaceState::Loading
    }
}

impl PlayerSurface for LocalPlayer {
    fn open(&mut self, url: &str, start_secs: f64) -> Result<(), PlayerError> {
        if self.is_open() {
            return Err(PlayerError::AlreadyOpen);
        }

        let mut cmd = Command::new(self.player_type.command());
        cmd.args(self.player_type.args(url, start_secs));
        #[cfg(unix)]
        let ipc = {
            let ipc = PlayerIpc::new(self.player_type);
            cmd.args(self.player_type.control_args(ipc.socket_path()));
            ipc
        };
        // Don't capture output - let it display normally
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        debug!(player = %self.player_type, start_secs, "launching player");
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayerError::NotFound(self.player_type.command().to_string())
            } else {
                PlayerError::StartFailed(e)
            }
        })?;
        self.child = Some(child);
        #[cfg(unix)]
        {
            self.ipc = Some(ipc);
        }
        Ok(())
    }

    fn close(&mut self) {
        #[cfg(unix)]
        {
            self.ipc = None;
        }
        if let Some(mut child) = self.child.take() {
            match child.start_kill() {
                Ok(()) => debug!(player = %self.player_type, "player stopped"),
                // Already exited on its own
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
                Err(e) => warn!(player = %self.player_type, error = %e, "failed to stop player"),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }

    fn poll(&mut self) -> SurfaceState {
        if self.child.is_none() {
            return SurfaceState::Closed;
        }
        let state = self.read_state();
        if !self.exited() {
            return state;
        }
        self.child = None;
        match state {
            SurfaceState::Ended { .. } => state,
            _ => SurfaceState::Closed,
        }
    }

    fn seek(&mut self, secs: f64) {
        #[cfg(unix)]
        if let Some(ipc) = self.ipc.as_mut() {
            debug!(player = %self.player_type, secs, "seeking");
            ipc.seek(secs);
        }
        #[cfg(not(unix))]
        let _ = secs;
    }
}

/// Surface for a player this process does not drive
///
/// Used when reporting on behalf of an external player: the session rules
/// still apply but nothing is launched.
#[derive(Debug, Default)]
pub struct DetachedSurface {
    url: Option<String>,
}

impl DetachedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL the external player should be pointed at
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl PlayerSurface for DetachedSurface {
    fn open(&mut self, url: &str, _start_secs: f64) -> Result<(), PlayerError> {
        self.url = Some(url.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.url = None;
    }

    fn is_open(&self) -> bool {
        self.url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_surface() {
        let mut surface = DetachedSurface::new();
        surface.open("http://h/api/v1/stream/x", 10.0).unwrap();
        assert_eq!(surface.url(), Some("http://h/api/v1/stream/x"));
        surface.close();
        assert!(!surface.is_open());
    }

    #[test]
    fn test_player_type_command() {
        // On macOS with VLC installed, returns full path; otherwise "vlc"
        let vlc_cmd = PlayerType::Vlc.command();
        assert!(vlc_cmd == "vlc" || vlc_cmd == "/Applications/VLC.app/Contents/MacOS/VLC");
        assert_eq!(PlayerType::Mpv.command(), "mpv");
    }

    #[test]
    fn test_player_type_from_name() {
        assert_eq!(PlayerType::from_name("MPV"), Some(PlayerType::Mpv));
        assert_eq!(PlayerType::from_name("vlc"), Some(PlayerType::Vlc));
        assert_eq!(PlayerType::from_name("kodi"), None);
    }

    #[test]
    fn test_start_offset_args() {
        let args = PlayerType::Mpv.args("http://h/s", 600.7);
        assert_eq!(args[0], "http://h/s");
        assert!(args.contains(&"--start=600".to_string()));

        let args = PlayerType::Vlc.args("http://h/s", 0.0);
        assert!(!args.iter().any(|a| a.starts_with("--start-time")));
    }

    #[test]
    fn test_close_when_not_open() {
        let mut player = LocalPlayer::new(PlayerType::Mpv);
        assert!(!player.is_open());
        player.close();
        assert!(!player.is_open());
        assert_eq!(player.poll(), SurfaceState::Closed);
    }

    #[test]
    fn test_control_args() {
        let socket = Path::new("/tmp/hound-mpv.sock");
        let args = PlayerType::Mpv.control_args(socket);
        assert!(args.contains(&"--input-ipc-server=/tmp/hound-mpv.sock".to_string()));
        assert!(args.contains(&"--keep-open=yes".to_string()));

        let args = PlayerType::Vlc.control_args(socket);
        assert!(args.contains(&"--extraintf=rc".to_string()));
        assert!(args.contains(&"--rc-unix=/tmp/hound-mpv.sock".to_string()));
    }

    #[test]
    fn test_detached_surface_never_plays() {
        let mut surface = DetachedSurface::new();
        assert_eq!(surface.poll(), SurfaceState::Closed);
        surface.open("http://h/s", 0.0).unwrap();
        assert_eq!(surface.poll(), SurfaceState::Loading);
    }
}
