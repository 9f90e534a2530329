//! Player control sockets
//!
//! mpv speaks JSON lines on `--input-ipc-server`; VLC's `rc` interface on
//! `--rc-unix` answers `get_time` / `get_length` with bare numbers. Both are
//! read without blocking so a poll never stalls the reporting loop.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::player::PlayerType;

/// VLC reports whole seconds; this close to the end counts as finished
const VLC_END_SLACK_SECS: f64 = 1.0;

/// Last known playback position as read from the player
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackClock {
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub eof: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VlcQuery {
    Time,
    Length,
}

/// Connection to a running player's control socket
#[derive(Debug)]
pub struct PlayerIpc {
    player_type: PlayerType,
    socket_path: PathBuf,
    conn: Option<BufReader<UnixStream>>,
    partial: String,
    pending: VecDeque<VlcQuery>,
    clock: PlaybackClock,
}

impl PlayerIpc {
    /// Pick a fresh socket path; the player creates it on launch
    pub fn new(player_type: PlayerType) -> Self {
        let name = format!(
            "hound-{}-{}.sock",
            player_type.command_name(),
            Uuid::new_v4().simple()
        );
        Self {
            player_type,
            socket_path: std::env::temp_dir().join(name),
            conn: None,
            partial: String::new(),
            pending: VecDeque::new(),
            clock: PlaybackClock::default(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn clock(&self) -> PlaybackClock {
        self.clock
    }

    /// Read whatever the player has sent and queue the next queries
    pub fn poll(&mut self) -> PlaybackClock {
        if self.conn.is_none() {
            self.connect();
        }
        self.drain();
        if self.player_type == PlayerType::Vlc && self.pending.is_empty() {
            self.send_line("get_time");
            self.send_line("get_length");
            if self.conn.is_some() {
                self.pending.extend([VlcQuery::Time, VlcQuery::Length]);
            }
        }
        self.clock
    }

    /// Seek to `secs` in the loaded media
    pub fn seek(&mut self, secs: f64) {
        let line = match self.player_type {
            PlayerType::Mpv => {
                json!({"command": ["set_property", "time-pos", secs]}).to_string()
            }
            PlayerType::Vlc => format!("seek {}", secs.max(0.0).floor() as u64),
        };
        self.send_line(&line);
    }

    fn connect(&mut self) {
        let stream = match UnixStream::connect(&self.socket_path) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "player socket not ready yet");
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(error = %e, "player socket cannot be read without blocking");
            return;
        }
        debug!(path = %self.socket_path.display(), "connected to player socket");
        self.conn = Some(BufReader::new(stream));

        if self.player_type == PlayerType::Mpv {
            // Property ids must be numbers
            for (id, property) in [(1, "time-pos"), (2, "duration"), (3, "eof-reached")] {
                let line = json!({"command": ["observe_property", id, property]}).to_string();
                self.send_line(&line);
            }
        }
    }

    fn send_line(&mut self, line: &str) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let stream = conn.get_mut();
        if let Err(e) = writeln!(stream, "{}", line).and_then(|_| stream.flush()) {
            debug!(error = %e, "player socket closed");
            self.disconnect();
        }
    }

    fn drain(&mut self) {
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            // `partial` keeps a line split across reads
            match conn.read_line(&mut self.partial) {
                Ok(0) => {
                    debug!("player closed its socket");
                    self.disconnect();
                    return;
                }
                Ok(_) if self.partial.ends_with('\n') => {
                    let line = std::mem::take(&mut self.partial);
                    match self.player_type {
                        PlayerType::Mpv => apply_mpv_line(&mut self.clock, &line),
                        PlayerType::Vlc => {
                            apply_vlc_line(&mut self.clock, &mut self.pending, &line)
                        }
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "player socket read failed");
                    self.disconnect();
                    return;
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.conn = None;
        self.pending.clear();
        self.partial.clear();
    }
}

impl Drop for PlayerIpc {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != ErrorKind::NotFound {
                debug!(error = %e, "failed to remove player socket");
            }
        }
    }
}

/// Apply one mpv event line
fn apply_mpv_line(clock: &mut PlaybackClock, line: &str) {
    let Ok(msg) = serde_json::from_str::<Value>(line) else {
        return;
    };
    if msg["event"] != "property-change" {
        return;
    }
    match msg["name"].as_str() {
        // null while nothing is loaded
        Some("time-pos") => {
            if let Some(pos) = msg["data"].as_f64() {
                clock.position = Some(pos);
            }
        }
        Some("duration") => {
            if let Some(dur) = msg["data"].as_f64() {
                clock.duration = Some(dur);
            }
        }
        Some("eof-reached") => {
            if msg["data"].as_bool() == Some(true) {
                info!("player reached end of file");
                clock.eof = true;
                if let Some(dur) = clock.duration {
                    clock.position = Some(dur);
                }
            }
        }
        _ => {}
    }
}

/// Apply one rc line to the oldest pending query
fn apply_vlc_line(clock: &mut PlaybackClock, pending: &mut VecDeque<VlcQuery>, line: &str) {
    let answer = line.trim().trim_start_matches('>').trim();
    if answer.is_empty() {
        // No input loaded: the query is answered with a blank line
        pending.pop_front();
        return;
    }
    let Ok(value) = answer.parse::<f64>() else {
        // Status chatter such as "status change: ( play state: 3 )"
        return;
    };
    match pending.pop_front() {
        Some(VlcQuery::Time) => clock.position = Some(value),
        Some(VlcQuery::Length) => {
            if value > 0.0 {
                clock.duration = Some(value);
            }
        }
        None => return,
    }
    if let (Some(pos), Some(dur)) = (clock.position, clock.duration) {
        clock.eof = dur > 0.0 && pos >= dur - VLC_END_SLACK_SECS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpv_property_changes() {
        let mut clock = PlaybackClock::default();
        apply_mpv_line(
            &mut clock,
            r#"{"event":"property-change","id":2,"name":"duration","data":2400.5}"#,
        );
        apply_mpv_line(
            &mut clock,
            r#"{"event":"property-change","id":1,"name":"time-pos","data":612.25}"#,
        );
        assert_eq!(clock.position, Some(612.25));
        assert_eq!(clock.duration, Some(2400.5));
        assert!(!clock.eof);

        // Unloaded time-pos keeps the last value
        apply_mpv_line(
            &mut clock,
            r#"{"event":"property-change","id":1,"name":"time-pos","data":null}"#,
        );
        assert_eq!(clock.position, Some(612.25));

        apply_mpv_line(
            &mut clock,
            r#"{"event":"property-change","id":3,"name":"eof-reached","data":true}"#,
        );
        assert!(clock.eof);
        assert_eq!(clock.position, Some(2400.5));
    }

    #[test]
    fn test_mpv_ignores_replies_and_garbage() {
        let mut clock = PlaybackClock::default();
        apply_mpv_line(&mut clock, r#"{"request_id":0,"error":"success"}"#);
        apply_mpv_line(&mut clock, "not json");
        assert_eq!(clock, PlaybackClock::default());
    }

    #[test]
    fn test_vlc_answers_in_query_order() {
        let mut clock = PlaybackClock::default();
        let mut pending = VecDeque::from([VlcQuery::Time, VlcQuery::Length]);
        apply_vlc_line(&mut clock, &mut pending, "status change: ( play state: 3 )\n");
        apply_vlc_line(&mut clock, &mut pending, "> 600\n");
        apply_vlc_line(&mut clock, &mut pending, "2400\n");
        assert!(pending.is_empty());
        assert_eq!(clock.position, Some(600.0));
        assert_eq!(clock.duration, Some(2400.0));
        assert!(!clock.eof);

        let mut pending = VecDeque::from([VlcQuery::Time]);
        apply_vlc_line(&mut clock, &mut pending, "2399\n");
        assert!(clock.eof);
    }

    #[test]
    fn test_vlc_blank_answer_consumes_query() {
        let mut clock = PlaybackClock::default();
        let mut pending = VecDeque::from([VlcQuery::Time, VlcQuery::Length]);
        apply_vlc_line(&mut clock, &mut pending, "> \n");
        assert_eq!(pending, VecDeque::from([VlcQuery::Length]));
        assert_eq!(clock.position, None);
    }

    #[test]
    fn test_socket_path_is_unique() {
        let a = PlayerIpc::new(PlayerType::Mpv);
        let b = PlayerIpc::new(PlayerType::Mpv);
        assert_ne!(a.socket_path(), b.socket_path());
        assert!(a.socket_path().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_poll_before_player_starts() {
        let mut ipc = PlayerIpc::new(PlayerType::Vlc);
        assert_eq!(ipc.poll(), PlaybackClock::default());
        assert!(ipc.pending.is_empty());
    }
}
