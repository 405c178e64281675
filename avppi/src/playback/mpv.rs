//! mpv adapter over the JSON IPC socket
//!
//! mpv is started with `--idle=yes --loop-playlist=inf` and an IPC server
//! socket; every [`MediaEngine`] call becomes one or more JSON commands:
//!
//! ```text
//! → {"command":["get_property","time-pos"],"request_id":7}
//! ← {"data":12.48,"error":"success","request_id":7}
//! ```
//!
//! Asynchronous event lines interleave with replies and are skipped.
//! Requests can be pipelined: a snapshot writes all its property reads at
//! once and collects the replies by `request_id`. Each call shares one reply
//! deadline, so a wedged player costs at most `IO_TIMEOUT` per call.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info};

use super::engine::{EngineError, EngineResult, MediaEngine, PlaybackSnapshot, PlaybackState};

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);
const IO_TIMEOUT: Duration = Duration::from_secs(2);
const PROPERTY_UNAVAILABLE: &str = "property unavailable";

/// Payload of a reply, or the error mpv reported for `command`
fn reply_data(command: &str, reply: Value) -> EngineResult<Value> {
    match reply.get("error").and_then(Value::as_str) {
        Some("success") => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
        Some(error) => Err(EngineError::command(command, error)),
        None => Err(EngineError::command(command, "malformed reply")),
    }
}

fn timed_out() -> EngineError {
    EngineError::Unavailable(format!("mpv did not answer within {:?}", IO_TIMEOUT))
}

/// mpv property flags folded into the closed state set
///
/// Idle wins over everything, then end-of-file, cache stall, and pause.
pub fn map_state(idle_active: bool, eof_reached: bool, paused_for_cache: bool, pause: bool) -> PlaybackState {
    if idle_active {
        PlaybackState::Stopped
    } else if eof_reached {
        PlaybackState::Ended
    } else if paused_for_cache {
        PlaybackState::Buffering
    } else if pause {
        PlaybackState::Paused
    } else {
        PlaybackState::Playing
    }
}

pub struct MpvEngine {
    socket_path: PathBuf,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    child: Option<Child>,
    next_request_id: u64,
    /// Entry to restart after `stop` (mpv forgets its position when idle)
    last_index: Option<usize>,
}

impl MpvEngine {
    /// Spawn mpv and connect to its IPC socket
    pub fn spawn(binary: &str, socket_path: &Path, options: &[String]) -> EngineResult<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let child = Command::new(binary)
            .arg("--idle=yes")
            .arg("--loop-playlist=inf")
            .arg("--keep-open=no")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .args(options)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("cannot start {}: {}", binary, e)))?;
        info!(binary, pid = child.id(), socket = %socket_path.display(), "mpv started");

        let mut engine = Self::connect(socket_path)?;
        engine.child = Some(child);
        Ok(engine)
    }

    /// Connect to an mpv instance that is already listening on `socket_path`
    pub fn connect(socket_path: &Path) -> EngineResult<Self> {
        let mut last_error = None;
        for _ in 0..CONNECT_ATTEMPTS {
            match UnixStream::connect(socket_path) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(IO_TIMEOUT))?;
                    stream.set_write_timeout(Some(IO_TIMEOUT))?;
                    let writer = stream.try_clone()?;
                    debug!(socket = %socket_path.display(), "Connected to mpv IPC");
                    return Ok(Self {
                        socket_path: socket_path.to_path_buf(),
                        reader: BufReader::new(stream),
                        writer,
                        child: None,
                        next_request_id: 1,
                        last_index: None,
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    std::thread::sleep(CONNECT_BACKOFF);
                }
            }
        }
        Err(EngineError::Unavailable(format!(
            "mpv IPC socket {} not reachable: {}",
            socket_path.display(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Write one request; returns its `request_id`
    fn send(&mut self, args: &Value) -> EngineResult<u64> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let mut line = json!({ "command": args, "request_id": request_id }).to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        Ok(request_id)
    }

    /// Collect the replies to `ids`, in the same order, before one shared deadline
    fn await_replies(&mut self, ids: &[u64]) -> EngineResult<Vec<Value>> {
        let deadline = Instant::now() + IO_TIMEOUT;
        let mut replies: Vec<Option<Value>> = vec![None; ids.len()];
        let mut pending = ids.len();

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            self.reader.get_ref().set_read_timeout(Some(remaining))?;

            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return Err(EngineError::Unavailable("mpv closed the IPC socket".to_string())),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(timed_out());
                }
                Err(e) => return Err(e.into()),
            }
            let value: Value = match serde_json::from_str(line.trim()) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Ignoring unparsable mpv line: {}", e);
                    continue;
                }
            };
            // Event lines carry no request_id
            let Some(id) = value.get("request_id").and_then(Value::as_u64) else {
                continue;
            };
            if let Some(slot) = ids.iter().position(|i| *i == id) {
                if replies[slot].is_none() {
                    replies[slot] = Some(value);
                    pending -= 1;
                }
            }
        }
        Ok(replies.into_iter().flatten().collect())
    }

    /// Send one command and wait for its reply
    fn command(&mut self, args: Value) -> EngineResult<Value> {
        let name = args
            .get(0)
            .and_then(Value::as_str)
            .unwrap_or("command")
            .to_string();
        let id = self.send(&args)?;
        let reply = self
            .await_replies(&[id])?
            .pop()
            .unwrap_or(Value::Null);
        reply_data(&name, reply)
    }

    /// Read several properties in one round trip
    ///
    /// Unavailable properties come back as `None`.
    fn query(&mut self, properties: &[&str]) -> EngineResult<Vec<Option<Value>>> {
        let mut ids = Vec::with_capacity(properties.len());
        for property in properties {
            ids.push(self.send(&json!(["get_property", property]))?);
        }
        self.await_replies(&ids)?
            .into_iter()
            .map(|reply| match reply_data("get_property", reply) {
                Ok(value) => Ok(Some(value)),
                Err(EngineError::Command { reason, .. }) if reason == PROPERTY_UNAVAILABLE => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    fn get_property(&mut self, property: &str) -> EngineResult<Value> {
        self.command(json!(["get_property", property]))
    }

    /// Property value, `None` when mpv reports it unavailable (e.g. while idle)
    fn try_property(&mut self, property: &str) -> EngineResult<Option<Value>> {
        match self.get_property(property) {
            Ok(value) => Ok(Some(value)),
            Err(EngineError::Command { reason, .. }) if reason == PROPERTY_UNAVAILABLE => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn flag(&mut self, property: &str) -> EngineResult<bool> {
        Ok(self
            .try_property(property)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn set_property(&mut self, property: &str, value: Value) -> EngineResult<()> {
        self.command(json!(["set_property", property, value])).map(|_| ())
    }

    fn playlist_count(&mut self) -> EngineResult<usize> {
        Ok(self
            .get_property("playlist-count")?
            .as_u64()
            .unwrap_or(0) as usize)
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = self.command(json!(["quit"]));
            if let Err(e) = child.kill() {
                debug!("mpv already exited: {}", e);
            }
            let _ = child.wait();
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl MediaEngine for MpvEngine {
    fn play(&mut self) -> EngineResult<()> {
        if self.flag("idle-active")? && self.playlist_count()? > 0 {
            let index = self.last_index.unwrap_or(0);
            return self.play_index(index);
        }
        self.set_property("pause", json!(false))
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.set_property("pause", json!(true))
    }

    fn toggle_pause(&mut self) -> EngineResult<()> {
        self.command(json!(["cycle", "pause"])).map(|_| ())
    }

    fn stop(&mut self) -> EngineResult<()> {
        if let Some(index) = self.current_index()? {
            self.last_index = Some(index);
        }
        self.command(json!(["stop", "keep-playlist"])).map(|_| ())
    }

    fn next(&mut self) -> EngineResult<()> {
        if self.flag("idle-active")? {
            let count = self.playlist_count()?;
            if count == 0 {
                return Ok(());
            }
            let next = self.last_index.map(|i| (i + 1) % count).unwrap_or(0);
            return self.play_index(next);
        }
        self.command(json!(["playlist-next", "force"])).map(|_| ())
    }

    fn previous(&mut self) -> EngineResult<()> {
        self.command(json!(["playlist-prev", "force"])).map(|_| ())
    }

    fn set_volume(&mut self, percent: u8) -> EngineResult<()> {
        self.set_property("volume", json!(percent.min(100)))
    }

    fn volume(&mut self) -> EngineResult<u8> {
        let volume = self.get_property("volume")?.as_f64().unwrap_or(0.0);
        Ok(volume.round().clamp(0.0, 100.0) as u8)
    }

    fn clear(&mut self) -> EngineResult<()> {
        self.last_index = None;
        // Plain `stop` also empties the playlist
        self.command(json!(["stop"])).map(|_| ())
    }

    fn append(&mut self, location: &str) -> EngineResult<()> {
        self.command(json!(["loadfile", location, "append"])).map(|_| ())
    }

    fn insert(&mut self, index: usize, location: &str) -> EngineResult<()> {
        let len = self.playlist_count()?;
        if index > len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        self.append(location)?;
        if index < len {
            self.command(json!(["playlist-move", len, index]))?;
        }
        Ok(())
    }

    fn entries(&mut self) -> EngineResult<Vec<String>> {
        let playlist = self.get_property("playlist")?;
        Ok(playlist
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("filename").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn current_index(&mut self) -> EngineResult<Option<usize>> {
        let pos = self.try_property("playlist-pos")?.and_then(|v| v.as_i64());
        Ok(pos.filter(|p| *p >= 0).map(|p| p as usize))
    }

    fn play_index(&mut self, index: usize) -> EngineResult<()> {
        let len = self.playlist_count()?;
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        self.command(json!(["playlist-play-index", index]))?;
        self.last_index = Some(index);
        self.set_property("pause", json!(false))
    }

    fn snapshot(&mut self) -> EngineResult<PlaybackSnapshot> {
        let values = self.query(&["idle-active", "path", "time-pos", "eof-reached", "paused-for-cache", "pause"])?;
        let flag = |i: usize| values[i].as_ref().and_then(Value::as_bool).unwrap_or(false);

        let idle = flag(0);
        let media = if idle {
            String::new()
        } else {
            values[1]
                .as_ref()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        };
        let position_ms = values[2]
            .as_ref()
            .and_then(Value::as_f64)
            .map(|secs| (secs * 1000.0).round() as i64)
            .unwrap_or(-1);
        let state = map_state(idle, flag(3), flag(4), flag(5));
        Ok(PlaybackSnapshot::new(media, position_ms, state))
    }
}

impl std::fmt::Debug for MpvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpvEngine")
            .field("socket_path", &self.socket_path)
            .field("managed", &self.child.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state(true, true, true, true), PlaybackState::Stopped);
        assert_eq!(map_state(false, true, false, true), PlaybackState::Ended);
        assert_eq!(map_state(false, false, true, true), PlaybackState::Buffering);
        assert_eq!(map_state(false, false, false, true), PlaybackState::Paused);
        assert_eq!(map_state(false, false, false, false), PlaybackState::Playing);
    }

    /// Minimal IPC peer: answers property reads from a fixed table and
    /// interleaves an event line before every reply
    fn fake_mpv(dir: &TempDir) -> PathBuf {
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let request: Value = serde_json::from_str(&line).unwrap();
                let id = request["request_id"].clone();
                let command = &request["command"];
                let reply = match (command[0].as_str(), command[1].as_str()) {
                    (Some("get_property"), Some("idle-active")) => json!({"data": false, "error": "success"}),
                    (Some("get_property"), Some("path")) => json!({"data": "/media/a.mp4", "error": "success"}),
                    (Some("get_property"), Some("time-pos")) => json!({"data": 12.5, "error": "success"}),
                    (Some("get_property"), Some("pause")) => json!({"data": true, "error": "success"}),
                    (Some("get_property"), Some("playlist-pos")) => json!({"data": 1, "error": "success"}),
                    (Some("get_property"), Some("playlist")) => json!({
                        "data": [{"filename": "/media/a.mp4"}, {"filename": "/media/b.mp4", "current": true}],
                        "error": "success"
                    }),
                    (Some("get_property"), _) => json!({"error": "property unavailable"}),
                    _ => json!({"data": null, "error": "success"}),
                };
                let mut reply = reply;
                reply["request_id"] = id;
                writeln!(writer, "{}", json!({"event": "playback-restart"})).unwrap();
                writeln!(writer, "{}", reply).unwrap();
            }
        });
        socket
    }

    #[test]
    fn test_snapshot_over_ipc() {
        let dir = TempDir::new().unwrap();
        let socket = fake_mpv(&dir);
        let mut engine = MpvEngine::connect(&socket).unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.media, "/media/a.mp4");
        assert_eq!(snapshot.position_ms, 12_500);
        assert_eq!(snapshot.state, PlaybackState::Paused);

        assert_eq!(engine.current_index().unwrap(), Some(1));
        assert_eq!(
            engine.entries().unwrap(),
            vec!["/media/a.mp4".to_string(), "/media/b.mp4".to_string()]
        );
    }

    #[test]
    fn test_command_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let socket = fake_mpv(&dir);
        let mut engine = MpvEngine::connect(&socket).unwrap();
        match engine.get_property("no-such-property") {
            Err(EngineError::Command { command, reason }) => {
                assert_eq!(command, "get_property");
                assert_eq!(reason, "property unavailable");
            }
            other => panic!("expected command error, got {:?}", other),
        }
    }

    #[test]
    fn test_silent_player_costs_one_timeout_per_call() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // Swallow requests without answering
            for line in BufReader::new(stream).lines() {
                if line.is_err() {
                    break;
                }
            }
        });
        let mut engine = MpvEngine::connect(&socket).unwrap();

        let started = Instant::now();
        assert!(matches!(engine.snapshot(), Err(EngineError::Unavailable(_))));
        let elapsed = started.elapsed();
        assert!(elapsed >= IO_TIMEOUT);
        assert!(elapsed < IO_TIMEOUT * 2, "snapshot took {:?}", elapsed);
    }
}
