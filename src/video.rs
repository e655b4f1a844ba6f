use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde_json::json;
use tracing::{debug, info, warn};

#[cfg(any(unix, target_os = "windows"))]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::feed::{Container, PlaybackError, Stage, Trigger};
use crate::record::VideoRecord;

pub const URL_PLACEHOLDER: &str = "%URL%";

#[derive(Debug, Clone)]
pub struct StageConfig {
    pub command: Vec<String>,
    pub autoplay: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerCommand {
    SetPause(bool),
    SeekAbsolute(f64),
    SetMute(bool),
}

/// A running player process and its control channel.
pub struct PlayerSession {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    ipc_path: Option<String>,
}

impl PlayerSession {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("player session closed unexpectedly")))
            }
        }
    }

    pub fn controls_supported(&self) -> bool {
        self.ipc_path.is_some()
    }

    pub fn send_command(&self, command: PlayerCommand) -> Result<()> {
        let Some(path) = &self.ipc_path else {
            bail!("player controls are not supported for this command");
        };
        send_ipc_command(path, command)
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

/// Builds the argv for `template`, substituting the media URL. Players
/// recognised as mpv also get an IPC socket and the initial mute state.
pub fn build_command(
    template: &[String],
    url: &str,
    ipc_path: Option<&str>,
    muted: bool,
) -> Result<(String, Vec<String>)> {
    let Some((program, rest)) = template.split_first() else {
        bail!("player command is empty");
    };
    if program.trim().is_empty() {
        bail!("player command is empty");
    }
    if url.trim().is_empty() {
        bail!("video URL missing");
    }

    let mut args: Vec<String> = Vec::with_capacity(rest.len() + 4);
    let mut substituted = false;
    for arg in rest {
        if arg.contains(URL_PLACEHOLDER) {
            substituted = true;
            args.push(arg.replace(URL_PLACEHOLDER, url));
        } else {
            args.push(arg.clone());
        }
    }

    if is_mpv(program) {
        if let Some(path) = ipc_path {
            args.push(format!("--input-ipc-server={path}"));
        }
        args.push(format!("--mute={}", if muted { "yes" } else { "no" }));
        args.push("--keep-open=yes".to_string());
        args.push("--really-quiet".to_string());
    }
    if !substituted {
        args.push(url.to_string());
    }
    Ok((program.clone(), args))
}

fn is_mpv(program: &str) -> bool {
    let name = std::path::Path::new(program)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(program);
    name.eq_ignore_ascii_case("mpv")
}

pub fn spawn_player(template: &[String], url: &str, muted: bool) -> Result<PlayerSession> {
    let program = template.first().map(String::as_str).unwrap_or_default();
    let ipc_path = if is_mpv(program) {
        unique_ipc_path()
    } else {
        None
    };
    #[cfg(unix)]
    if let Some(path) = &ipc_path {
        cleanup_ipc_path(path);
    }

    let (program, args) = build_command(template, url, ipc_path.as_deref(), muted)?;
    debug!(%program, ?args, "spawning player");

    let mut command = Command::new(&program);
    command.args(&args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    let child = command
        .spawn()
        .with_context(|| format!("launch {program} to play {url}"))?;

    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);
    let ipc_cleanup = ipc_path.clone();
    let handle = thread::spawn(move || {
        let result = monitor(child, kill_rx);
        #[cfg(unix)]
        if let Some(path) = ipc_cleanup {
            cleanup_ipc_path(&path);
        }
        #[cfg(not(unix))]
        let _ = ipc_cleanup;
        let _ = status_tx.send(result);
    });

    Ok(PlayerSession {
        kill_tx,
        status_rx,
        handle: Some(handle),
        ipc_path,
    })
}

fn monitor(mut child: Child, kill_rx: Receiver<()>) -> Result<ExitStatus> {
    loop {
        if kill_rx.try_recv().is_ok() {
            let _ = child.kill();
            let status = child.wait().context("wait for player after stop request")?;
            debug!(code = ?status.code(), "player stopped");
            return Ok(status);
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(code = ?status.code(), "player exited");
                return Ok(status);
            }
            Ok(None) => thread::sleep(Duration::from_millis(30)),
            Err(err) => return Err(anyhow!(err)).context("poll player status"),
        }
    }
}

struct ActiveSession {
    container: Container,
    video_id: String,
    paused: bool,
    player: PlayerSession,
}

impl ActiveSession {
    fn is(&self, container: Container, video_id: &str) -> bool {
        self.container == container && self.video_id == video_id
    }
}

/// Stage backed by an external player. At most one player process exists;
/// starting another video replaces it.
pub struct MpvStage {
    command: Vec<String>,
    autoplay: bool,
    mounted: HashSet<(Container, String)>,
    session: Option<ActiveSession>,
}

impl MpvStage {
    pub fn new(config: StageConfig) -> Self {
        Self {
            command: config.command,
            autoplay: config.autoplay,
            mounted: HashSet::new(),
            session: None,
        }
    }

    pub fn is_mounted(&self, container: Container, video_id: &str) -> bool {
        self.mounted.contains(&(container, video_id.to_string()))
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    pub fn now_playing(&self) -> Option<(Container, &str)> {
        self.session
            .as_ref()
            .filter(|session| !session.paused)
            .map(|session| (session.container, session.video_id.as_str()))
    }

    /// Reaps a player the user closed. Returns the video it was showing.
    pub fn poll_exit(&mut self) -> Option<(Container, String)> {
        let session = self.session.as_mut()?;
        let status = session.player.try_status()?;
        match status {
            Ok(status) => {
                info!(code = ?status.code(), video_id = %session.video_id, "player closed")
            }
            Err(err) => warn!(%err, video_id = %session.video_id, "player failed"),
        }
        self.session
            .take()
            .map(|session| (session.container, session.video_id))
    }

    pub fn shutdown(&mut self) {
        self.session = None;
        self.mounted.clear();
    }

    fn resume(&mut self, container: Container, video_id: &str, muted: bool) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.is(container, video_id)) else {
            return false;
        };
        let resumed = session
            .player
            .send_command(PlayerCommand::SetMute(muted))
            .and_then(|_| session.player.send_command(PlayerCommand::SetPause(false)));
        match resumed {
            Ok(()) => {
                session.paused = false;
                true
            }
            Err(err) => {
                debug!(%err, "resume failed, relaunching player");
                self.session = None;
                false
            }
        }
    }
}

impl Stage for MpvStage {
    fn mount(&mut self, container: Container, video: &VideoRecord, autoplay: bool) {
        debug!(container = %container, video_id = video.id(), autoplay, "mount");
        self.mounted.insert((container, video.id().to_string()));
    }

    fn unmount(&mut self, container: Container, video_id: &str) {
        debug!(container = %container, video_id, "unmount");
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.is(container, video_id))
        {
            self.session = None;
        }
        self.mounted.remove(&(container, video_id.to_string()));
    }

    fn play(
        &mut self,
        container: Container,
        video: &VideoRecord,
        muted: bool,
        trigger: Trigger,
    ) -> Result<(), PlaybackError> {
        if trigger == Trigger::Autoplay && !self.autoplay {
            return Err(PlaybackError::AutoplayDisabled);
        }
        if self.resume(container, video.id(), muted) {
            return Ok(());
        }
        // replacing the session kills the previous player
        self.session = None;
        let player = spawn_player(&self.command, video.media_url(), muted)
            .map_err(|err| PlaybackError::Player(format!("{err:#}")))?;
        info!(container = %container, video_id = video.id(), "playing");
        self.session = Some(ActiveSession {
            container,
            video_id: video.id().to_string(),
            paused: false,
            player,
        });
        Ok(())
    }

    fn stop(&mut self, container: Container, video_id: &str) {
        let Some(session) = self.session.as_mut().filter(|s| s.is(container, video_id)) else {
            return;
        };
        if !session.player.controls_supported() {
            self.session = None;
            return;
        }
        let paused = session
            .player
            .send_command(PlayerCommand::SetPause(true))
            .and_then(|_| session.player.send_command(PlayerCommand::SeekAbsolute(0.0)));
        match paused {
            Ok(()) => session.paused = true,
            Err(err) => {
                debug!(%err, "pause failed, closing player");
                self.session = None;
            }
        }
    }

    fn set_muted(&mut self, container: Container, video_id: &str, muted: bool) {
        let Some(session) = self.session.as_ref().filter(|s| s.is(container, video_id)) else {
            return;
        };
        if let Err(err) = session.player.send_command(PlayerCommand::SetMute(muted)) {
            warn!(%err, "failed to change mute state");
        }
    }
}

fn send_ipc_command(path: &str, command: PlayerCommand) -> Result<()> {
    let payload = json!({
        "command": command_payload(command),
    });
    let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
    send_ipc_command_inner(path, &serialized)
}

#[cfg(unix)]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    let mut stream =
        UnixStream::connect(path).with_context(|| format!("connect to mpv IPC socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::ErrorKind;

    const PIPE_RETRIES: usize = 5;
    const PIPE_RETRY_DELAY: Duration = Duration::from_millis(100);

    for attempt in 0..PIPE_RETRIES {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut pipe) => {
                pipe.write_all(serialized.as_bytes())
                    .with_context(|| format!("write mpv IPC command to {path}"))?;
                pipe.write_all(b"\n")
                    .with_context(|| format!("write mpv IPC command terminator to {path}"))?;
                pipe.flush().ok();
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < PIPE_RETRIES => {
                thread::sleep(PIPE_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC named pipe {path}"));
            }
        }
    }

    Err(anyhow!("connect to mpv IPC named pipe {}", path))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc_command_inner(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!("player controls are not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("funny-tui-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    Some(format!(
        r"\\.\pipe\funny-tui-mpv-{}-{suffix}",
        std::process::id()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(%err, path, "failed to remove mpv ipc path");
        }
    }
}

fn command_payload(command: PlayerCommand) -> serde_json::Value {
    match command {
        PlayerCommand::SetPause(paused) => json!(["set_property", "pause", paused]),
        PlayerCommand::SeekAbsolute(position) => json!(["seek", position, "absolute"]),
        PlayerCommand::SetMute(muted) => json!(["set_property", "mute", muted]),
    }
}
