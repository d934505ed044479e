//! Playback adapters: the part that actually makes noise.
//!
//! The session controller drives an adapter through `load → on_end → play`
//! and tears it down with `stop`/`release`. Every method is called from the
//! session task; adapters report the end of playback through the
//! [`PlaybackNotifier`] handed to `on_end`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::artifact::StoredArtifact;
use crate::error::{Result, TtsError};
use crate::session::Command as SessionCommand;

/// Opaque id of one loaded artifact inside an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(pub u64);

impl fmt::Display for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Failed(String),
}

/// One-shot completion/error callback for a single handle.
#[derive(Debug)]
pub struct PlaybackNotifier {
    handle: PlaybackHandle,
    session: mpsc::WeakUnboundedSender<SessionCommand>,
}

impl PlaybackNotifier {
    pub(crate) fn new(
        handle: PlaybackHandle,
        session: mpsc::WeakUnboundedSender<SessionCommand>,
    ) -> Self {
        Self { handle, session }
    }

    pub fn handle(&self) -> PlaybackHandle {
        self.handle
    }

    /// Playback ran to the end and the adapter no longer holds the file.
    pub fn completed(self) {
        self.send(PlaybackOutcome::Completed);
    }

    pub fn failed(self, reason: impl Into<String>) {
        self.send(PlaybackOutcome::Failed(reason.into()));
    }

    fn send(self, outcome: PlaybackOutcome) {
        match self.session.upgrade() {
            Some(tx) => {
                let _ = tx.send(SessionCommand::PlaybackEnded {
                    handle: self.handle,
                    outcome,
                });
            }
            None => debug!("Session gone; dropping playback outcome for {}", self.handle),
        }
    }
}

pub trait PlaybackAdapter: Send + 'static {
    fn load(&mut self, artifact: &StoredArtifact) -> Result<PlaybackHandle>;

    /// Registers the completion/error callback for `handle`.
    fn on_end(&mut self, handle: PlaybackHandle, notifier: PlaybackNotifier);

    fn play(&mut self, handle: PlaybackHandle) -> Result<()>;

    fn stop(&mut self, handle: PlaybackHandle);

    fn release(&mut self, handle: PlaybackHandle);
}

struct Slot {
    path: PathBuf,
    notifier: Option<PlaybackNotifier>,
    stop: Option<oneshot::Sender<()>>,
}

/// Plays artifacts by running an external command line player.
pub struct CommandPlayer {
    program: PathBuf,
    next_id: u64,
    slots: HashMap<PlaybackHandle, Slot>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            next_id: 0,
            slots: HashMap::new(),
        }
    }

    /// Uses `preferred` if it is on PATH, else the first of aplay, paplay, ffplay.
    pub fn detect(preferred: Option<&str>) -> Option<Self> {
        let program = preferred
            .and_then(get_from_path)
            .or_else(|| get_from_path("aplay"))
            .or_else(|| get_from_path("paplay"))
            .or_else(|| get_from_path("ffplay"))?;
        info!("Using audio player {}", program.display());
        Some(Self::new(program))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn slot(&mut self, handle: PlaybackHandle) -> Result<&mut Slot> {
        self.slots
            .get_mut(&handle)
            .ok_or_else(|| TtsError::Playback(format!("unknown playback handle {handle}")))
    }
}

fn player_args(program: &Path, wav: &Path) -> Vec<std::ffi::OsString> {
    let name = program
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut args: Vec<std::ffi::OsString> = Vec::new();
    if name == "ffplay" {
        args.extend(["-autoexit", "-nodisp", "-loglevel", "quiet"].map(std::ffi::OsString::from));
    }
    args.push(wav.as_os_str().to_owned());
    args
}

fn get_from_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.exists().then_some(p);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

impl PlaybackAdapter for CommandPlayer {
    fn load(&mut self, artifact: &StoredArtifact) -> Result<PlaybackHandle> {
        if !artifact.path().is_file() {
            return Err(TtsError::Playback(format!(
                "artifact {} does not exist",
                artifact.path().display()
            )));
        }
        self.next_id += 1;
        let handle = PlaybackHandle(self.next_id);
        self.slots.insert(
            handle,
            Slot {
                path: artifact.path().to_path_buf(),
                notifier: None,
                stop: None,
            },
        );
        Ok(handle)
    }

    fn on_end(&mut self, handle: PlaybackHandle, notifier: PlaybackNotifier) {
        match self.slots.get_mut(&handle) {
            Some(slot) => slot.notifier = Some(notifier),
            None => warn!("on_end for unknown playback handle {}", handle),
        }
    }

    fn play(&mut self, handle: PlaybackHandle) -> Result<()> {
        let program = self.program.clone();
        let slot = self.slot(handle)?;
        let mut child = Command::new(&program)
            .args(player_args(&program, &slot.path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TtsError::Playback(format!("failed to spawn {}: {e}", program.display())))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        slot.stop = Some(stop_tx);
        let notifier = slot.notifier.take();
        debug!("Playing {} with {}", slot.path.display(), program.display());

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match (status, notifier) {
                    (Ok(status), Some(n)) if status.success() => n.completed(),
                    (Ok(status), Some(n)) => n.failed(format!("player exited with {status}")),
                    (Err(e), Some(n)) => n.failed(e.to_string()),
                    (_, None) => {}
                },
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill audio player: {}", e);
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        if let Some(stop) = self.slots.get_mut(&handle).and_then(|s| s.stop.take()) {
            let _ = stop.send(());
        }
    }

    fn release(&mut self, handle: PlaybackHandle) {
        self.slots.remove(&handle);
    }
}

/// Attachment metadata a chat client needs to show the artifact as a voice message.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceAttachment {
    pub path: PathBuf,
    pub mime_type: &'static str,
    /// Whole seconds, rounded up, never zero.
    pub duration: u32,
    pub title: String,
    pub waveform: Option<Vec<u8>>,
    pub size: usize,
}

impl VoiceAttachment {
    pub fn from_artifact(artifact: &StoredArtifact, title: &str) -> Self {
        Self {
            path: artifact.path().to_path_buf(),
            mime_type: artifact.format().mime_type(),
            duration: (artifact.duration_seconds().ceil() as u32).max(1),
            title: title.to_string(),
            waveform: artifact.waveform().map(<[u8]>::to_vec),
            size: artifact.byte_len(),
        }
    }
}

/// Presents each artifact as a voice message before handing it to `inner`.
pub struct VoiceNotePlayer<P> {
    inner: P,
    title: String,
    attachments: HashMap<PlaybackHandle, VoiceAttachment>,
}

impl<P: PlaybackAdapter> VoiceNotePlayer<P> {
    pub fn new(inner: P, title: impl Into<String>) -> Self {
        Self {
            inner,
            title: title.into(),
            attachments: HashMap::new(),
        }
    }

    pub fn attachment(&self, handle: PlaybackHandle) -> Option<&VoiceAttachment> {
        self.attachments.get(&handle)
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: PlaybackAdapter> PlaybackAdapter for VoiceNotePlayer<P> {
    fn load(&mut self, artifact: &StoredArtifact) -> Result<PlaybackHandle> {
        let handle = self.inner.load(artifact)?;
        let attachment = VoiceAttachment::from_artifact(artifact, &self.title);
        info!(
            "Voice message {}: {}s, {} bytes, waveform {}",
            handle,
            attachment.duration,
            attachment.size,
            if attachment.waveform.is_some() { "yes" } else { "no" }
        );
        self.attachments.insert(handle, attachment);
        Ok(handle)
    }

    fn on_end(&mut self, handle: PlaybackHandle, notifier: PlaybackNotifier) {
        self.inner.on_end(handle, notifier);
    }

    fn play(&mut self, handle: PlaybackHandle) -> Result<()> {
        self.inner.play(handle)
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        self.inner.stop(handle);
    }

    fn release(&mut self, handle: PlaybackHandle) {
        self.attachments.remove(&handle);
        self.inner.release(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ArtifactFormat, AudioArtifact};
    use crate::tts::SpeechResponse;

    fn stored(dir: &Path, format: ArtifactFormat) -> StoredArtifact {
        let artifact = AudioArtifact::encode(&SpeechResponse::new(vec![0u8; 72_000]), format).unwrap();
        StoredArtifact::write(dir, artifact).unwrap()
    }

    #[test]
    fn ffplay_gets_headless_flags() {
        let args = player_args(Path::new("/usr/bin/ffplay"), Path::new("/tmp/a.wav"));
        assert_eq!(args.first().unwrap(), "-autoexit");
        assert_eq!(args.last().unwrap(), "/tmp/a.wav");
        let args = player_args(Path::new("aplay"), Path::new("/tmp/a.wav"));
        assert_eq!(args, vec![std::ffi::OsString::from("/tmp/a.wav")]);
    }

    #[test]
    fn load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stored(dir.path(), ArtifactFormat::Wav);
        std::fs::remove_file(artifact.path()).unwrap();
        let mut player = CommandPlayer::new("aplay");
        assert!(matches!(player.load(&artifact), Err(TtsError::Playback(_))));
    }

    #[test]
    fn play_on_unknown_handle_fails() {
        let mut player = CommandPlayer::new("aplay");
        assert!(player.play(PlaybackHandle(42)).is_err());
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_playback_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stored(dir.path(), ArtifactFormat::Wav);
        let mut player = CommandPlayer::new(dir.path().join("no-such-player"));
        let handle = player.load(&artifact).unwrap();
        assert!(matches!(player.play(handle), Err(TtsError::Playback(_))));
        player.release(handle);
        artifact.remove();
    }

    #[test]
    fn voice_note_builds_attachment_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stored(dir.path(), ArtifactFormat::VoiceContainer);
        let mut player = VoiceNotePlayer::new(CommandPlayer::new("aplay"), "Read aloud");

        let handle = player.load(&artifact).unwrap();
        let attachment = player.attachment(handle).unwrap();
        // 72_000 bytes of 24 kHz mono 16-bit is 1.5s
        assert_eq!(attachment.duration, 2);
        assert_eq!(attachment.mime_type, "audio/wav");
        assert_eq!(attachment.size, 72_044);
        assert_eq!(attachment.title, "Read aloud");
        assert_eq!(attachment.waveform.as_ref().map(Vec::len), Some(63));

        player.release(handle);
        assert!(player.attachment(handle).is_none());
        artifact.remove();
    }
}
