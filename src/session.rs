//! The read-aloud session: at most one request in flight and at most one
//! artifact playing.
//!
//! All session state lives in a single task (the session task) that drains a
//! command queue in order. Network work runs on a second task, the speech
//! worker, which handles one job at a time and only ever reports results back
//! through the queue. Every request is tagged with a generation number; a
//! result whose generation is no longer current is dropped on arrival.
//!
//! ```text
//! Idle ──speak──▶ Requesting ──ok──▶ Playing ──ended──▶ Idle
//!                     │                 │
//!                     └──failed──▶ Idle └──cancel/error──▶ Finalizing ──deleted──▶ Idle
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifact::StoredArtifact;
use crate::audio::AudioArtifact;
use crate::config::{ApiKeySource, Config};
use crate::error::{Result, TtsError};
use crate::player::{PlaybackAdapter, PlaybackHandle, PlaybackNotifier, PlaybackOutcome};
use crate::tts::{SpeechRequest, SpeechResponse, SpeechSynthesizer};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Requesting,
    Playing,
    /// Playback was stopped; the artifact is waiting out its deletion grace period.
    Finalizing,
}

/// What the session did, for observers. Never drives control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Requesting { generation: u64 },
    Playing { generation: u64, path: PathBuf },
    Finished { generation: u64 },
    Cancelled { generation: u64 },
    /// A result arrived for a superseded request and was thrown away.
    Discarded { generation: u64 },
    Failed { generation: u64, error: TtsError },
}

pub(crate) enum Command {
    Speak(String),
    Cancel,
    SynthesisDone {
        generation: u64,
        result: Result<SpeechResponse>,
    },
    PlaybackEnded {
        handle: PlaybackHandle,
        outcome: PlaybackOutcome,
    },
    Finalized {
        generation: u64,
    },
    State(oneshot::Sender<SessionState>),
    Teardown(oneshot::Sender<()>),
}

struct Job {
    generation: u64,
    request: SpeechRequest,
}

struct Active {
    handle: PlaybackHandle,
    artifact: StoredArtifact,
}

/// Cheap, cloneable handle to a running session.
///
/// The session task exits once every handle has been dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Starts the session task and its speech worker on the current runtime.
    pub fn spawn<P: PlaybackAdapter>(
        config: Config,
        keys: Arc<dyn ApiKeySource>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: P,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (jobs, job_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = tokio::spawn(run_worker(synthesizer, job_rx, commands.downgrade()));
        let session = Session {
            state: SessionState::Idle,
            generation: 0,
            active: None,
            config,
            keys,
            player,
            jobs: Some(jobs),
            worker: Some(worker),
            commands: commands.downgrade(),
            events: events.clone(),
            cleanups: Vec::new(),
        };
        let task = tokio::spawn(session.run(command_rx));
        (Self { commands, events }, task)
    }

    /// Speaks `text`, replacing whatever is currently requested or playing.
    ///
    /// Returns immediately; failures are logged and published as
    /// [`SessionEvent::Failed`].
    pub fn speak(&self, text: impl Into<String>) {
        self.send(Command::Speak(text.into()));
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    pub async fn state(&self) -> SessionState {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::State(tx)).is_err() {
            return SessionState::Idle;
        }
        rx.await.unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Cancels, stops the speech worker, and waits for pending artifact
    /// deletions. Later `speak` calls are ignored. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Teardown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("TTS session is no longer running");
        }
    }
}

struct Session<P> {
    state: SessionState,
    generation: u64,
    active: Option<Active>,
    config: Config,
    keys: Arc<dyn ApiKeySource>,
    player: P,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    cleanups: Vec<JoinHandle<()>>,
}

impl<P: PlaybackAdapter> Session<P> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Speak(text) => self.speak(&text),
                Command::Cancel => self.cancel(),
                Command::SynthesisDone { generation, result } => {
                    self.on_synthesized(generation, result)
                }
                Command::PlaybackEnded { handle, outcome } => {
                    self.on_playback_ended(handle, outcome)
                }
                Command::Finalized { generation } => self.on_finalized(generation),
                Command::State(reply) => {
                    let _ = reply.send(self.state);
                }
                Command::Teardown(reply) => {
                    self.teardown().await;
                    let _ = reply.send(());
                }
            }
        }
        self.teardown().await;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn speak(&mut self, text: &str) {
        let Some(jobs) = self.jobs.clone() else {
            warn!("Ignoring speak request after teardown");
            return;
        };
        let request = match SpeechRequest::new(text, self.config.voice) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring speak request: {}", e);
                return;
            }
        };
        if self.keys.api_key().is_none() {
            error!("Ignoring speak request: no API key configured");
            return;
        }

        self.stop_active();
        self.generation += 1;
        let generation = self.generation;

        if jobs.send(Job { generation, request }).is_err() {
            error!("Speech worker is gone; dropping generation {}", generation);
            self.state = SessionState::Idle;
            return;
        }
        debug!("Queued speech request, generation {}", generation);
        self.state = SessionState::Requesting;
        self.emit(SessionEvent::Requesting { generation });
    }

    fn cancel(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Finalizing => {}
            SessionState::Requesting => {
                // The HTTP call keeps running; its result will be stale on arrival.
                let cancelled = self.generation;
                self.generation += 1;
                self.state = SessionState::Idle;
                info!("Cancelled pending speech request {}", cancelled);
                self.emit(SessionEvent::Cancelled {
                    generation: cancelled,
                });
            }
            SessionState::Playing => {
                let generation = self.generation;
                self.stop_active();
                self.state = SessionState::Finalizing;
                info!("Stopped playback of generation {}", generation);
                self.emit(SessionEvent::Cancelled { generation });
            }
        }
    }

    /// Stops and releases the active handle and schedules the artifact for
    /// deletion after the grace period.
    fn stop_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.player.stop(active.handle);
        self.player.release(active.handle);

        let grace = self.config.cleanup_grace;
        let generation = self.generation;
        let commands = self.commands.clone();
        self.cleanups.retain(|task| !task.is_finished());
        self.cleanups.push(tokio::spawn(async move {
            active.artifact.remove_after(grace).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Finalized { generation });
            }
        }));
    }

    fn on_synthesized(&mut self, generation: u64, result: Result<SpeechResponse>) {
        if generation != self.generation {
            debug!(
                "Discarding result of superseded generation {} (current {})",
                generation, self.generation
            );
            self.emit(SessionEvent::Discarded { generation });
            return;
        }
        if let Err(e) = result.and_then(|response| self.start_playback(generation, response)) {
            error!("Read-aloud generation {} failed: {}", generation, e);
            self.state = SessionState::Idle;
            self.emit(SessionEvent::Failed {
                generation,
                error: e,
            });
        }
    }

    fn start_playback(&mut self, generation: u64, response: SpeechResponse) -> Result<()> {
        let artifact = AudioArtifact::encode(&response, self.config.format)?;
        let stored = StoredArtifact::write(&self.config.temp_dir, artifact)?;

        let handle = match self.player.load(&stored) {
            Ok(handle) => handle,
            Err(e) => {
                stored.remove();
                return Err(e);
            }
        };
        self.player
            .on_end(handle, PlaybackNotifier::new(handle, self.commands.clone()));
        if let Err(e) = self.player.play(handle) {
            self.player.release(handle);
            stored.remove();
            return Err(e);
        }

        let path = stored.path().to_path_buf();
        info!(
            "Playing generation {} ({:.2}s) from {}",
            generation,
            stored.duration_seconds(),
            path.display()
        );
        self.active = Some(Active {
            handle,
            artifact: stored,
        });
        self.state = SessionState::Playing;
        self.emit(SessionEvent::Playing { generation, path });
        Ok(())
    }

    fn on_playback_ended(&mut self, handle: PlaybackHandle, outcome: PlaybackOutcome) {
        if self.active.as_ref().map(|a| a.handle) != Some(handle) {
            debug!("Ignoring stale playback notification for {}", handle);
            return;
        }
        let generation = self.generation;
        match outcome {
            PlaybackOutcome::Completed => {
                let Some(active) = self.active.take() else {
                    return;
                };
                self.player.release(active.handle);
                // The adapter has let go of the file by the time it reports completion.
                active.artifact.remove();
                self.state = SessionState::Idle;
                info!("Finished playback of generation {}", generation);
                self.emit(SessionEvent::Finished { generation });
            }
            PlaybackOutcome::Failed(reason) => {
                error!("Playback of generation {} failed: {}", generation, reason);
                self.stop_active();
                self.state = SessionState::Finalizing;
                self.emit(SessionEvent::Failed {
                    generation,
                    error: TtsError::Playback(reason),
                });
            }
        }
    }

    fn on_finalized(&mut self, generation: u64) {
        if self.state == SessionState::Finalizing && generation == self.generation {
            debug!("Artifact of generation {} deleted", generation);
            self.state = SessionState::Idle;
        }
    }

    async fn teardown(&mut self) {
        self.cancel();
        let first = self.jobs.take().is_some();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        for cleanup in self.cleanups.drain(..) {
            let _ = cleanup.await;
        }
        self.state = SessionState::Idle;
        if first {
            info!("TTS session torn down");
        }
    }
}

async fn run_worker(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    session: mpsc::WeakUnboundedSender<Command>,
) {
    while let Some(Job {
        generation,
        request,
    }) = jobs.recv().await
    {
        debug!("Speech worker picked up generation {}", generation);
        let result = synthesizer.synthesize(&request).await;
        let Some(tx) = session.upgrade() else {
            break;
        };
        if tx.send(Command::SynthesisDone { generation, result }).is_err() {
            break;
        }
    }
    debug!("Speech worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticApiKey;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    const GRACE: Duration = Duration::from_millis(200);

    /// Replies with 2000 bytes filled with the first byte of the text, or HTTP
    /// 500 for "fail". The first call can be held back by a gate.
    #[derive(Default)]
    struct FakeSynth {
        calls: Mutex<Vec<String>>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl FakeSynth {
        fn gated() -> (Self, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            let synth = Self {
                gate: Mutex::new(Some(rx)),
                ..Default::default()
            };
            (synth, tx)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechResponse> {
            self.calls.lock().unwrap().push(request.text().to_string());
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if request.text() == "fail" {
                return Err(TtsError::HttpStatus {
                    status: 500,
                    body: "internal".into(),
                });
            }
            Ok(SpeechResponse::new(vec![request.text().as_bytes()[0]; 2000]))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(PathBuf, u64),
        Play(PlaybackHandle),
        Stop(PlaybackHandle),
        Release(PlaybackHandle),
    }

    #[derive(Default)]
    struct PlayerLog {
        calls: Vec<Call>,
        notifiers: Vec<PlaybackNotifier>,
    }

    struct FakePlayer {
        log: Arc<Mutex<PlayerLog>>,
        next: u64,
        fail_play: bool,
    }

    impl PlaybackAdapter for FakePlayer {
        fn load(&mut self, artifact: &StoredArtifact) -> Result<PlaybackHandle> {
            let len = std::fs::metadata(artifact.path()).unwrap().len();
            self.next += 1;
            self.log
                .lock()
                .unwrap()
                .calls
                .push(Call::Load(artifact.path().to_path_buf(), len));
            Ok(PlaybackHandle(self.next))
        }

        fn on_end(&mut self, _handle: PlaybackHandle, notifier: PlaybackNotifier) {
            self.log.lock().unwrap().notifiers.push(notifier);
        }

        fn play(&mut self, handle: PlaybackHandle) -> Result<()> {
            self.log.lock().unwrap().calls.push(Call::Play(handle));
            if self.fail_play {
                return Err(TtsError::Playback("no output device".into()));
            }
            Ok(())
        }

        fn stop(&mut self, handle: PlaybackHandle) {
            self.log.lock().unwrap().calls.push(Call::Stop(handle));
        }

        fn release(&mut self, handle: PlaybackHandle) {
            self.log.lock().unwrap().calls.push(Call::Release(handle));
        }
    }

    struct Harness {
        ctrl: SessionController,
        events: broadcast::Receiver<SessionEvent>,
        synth: Arc<FakeSynth>,
        log: Arc<Mutex<PlayerLog>>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(synth: FakeSynth, key: Option<&str>) -> Self {
            Self::with_player(synth, key, false)
        }

        fn with_player(synth: FakeSynth, key: Option<&str>, fail_play: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                temp_dir: dir.path().to_path_buf(),
                cleanup_grace: GRACE,
                ..Config::default()
            };
            let synth = Arc::new(synth);
            let log = Arc::new(Mutex::new(PlayerLog::default()));
            let player = FakePlayer {
                log: log.clone(),
                next: 0,
                fail_play,
            };
            let (ctrl, _task) = SessionController::spawn(
                config,
                Arc::new(StaticApiKey(key.map(str::to_string))),
                synth.clone(),
                player,
            );
            let events = ctrl.subscribe();
            Self {
                ctrl,
                events,
                synth,
                log,
                dir,
            }
        }

        async fn wait_event(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let event = self.events.recv().await.unwrap();
                    if pred(&event) {
                        return event;
                    }
                }
            })
            .await
            .expect("timed out waiting for session event")
        }

        async fn wait_playing(&mut self) -> PathBuf {
            match self
                .wait_event(|e| matches!(e, SessionEvent::Playing { .. }))
                .await
            {
                SessionEvent::Playing { path, .. } => path,
                _ => unreachable!(),
            }
        }

        async fn wait_state(&self, want: SessionState) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.ctrl.state().await != want {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("timed out waiting for session state");
        }

        fn calls(&self) -> Vec<Call> {
            self.log.lock().unwrap().calls.clone()
        }

        fn take_notifier(&self) -> PlaybackNotifier {
            self.log.lock().unwrap().notifiers.remove(0)
        }

        fn files_in_dir(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    fn payload_byte(path: &Path) -> u8 {
        std::fs::read(path).unwrap()[44]
    }

    #[tokio::test]
    async fn cancel_while_idle_is_a_noop() {
        let h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.cancel();
        h.ctrl.cancel();
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.calls().is_empty());
        assert_eq!(h.files_in_dir(), 0);
    }

    #[tokio::test]
    async fn blank_text_or_missing_key_never_reaches_network() {
        let h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("");
        h.ctrl.speak("  \n\t");
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.synth.calls().is_empty());

        let h = Harness::new(FakeSynth::default(), None);
        h.ctrl.speak("Hello");
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.synth.calls().is_empty());

        let h = Harness::new(FakeSynth::default(), Some("   "));
        h.ctrl.speak("Hello");
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.synth.calls().is_empty());
    }

    #[tokio::test]
    async fn hello_plays_one_artifact_and_deletes_it_on_completion() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("Hello");

        let path = h.wait_playing().await;
        assert_eq!(h.ctrl.state().await, SessionState::Playing);
        assert_eq!(
            h.calls(),
            vec![Call::Load(path.clone(), 2044), Call::Play(PlaybackHandle(1))]
        );
        assert_eq!(h.files_in_dir(), 1);

        h.take_notifier().completed();
        h.wait_event(|e| matches!(e, SessionEvent::Finished { .. }))
            .await;
        assert!(!path.exists());
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert_eq!(h.calls().last(), Some(&Call::Release(PlaybackHandle(1))));
        assert!(!h.calls().contains(&Call::Stop(PlaybackHandle(1))));
        assert_eq!(h.synth.calls(), vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn http_failure_returns_to_idle_without_artifact() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("fail");

        let event = h
            .wait_event(|e| matches!(e, SessionEvent::Failed { .. }))
            .await;
        match event {
            SessionEvent::Failed { generation, error } => {
                assert_eq!(generation, 1);
                assert_eq!(error.status(), Some(500));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.calls().is_empty());
        assert_eq!(h.files_in_dir(), 0);
    }

    #[tokio::test]
    async fn newer_speak_discards_inflight_result() {
        let (synth, gate) = FakeSynth::gated();
        let mut h = Harness::new(synth, Some("key"));

        h.ctrl.speak("A");
        h.ctrl.speak("B");
        assert_eq!(h.ctrl.state().await, SessionState::Requesting);
        gate.send(()).unwrap();

        let discarded = h
            .wait_event(|e| matches!(e, SessionEvent::Discarded { .. }))
            .await;
        assert_eq!(discarded, SessionEvent::Discarded { generation: 1 });

        let path = h.wait_playing().await;
        assert_eq!(payload_byte(&path), b'B');
        let loads = h
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Load(..)))
            .count();
        assert_eq!(loads, 1);
        assert_eq!(h.files_in_dir(), 1);
        assert_eq!(h.synth.calls(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn cancel_while_requesting_drops_the_result() {
        let (synth, gate) = FakeSynth::gated();
        let mut h = Harness::new(synth, Some("key"));

        h.ctrl.speak("Hello");
        h.ctrl.cancel();
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        gate.send(()).unwrap();

        h.wait_event(|e| matches!(e, SessionEvent::Discarded { .. }))
            .await;
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert!(h.calls().is_empty());
        assert_eq!(h.files_in_dir(), 0);
    }

    #[tokio::test]
    async fn cancel_while_playing_stops_then_deletes_after_grace() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("Hello");
        let path = h.wait_playing().await;

        h.ctrl.cancel();
        assert_eq!(h.ctrl.state().await, SessionState::Finalizing);
        assert!(path.exists());
        let handle = PlaybackHandle(1);
        assert!(h.calls().ends_with(&[Call::Stop(handle), Call::Release(handle)]));

        h.wait_state(SessionState::Idle).await;
        assert!(!path.exists());

        // A late completion from the stopped handle changes nothing.
        let before = h.calls();
        h.take_notifier().completed();
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert_eq!(h.calls(), before);
    }

    #[tokio::test]
    async fn playback_error_takes_the_cancel_path() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("Hello");
        let path = h.wait_playing().await;

        h.take_notifier().failed("device lost");
        let event = h
            .wait_event(|e| matches!(e, SessionEvent::Failed { .. }))
            .await;
        assert_eq!(
            event,
            SessionEvent::Failed {
                generation: 1,
                error: TtsError::Playback("device lost".into()),
            }
        );
        assert!(h.calls().contains(&Call::Stop(PlaybackHandle(1))));
        h.wait_state(SessionState::Idle).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn play_failure_removes_artifact_immediately() {
        let mut h = Harness::with_player(FakeSynth::default(), Some("key"), true);
        h.ctrl.speak("Hello");

        let event = h
            .wait_event(|e| matches!(e, SessionEvent::Failed { .. }))
            .await;
        assert!(matches!(
            event,
            SessionEvent::Failed {
                error: TtsError::Playback(_),
                ..
            }
        ));
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert_eq!(h.files_in_dir(), 0);
        assert_eq!(h.calls().last(), Some(&Call::Release(PlaybackHandle(1))));
    }

    #[tokio::test]
    async fn speak_while_playing_replaces_previous_session() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("A");
        let first = h.wait_playing().await;

        h.ctrl.speak("B");
        let second = h.wait_playing().await;
        assert_ne!(first, second);
        assert_eq!(payload_byte(&second), b'B');

        let calls = h.calls();
        let stop = calls.iter().position(|c| *c == Call::Stop(PlaybackHandle(1)));
        let second_load = calls.iter().position(|c| matches!(c, Call::Load(p, _) if *p == second));
        assert!(stop.unwrap() < second_load.unwrap());

        tokio::time::timeout(Duration::from_secs(5), async {
            while first.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first artifact was never deleted");
        assert!(second.exists());
        assert_eq!(h.ctrl.state().await, SessionState::Playing);
    }

    #[tokio::test]
    async fn teardown_cleans_up_and_is_idempotent() {
        let mut h = Harness::new(FakeSynth::default(), Some("key"));
        h.ctrl.speak("Hello");
        let path = h.wait_playing().await;

        h.ctrl.teardown().await;
        assert!(!path.exists());
        assert_eq!(h.ctrl.state().await, SessionState::Idle);

        h.ctrl.teardown().await;
        h.ctrl.speak("Again");
        assert_eq!(h.ctrl.state().await, SessionState::Idle);
        assert_eq!(h.synth.calls(), vec!["Hello".to_string()]);
    }
}
