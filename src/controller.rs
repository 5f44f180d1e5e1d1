use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{self, ActiveOutput, AudioOutput, OnFinished, PlaybackEnd};
use crate::engine::{AudioBuffer, SpeechBackend};
use crate::error::{Result, SpeechError};
use crate::state::{PlaybackSettings, PlaybackSnapshot, PlaybackStatus, SessionId};

/// Messages delivered back into the controller's queue.
#[derive(Debug)]
enum ControllerMessage {
    Fetched {
        session: SessionId,
        result: Result<AudioBuffer>,
    },
    Ended {
        session: SessionId,
    },
    OutputFailed {
        session: SessionId,
        error: SpeechError,
    },
}

const NO_RUNTIME: &str = "Audio playback is unavailable right now.";

/// Outcome of applying one queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Started(SessionId),
    Finished(SessionId),
    Failed { session: SessionId, message: String },
    /// Message for a superseded or stopped session.
    Ignored,
}

/// Resources of one utterance: the fetch task until the clip is ready, then
/// the output handle.
struct PlaybackSession {
    id: SessionId,
    fetch: Option<JoinHandle<()>>,
    output: Option<Box<dyn ActiveOutput>>,
}

impl PlaybackSession {
    fn release(mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
    }
}

/// Plays one utterance at a time: fetch, decode, play, clean up.
///
/// Driven from a single task through `&mut self`. Network results and
/// end-of-clip notifications arrive as messages and take effect when the
/// owner pumps them with [`next_event`](Self::next_event),
/// [`drain_events`](Self::drain_events) or
/// [`run_until_idle`](Self::run_until_idle). `speak` outside a tokio
/// runtime fails with a platform error.
pub struct PlaybackController {
    backend: Arc<dyn SpeechBackend>,
    output: Box<dyn AudioOutput>,
    settings: PlaybackSettings,
    session: Option<PlaybackSession>,
    next_id: u64,
    status: PlaybackStatus,
    error: Option<String>,
    /// A platform error was already surfaced and the device is still down.
    platform_fault: bool,
    closed: bool,
    tx: mpsc::UnboundedSender<ControllerMessage>,
    rx: mpsc::UnboundedReceiver<ControllerMessage>,
    state_tx: watch::Sender<PlaybackSnapshot>,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        output: Box<dyn AudioOutput>,
        settings: PlaybackSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlaybackSnapshot::default());
        Self {
            backend,
            output,
            settings,
            session: None,
            next_id: 1,
            status: PlaybackStatus::Idle,
            error: None,
            platform_fault: false,
            closed: false,
            tx,
            rx,
            state_tx,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_speaking(&self) -> bool {
        self.status == PlaybackStatus::Speaking
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status,
            is_speaking: self.is_speaking(),
            error: self.error.clone(),
            session: self.current_session(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state_tx.subscribe()
    }

    /// Start speaking `text`, superseding whatever is playing or loading.
    ///
    /// Returns `None` when the call was a no-op because the audio output is
    /// unavailable or the controller was shut down.
    pub fn speak(&mut self, text: &str) -> Option<SessionId> {
        if self.closed {
            tracing::warn!("speak() after shutdown ignored");
            return None;
        }

        if let Some(previous) = self.session.take() {
            tracing::debug!("Superseding session {}", previous.id);
            previous.release();
            self.status = PlaybackStatus::Idle;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("speak() called outside a tokio runtime");
            self.status = PlaybackStatus::Error;
            self.error = Some(SpeechError::Platform(NO_RUNTIME.to_string()).user_message());
            self.publish();
            return None;
        };

        if let Err(e) = self.output.ensure_ready() {
            if !self.platform_fault {
                tracing::error!("Audio output unavailable: {}", e);
                self.platform_fault = true;
                self.status = PlaybackStatus::Error;
                self.error = Some(e.user_message());
            } else {
                tracing::debug!("Audio output still unavailable; speak() is a no-op");
            }
            self.publish();
            return None;
        }
        self.platform_fault = false;

        let id = SessionId(self.next_id);
        self.next_id += 1;

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let text = text.to_string();
        let sample_rate = self.settings.sample_rate;
        let channels = self.settings.channels;
        let fetch = runtime.spawn(async move {
            let result = match backend.generate_speech(&text).await {
                Ok(encoded) => audio::decode_clip(&encoded, sample_rate, channels),
                Err(e) => Err(e),
            };
            let _ = tx.send(ControllerMessage::Fetched { session: id, result });
        });

        tracing::info!("Session {} started", id);
        self.session = Some(PlaybackSession {
            id,
            fetch: Some(fetch),
            output: None,
        });
        self.status = PlaybackStatus::Speaking;
        self.error = None;
        self.publish();
        Some(id)
    }

    /// Halt the current utterance. A no-op when nothing is speaking.
    pub fn stop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.output.as_mut() {
            Some(output) => {
                tracing::info!("Stopping session {}", session.id);
                output.stop();
                // The completion message does the Idle transition.
                self.drain_events();
            }
            None => {
                tracing::info!("Session {} cancelled before playback", session.id);
                self.release_session();
                self.status = PlaybackStatus::Idle;
                self.publish();
            }
        }
    }

    /// Wait for the next queued message and apply it.
    ///
    /// Waits forever when nothing is in flight; check
    /// [`current_session`](Self::current_session) first.
    pub async fn next_event(&mut self) -> Option<Transition> {
        let message = self.rx.recv().await?;
        Some(self.handle(message))
    }

    /// Apply every message already queued without waiting.
    pub fn drain_events(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            transitions.push(self.handle(message));
        }
        transitions
    }

    /// Pump messages until no session remains.
    pub async fn run_until_idle(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while self.session.is_some() {
            match self.next_event().await {
                Some(t) => transitions.push(t),
                None => break,
            }
        }
        transitions
    }

    /// Release the session and the audio device.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.release_session();
        self.status = PlaybackStatus::Idle;
        self.output.close();
        self.closed = true;
        self.publish();
        tracing::info!("Playback controller shut down");
    }

    fn handle(&mut self, message: ControllerMessage) -> Transition {
        match message {
            ControllerMessage::Fetched { session, result } => {
                if self.current_session() != Some(session) {
                    tracing::debug!("Dropping clip for superseded session {}", session);
                    return Transition::Ignored;
                }
                match result {
                    Ok(buffer) => self.start_output(session, buffer),
                    Err(e) => self.fail(session, e),
                }
            }
            ControllerMessage::Ended { session } => {
                if self.current_session() != Some(session) {
                    tracing::debug!("Ignoring completion of superseded session {}", session);
                    return Transition::Ignored;
                }
                self.release_session();
                self.status = PlaybackStatus::Idle;
                self.publish();
                tracing::info!("Session {} finished", session);
                Transition::Finished(session)
            }
            ControllerMessage::OutputFailed { session, error } => {
                if self.current_session() != Some(session) {
                    tracing::debug!("Ignoring output failure of superseded session {}", session);
                    return Transition::Ignored;
                }
                self.fail(session, error)
            }
        }
    }

    fn start_output(&mut self, session: SessionId, buffer: AudioBuffer) -> Transition {
        let tx = self.tx.clone();
        let on_finished: OnFinished = Box::new(move |end| {
            let message = match end {
                PlaybackEnd::Completed => ControllerMessage::Ended { session },
                PlaybackEnd::Failed(error) => ControllerMessage::OutputFailed { session, error },
            };
            let _ = tx.send(message);
        });

        match self.output.play(buffer, on_finished) {
            Ok(active) => {
                if let Some(current) = self.session.as_mut() {
                    current.fetch = None;
                    current.output = Some(active);
                }
                tracing::debug!("Session {} audible", session);
                Transition::Started(session)
            }
            Err(e) => {
                self.platform_fault = e.is_platform();
                self.fail(session, e)
            }
        }
    }

    fn fail(&mut self, session: SessionId, error: SpeechError) -> Transition {
        tracing::error!("Playback error in session {}: {}", session, error);
        self.release_session();
        let message = error.user_message();
        self.status = PlaybackStatus::Error;
        self.error = Some(message.clone());
        self.publish();
        Transition::Failed { session, message }
    }

    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.release();
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::FinishOnce;
    use crate::engine::OUTPUT_SAMPLE_RATE;
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub(crate) enum Reply {
        Audio(String),
        Fail(String),
        Stall,
    }

    pub(crate) struct MockBackend {
        reply: Reply,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn silence() -> Arc<Self> {
            Self::new(Reply::Audio(audio::encode(&[0u8; 8])))
        }
    }

    #[async_trait]
    impl SpeechBackend for MockBackend {
        async fn generate_speech(&self, text: &str) -> Result<String> {
            self.calls.lock().unwrap().push(text.to_string());
            match &self.reply {
                Reply::Audio(data) => Ok(data.clone()),
                Reply::Fail(msg) => Err(SpeechError::Backend(msg.clone())),
                Reply::Stall => std::future::pending().await,
            }
        }

        async fn generate_story(&self, prompt: &str) -> Result<String> {
            self.calls.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Reply::Fail(msg) => Err(SpeechError::Backend(msg.clone())),
                _ => Ok(format!("A story about {}.", prompt)),
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct MockDevice {
        pub fail_ready: bool,
        pub ready_calls: usize,
        pub plays: Vec<AudioBuffer>,
        pub stops: usize,
        pub closed: bool,
        pending: Vec<Arc<FinishOnce>>,
    }

    impl MockDevice {
        /// Simulate the most recent clip reaching its end.
        pub fn finish_last(&mut self) {
            if let Some(finish) = self.pending.last() {
                finish.fire();
            }
        }

        /// Simulate the output failing under the most recent clip.
        pub fn fail_last(&mut self) {
            if let Some(finish) = self.pending.last() {
                finish.fail(SpeechError::Platform("speaker unplugged".into()));
            }
        }
    }

    pub(crate) struct MockOutput(pub Arc<Mutex<MockDevice>>);

    impl MockOutput {
        pub fn new() -> (Box<dyn AudioOutput>, Arc<Mutex<MockDevice>>) {
            let device = Arc::new(Mutex::new(MockDevice::default()));
            (Box::new(MockOutput(Arc::clone(&device))), device)
        }
    }

    impl AudioOutput for MockOutput {
        fn ensure_ready(&mut self) -> Result<()> {
            let mut device = self.0.lock().unwrap();
            device.ready_calls += 1;
            if device.fail_ready {
                Err(SpeechError::Platform("no audio here".into()))
            } else {
                Ok(())
            }
        }

        fn play(&mut self, buffer: AudioBuffer, on_finished: OnFinished) -> Result<Box<dyn ActiveOutput>> {
            let finish = Arc::new(FinishOnce::new(on_finished));
            let mut device = self.0.lock().unwrap();
            device.plays.push(buffer);
            device.pending.push(Arc::clone(&finish));
            Ok(Box::new(MockActive {
                device: Arc::clone(&self.0),
                finish,
            }))
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed = true;
        }
    }

    struct MockActive {
        device: Arc<Mutex<MockDevice>>,
        finish: Arc<FinishOnce>,
    }

    impl ActiveOutput for MockActive {
        fn stop(&mut self) {
            self.device.lock().unwrap().stops += 1;
            self.finish.fire();
        }
    }

    fn controller(backend: Arc<MockBackend>) -> (PlaybackController, Arc<Mutex<MockDevice>>) {
        let (output, device) = MockOutput::new();
        (
            PlaybackController::new(backend, output, PlaybackSettings::default()),
            device,
        )
    }

    fn finished(transitions: &[Transition]) -> Vec<SessionId> {
        transitions
            .iter()
            .filter_map(|t| match t {
                Transition::Finished(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn speak_plays_silence_once() {
        let (mut player, device) = controller(MockBackend::silence());

        let id = player.speak("hi").unwrap();
        assert!(player.is_speaking());
        assert!(device.lock().unwrap().plays.is_empty());

        assert_eq!(player.next_event().await, Some(Transition::Started(id)));
        {
            let device = device.lock().unwrap();
            assert_eq!(device.plays.len(), 1);
            let clip = &device.plays[0];
            assert_eq!(clip.sample_rate, OUTPUT_SAMPLE_RATE);
            assert_eq!(clip.channels, 1);
            assert!(clip.samples.len() >= 2);
            assert!(clip.samples.iter().all(|s| *s == 0.0));
        }

        device.lock().unwrap().finish_last();
        assert_eq!(player.next_event().await, Some(Transition::Finished(id)));
        assert!(!player.is_speaking());
        assert_eq!(player.status(), PlaybackStatus::Idle);
        assert_eq!(player.error(), None);
        assert_eq!(device.lock().unwrap().plays.len(), 1);
    }

    #[tokio::test]
    async fn rapid_speak_completes_only_the_last() {
        let backend = MockBackend::silence();
        let (mut player, device) = controller(Arc::clone(&backend));

        let one = player.speak("one").unwrap();
        let two = player.speak("two").unwrap();
        assert_ne!(one, two);
        assert_eq!(player.current_session(), Some(two));

        let mut transitions = Vec::new();
        loop {
            let t = player.next_event().await.unwrap();
            transitions.push(t.clone());
            if t == Transition::Started(two) {
                break;
            }
        }
        device.lock().unwrap().finish_last();
        transitions.extend(player.run_until_idle().await);
        transitions.extend(player.drain_events());

        assert_eq!(finished(&transitions), vec![two]);
        assert_eq!(device.lock().unwrap().plays.len(), 1);
        assert_eq!(*backend.calls.lock().unwrap().last().unwrap(), "two");
    }

    #[tokio::test]
    async fn superseding_a_playing_clip_stops_it_first() {
        let (mut player, device) = controller(MockBackend::silence());

        let one = player.speak("one").unwrap();
        assert_eq!(player.next_event().await, Some(Transition::Started(one)));

        let two = player.speak("two").unwrap();
        assert_eq!(device.lock().unwrap().stops, 1);
        assert_eq!(player.current_session(), Some(two));
        assert!(player.is_speaking());

        // one's completion was queued by the stop and must be ignored
        assert_eq!(player.next_event().await, Some(Transition::Ignored));
        assert_eq!(player.next_event().await, Some(Transition::Started(two)));

        device.lock().unwrap().finish_last();
        let transitions = player.run_until_idle().await;
        assert_eq!(finished(&transitions), vec![two]);
        assert_eq!(device.lock().unwrap().plays.len(), 2);
    }

    #[tokio::test]
    async fn stop_while_idle_is_noop() {
        let (mut player, device) = controller(MockBackend::silence());
        let before = player.snapshot();
        player.stop();
        assert_eq!(player.snapshot(), before);
        assert_eq!(player.error(), None);
        assert_eq!(device.lock().unwrap().stops, 0);
    }

    #[tokio::test]
    async fn stop_while_playing_returns_to_idle() {
        let (mut player, device) = controller(MockBackend::silence());
        let id = player.speak("hello").unwrap();
        assert_eq!(player.next_event().await, Some(Transition::Started(id)));

        player.stop();
        assert!(!player.is_speaking());
        assert_eq!(player.status(), PlaybackStatus::Idle);
        assert_eq!(player.error(), None);
        assert_eq!(player.current_session(), None);
        assert_eq!(device.lock().unwrap().stops, 1);
    }

    #[tokio::test]
    async fn stop_cancels_stalled_fetch() {
        let (mut player, device) = controller(MockBackend::new(Reply::Stall));
        player.speak("slow").unwrap();
        tokio::task::yield_now().await;
        assert!(player.is_speaking());

        player.stop();
        assert!(!player.is_speaking());
        assert_eq!(player.error(), None);
        tokio::task::yield_now().await;
        assert!(player.drain_events().is_empty());
        assert!(device.lock().unwrap().plays.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_sets_error() {
        let backend = MockBackend::new(Reply::Fail("No audio data received from API.".into()));
        let (mut player, _device) = controller(backend);

        let id = player.speak("hi").unwrap();
        let t = player.next_event().await.unwrap();
        assert!(matches!(t, Transition::Failed { session, .. } if session == id));
        assert!(!player.is_speaking());
        assert_eq!(player.status(), PlaybackStatus::Error);
        assert_eq!(player.error(), Some("No audio data received from API."));
        assert_eq!(player.current_session(), None);
    }

    #[tokio::test]
    async fn malformed_audio_reports_generic_message() {
        let (mut player, device) = controller(MockBackend::new(Reply::Audio("***".into())));
        player.speak("hi").unwrap();
        player.run_until_idle().await;
        assert_eq!(player.error(), Some("Sorry, that sound could not be played."));
        assert!(device.lock().unwrap().plays.is_empty());
    }

    #[tokio::test]
    async fn error_clears_on_next_speak() {
        let (mut player, device) = controller(MockBackend::new(Reply::Audio("***".into())));
        player.speak("hi").unwrap();
        player.run_until_idle().await;
        assert!(player.error().is_some());

        player.speak("again").unwrap();
        assert!(player.is_speaking());
        assert_eq!(player.error(), None);
        assert!(device.lock().unwrap().ready_calls >= 2);
    }

    #[tokio::test]
    async fn platform_error_is_surfaced_once() {
        let backend = MockBackend::silence();
        let (mut player, device) = controller(Arc::clone(&backend));
        device.lock().unwrap().fail_ready = true;

        let rx = player.subscribe();
        assert_eq!(player.speak("hi"), None);
        assert_eq!(player.status(), PlaybackStatus::Error);
        assert_eq!(player.error(), Some("no audio here"));
        assert!(rx.has_changed().unwrap());

        assert_eq!(player.speak("hi"), None);
        assert_eq!(player.error(), Some("no audio here"));
        assert!(backend.calls.lock().unwrap().is_empty());

        device.lock().unwrap().fail_ready = false;
        let id = player.speak("hi").unwrap();
        assert_eq!(player.error(), None);
        assert_eq!(player.next_event().await, Some(Transition::Started(id)));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let (mut player, device) = controller(MockBackend::silence());
        let rx = player.subscribe();

        let id = player.speak("hi").unwrap();
        {
            let snapshot = rx.borrow();
            assert!(snapshot.is_speaking);
            assert_eq!(snapshot.session, Some(id));
        }

        player.next_event().await;
        device.lock().unwrap().finish_last();
        player.run_until_idle().await;
        let snapshot = rx.borrow();
        assert!(!snapshot.is_speaking);
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn shutdown_releases_device() {
        let (mut player, device) = controller(MockBackend::silence());
        let id = player.speak("bye").unwrap();
        assert_eq!(player.next_event().await, Some(Transition::Started(id)));

        player.shutdown();
        {
            let device = device.lock().unwrap();
            assert!(device.closed);
            assert_eq!(device.stops, 1);
        }
        assert!(!player.is_speaking());
        assert_eq!(player.speak("again"), None);
    }

    #[tokio::test]
    async fn output_failure_mid_clip_surfaces_error() {
        let (mut player, device) = controller(MockBackend::silence());
        let id = player.speak("hello").unwrap();
        assert_eq!(player.next_event().await, Some(Transition::Started(id)));

        device.lock().unwrap().fail_last();
        let t = player.next_event().await.unwrap();
        assert!(matches!(t, Transition::Failed { session, .. } if session == id));
        assert!(!player.is_speaking());
        assert_eq!(player.status(), PlaybackStatus::Error);
        assert_eq!(player.error(), Some("speaker unplugged"));
        assert_eq!(player.current_session(), None);

        // releasing the failed session must not report a clean finish
        assert!(finished(&player.drain_events()).is_empty());

        let next = player.speak("again").unwrap();
        assert_eq!(player.error(), None);
        assert_eq!(player.next_event().await, Some(Transition::Started(next)));
    }

    #[tokio::test]
    async fn output_failure_of_superseded_clip_is_ignored() {
        let (mut player, device) = controller(MockBackend::silence());
        let one = player.speak("one").unwrap();
        assert_eq!(player.next_event().await, Some(Transition::Started(one)));
        let two = player.speak("two").unwrap();

        // one's stop already completed it; a late failure is a no-op
        device.lock().unwrap().pending[0].fail(SpeechError::Platform("late".into()));
        player.drain_events();
        assert_eq!(player.current_session(), Some(two));
        assert!(player.is_speaking());
        assert_eq!(player.error(), None);
    }

    #[test]
    fn speak_outside_runtime_reports_error() {
        let (mut player, device) = controller(MockBackend::silence());
        assert_eq!(player.speak("hi"), None);
        assert!(!player.is_speaking());
        assert_eq!(player.status(), PlaybackStatus::Error);
        assert_eq!(player.error(), Some(NO_RUNTIME));
        assert_eq!(device.lock().unwrap().ready_calls, 0);
    }

    #[tokio::test]
    async fn drop_closes_device() {
        let (player, device) = controller(MockBackend::silence());
        drop(player);
        assert!(device.lock().unwrap().closed);
    }
}
