use std::sync::Mutex;

use crate::engine::AudioBuffer;
use crate::error::{Result, SpeechError};

/// How a clip stopped producing sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Ran to the end or was halted with `stop`.
    Completed,
    /// The output failed mid-clip.
    Failed(SpeechError),
}

/// Called once when a clip stops producing sound.
pub type OnFinished = Box<dyn FnOnce(PlaybackEnd) + Send + 'static>;

/// Platform audio output the controller plays through.
pub trait AudioOutput {
    /// Create the device on first use, or resume it if the platform
    /// suspended or lost it. Reused across clips.
    fn ensure_ready(&mut self) -> Result<()>;

    /// Start playing `buffer`. `on_finished` must fire exactly once.
    fn play(&mut self, buffer: AudioBuffer, on_finished: OnFinished) -> Result<Box<dyn ActiveOutput>>;

    /// Release the device entirely.
    fn close(&mut self);
}

/// One clip currently being played.
pub trait ActiveOutput {
    /// Halt immediately. Triggers the same `on_finished` as a natural end.
    fn stop(&mut self);
}

/// Fires a completion callback at most once from any thread.
pub struct FinishOnce(Mutex<Option<OnFinished>>);

impl FinishOnce {
    pub fn new(callback: OnFinished) -> Self {
        Self(Mutex::new(Some(callback)))
    }

    pub fn fire(&self) {
        self.finish(PlaybackEnd::Completed);
    }

    pub fn fail(&self, error: SpeechError) {
        self.finish(PlaybackEnd::Failed(error));
    }

    fn finish(&self, end: PlaybackEnd) {
        let callback = match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback(end);
        }
    }
}
