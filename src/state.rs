use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::AudioOutput;
use crate::controller::PlaybackController;
use crate::engine::{SpeechBackend, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

/// Identifies one utterance from `speak` to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Speaking,
    Error,
}

/// What the view observes of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub is_speaking: bool,
    pub error: Option<String>,
    pub session: Option<SessionId>,
}

/// Everything the view layer talks to.
pub struct AppState {
    pub settings: Settings,
    pub backend: Arc<dyn SpeechBackend>,
    pub player: PlaybackController,
}

impl AppState {
    pub fn new(settings: Settings, backend: Arc<dyn SpeechBackend>, output: Box<dyn AudioOutput>) -> Self {
        let player = PlaybackController::new(Arc::clone(&backend), output, settings.playback.clone());
        Self {
            settings,
            backend,
            player,
        }
    }

    /// Gemini backend and the default system output device.
    #[cfg(feature = "device")]
    pub fn with_defaults(settings: Settings) -> Self {
        let backend = Arc::new(crate::engine::gemini::GeminiClient::new(settings.backend.clone()));
        Self::new(settings, backend, Box::new(crate::audio::CpalOutput::new()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub playback: PlaybackSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Absent key is allowed; every backend call then fails.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub story_model: String,
    pub speech_model: String,
    pub voice: String,
    pub temperature: f32,
    pub top_k: u32,
    pub storyteller_persona: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            story_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
            temperature: 0.8,
            top_k: 40,
            storyteller_persona: "You are a master storyteller for young children, around 5 years old. \
                Your stories are always positive, whimsical, simple to understand, and have a gentle, \
                kind moral. Keep them short, about 150-200 words."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS,
        }
    }
}
