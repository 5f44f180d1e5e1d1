pub mod audio;
pub mod commands;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod state;

pub use controller::{PlaybackController, Transition};
pub use engine::{AudioBuffer, SpeechBackend};
pub use error::SpeechError;
pub use state::{AppState, PlaybackSnapshot, PlaybackStatus, SessionId, Settings};

/// Install the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Logging, settings from the environment, Gemini backend and the default
/// audio device. Must be called inside a tokio runtime before speaking.
#[cfg(feature = "device")]
pub fn start() -> AppState {
    init_tracing();

    tracing::info!("Starting Read Aloud v{}", env!("CARGO_PKG_VERSION"));

    let settings = config::load_settings();
    let state = AppState::with_defaults(settings);

    tracing::info!("App setup complete");
    state
}
