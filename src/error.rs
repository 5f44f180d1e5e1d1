use thiserror::Error;

/// Message shown for any decode failure; the detail only goes to the log.
const PLAYBACK_FAILED: &str = "Sorry, that sound could not be played.";

pub type Result<T> = std::result::Result<T, SpeechError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    /// Network failure, missing credential or empty response from the service.
    #[error("{0}")]
    Backend(String),
    /// Malformed or unexpected audio payload.
    #[error("could not decode audio: {0}")]
    Decode(String),
    /// Audio output unsupported or device initialization failed.
    #[error("{0}")]
    Platform(String),
}

impl SpeechError {
    /// Text suitable for the dismissable message in the view.
    pub fn user_message(&self) -> String {
        match self {
            SpeechError::Backend(msg) | SpeechError::Platform(msg) => msg.clone(),
            SpeechError::Decode(_) => PLAYBACK_FAILED.to_string(),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, SpeechError::Platform(_))
    }
}

impl From<base64::DecodeError> for SpeechError {
    fn from(e: base64::DecodeError) -> Self {
        SpeechError::Decode(e.to_string())
    }
}
