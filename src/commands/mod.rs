pub mod story;
pub mod tts;
