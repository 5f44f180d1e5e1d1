pub mod gemini;

use async_trait::async_trait;

use crate::error::Result;

/// The speech model returns 24kHz audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;
pub const OUTPUT_CHANNELS: u16 = 1;

/// Audio buffer for passing audio data between modules.
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Request/response boundary to the hosted generative-AI service.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize `text`; returns base64-encoded mono s16le PCM at 24kHz.
    async fn generate_speech(&self, text: &str) -> Result<String>;

    /// Short child-appropriate story for `prompt`, trimmed.
    async fn generate_story(&self, prompt: &str) -> Result<String>;
}
