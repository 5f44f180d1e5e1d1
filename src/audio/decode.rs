use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::engine::AudioBuffer;
use crate::error::{Result, SpeechError};

/// Standard (padded) base64 to raw bytes.
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded.trim())?)
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Interpret `bytes` as interleaved little-endian s16 PCM and normalize to f32.
///
/// A trailing partial frame is dropped. An odd byte count cannot be split
/// into 16-bit samples and is rejected.
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if channels == 0 {
        return Err(SpeechError::Decode("channel count must be at least 1".into()));
    }
    if sample_rate == 0 {
        return Err(SpeechError::Decode("sample rate must be non-zero".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SpeechError::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    let channels_usize = channels as usize;
    let frames = bytes.len() / 2 / channels_usize;
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .take(frames * channels_usize)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Base64 payload straight to a playable buffer.
pub fn decode_clip(encoded: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    let bytes = decode(encoded)?;
    decode_audio_data(&bytes, sample_rate, channels)
}
