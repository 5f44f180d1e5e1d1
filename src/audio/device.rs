use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::playback::{ActiveOutput, AudioOutput, FinishOnce, OnFinished};
use super::processing;
use crate::engine::AudioBuffer;
use crate::error::SpeechError;

const UNSUPPORTED: &str = "Your device does not support audio playback.";
const INTERRUPTED: &str = "Audio playback was interrupted. Please try again.";

struct OpenDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
    /// Set by the stream error callback; the device is reopened on next use.
    lost: Arc<AtomicBool>,
}

/// Default system output device via cpal, opened lazily.
pub struct CpalOutput {
    open: Option<OpenDevice>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self { open: None }
    }

    fn open_default() -> Result<OpenDevice> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("No output device available")?;

        let config = device
            .default_output_config()
            .context("Failed to get default output config")?;
        let config: cpal::StreamConfig = config.into();

        tracing::info!(
            "Audio output opened (device sample rate: {}Hz, {} channels)",
            config.sample_rate.0,
            config.channels
        );

        Ok(OpenDevice {
            device,
            config,
            lost: Arc::new(AtomicBool::new(false)),
        })
    }

    fn start_stream(open: &OpenDevice, buffer: &AudioBuffer, finish: Arc<FinishOnce>) -> Result<cpal::Stream> {
        let prepared = processing::prepare_for_device(buffer, open.config.sample_rate.0, open.config.channels)
            .context("Failed to convert clip to device format")?;
        let samples = prepared.samples;
        let mut pos = 0usize;
        let lost = Arc::clone(&open.lost);
        let on_error = Arc::clone(&finish);

        let stream = open
            .device
            .build_output_stream(
                &open.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let n = (samples.len() - pos).min(data.len());
                    data[..n].copy_from_slice(&samples[pos..pos + n]);
                    data[n..].fill(0.0);
                    pos += n;
                    if pos >= samples.len() {
                        finish.fire();
                    }
                },
                move |err| {
                    tracing::error!("Audio output error: {}", err);
                    lost.store(true, Ordering::SeqCst);
                    // The data callback may never run again.
                    on_error.fail(SpeechError::Platform(INTERRUPTED.to_string()));
                },
                None,
            )
            .context("Failed to build output stream")?;

        stream.play().context("Failed to start audio stream")?;
        Ok(stream)
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn ensure_ready(&mut self) -> crate::error::Result<()> {
        if let Some(open) = &self.open {
            if !open.lost.load(Ordering::SeqCst) {
                return Ok(());
            }
            tracing::warn!("Audio output was interrupted; reopening default device");
            self.open = None;
        }

        let open = Self::open_default().map_err(|e| {
            tracing::error!("Audio output unavailable: {:#}", e);
            SpeechError::Platform(UNSUPPORTED.to_string())
        })?;
        self.open = Some(open);
        Ok(())
    }

    fn play(&mut self, buffer: AudioBuffer, on_finished: OnFinished) -> crate::error::Result<Box<dyn ActiveOutput>> {
        self.ensure_ready()?;
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| SpeechError::Platform(UNSUPPORTED.to_string()))?;

        let finish = Arc::new(FinishOnce::new(on_finished));
        let stream = Self::start_stream(open, &buffer, Arc::clone(&finish)).map_err(|e| {
            tracing::error!("Playback error: {:#}", e);
            open.lost.store(true, Ordering::SeqCst);
            SpeechError::Platform(UNSUPPORTED.to_string())
        })?;

        tracing::info!("Playing {} ms of audio", buffer.duration_ms());
        Ok(Box::new(CpalPlayback {
            stream: Some(stream),
            finish,
        }))
    }

    fn close(&mut self) {
        if self.open.take().is_some() {
            tracing::info!("Audio output closed");
        }
    }
}

struct CpalPlayback {
    stream: Option<cpal::Stream>,
    finish: Arc<FinishOnce>,
}

impl ActiveOutput for CpalPlayback {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause stream before drop: {}", e);
            }
        }
        self.finish.fire();
    }
}
