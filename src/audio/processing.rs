use anyhow::Result;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::engine::AudioBuffer;

/// Resample one channel of audio.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        params,
        samples.len(),
        1, // mono
    )?;

    let input = vec![samples.to_vec()];
    let output = resampler.process(&input, None)?;

    Ok(output.into_iter().next().unwrap_or_default())
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let n = channels as usize;
    samples
        .chunks_exact(n)
        .map(|frame| frame.iter().sum::<f32>() / n as f32)
        .collect()
}

/// Duplicate mono samples across `channels` interleaved outputs.
pub fn fan_out(mono: &[f32], channels: u16) -> Vec<f32> {
    let n = channels.max(1) as usize;
    if n == 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * n);
    for &s in mono {
        out.extend(std::iter::repeat(s).take(n));
    }
    out
}

/// Convert a clip to the rate and channel layout a device wants.
pub fn prepare_for_device(buffer: &AudioBuffer, device_rate: u32, device_channels: u16) -> Result<AudioBuffer> {
    let mono = downmix(&buffer.samples, buffer.channels);
    let resampled = resample(&mono, buffer.sample_rate, device_rate)?;
    Ok(AudioBuffer {
        samples: fan_out(&resampled, device_channels),
        sample_rate: device_rate,
        channels: device_channels.max(1),
    })
}
