//! In-memory mono PCM audio and tone splicing.
//!
//! Audio is held as 32-bit float mono samples at a fixed sample rate, the
//! same layout FFmpeg produces with `-ac 1 -f f32le`. Splicing replaces a
//! time range with a sine tone sample-for-sample, so the buffer length (and
//! therefore the segment duration) never changes.

use std::f32::consts::PI;

use admute_models::AdRegion;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Tone used to cover censored audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneConfig {
    /// Tone frequency in Hz
    pub frequency_hz: f32,
    /// Amplitude, 0.0-1.0 of full scale
    pub volume: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1000.0,
            volume: 0.2,
        }
    }
}

/// Mono f32 PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap existing samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Silent buffer of the given duration.
    pub fn silent(duration_secs: f64, sample_rate: u32) -> Self {
        let len = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Decode raw little-endian f32 bytes (trailing partial samples are ignored).
    pub fn from_f32le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Encode as raw little-endian f32 bytes.
    pub fn to_f32le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Sample offset for a time, clamped into the buffer.
    pub fn sample_at(&self, seconds: f64) -> usize {
        let index = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        index.min(self.samples.len())
    }

    /// Append `other` after this buffer, producing a new buffer.
    pub fn concat(&self, other: &AudioBuffer) -> MediaResult<AudioBuffer> {
        if self.sample_rate != other.sample_rate {
            return Err(MediaError::SampleRateMismatch {
                left: self.sample_rate,
                right: other.sample_rate,
            });
        }
        let mut samples = Vec::with_capacity(self.samples.len() + other.samples.len());
        samples.extend_from_slice(&self.samples);
        samples.extend_from_slice(&other.samples);
        Ok(AudioBuffer::new(samples, self.sample_rate))
    }

    /// RMS level in dBFS. Silence (or an empty buffer) is negative infinity.
    pub fn rms_dbfs(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let sum_sq: f64 = self.samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        let rms = (sum_sq / self.samples.len() as f64).sqrt();
        if rms <= 0.0 {
            f64::NEG_INFINITY
        } else {
            20.0 * rms.log10()
        }
    }
}

/// Synthesize `len` samples of a sine tone.
pub fn generate_tone(len: usize, sample_rate: u32, tone: &ToneConfig) -> Vec<f32> {
    let step = 2.0 * PI * tone.frequency_hz / sample_rate.max(1) as f32;
    (0..len)
        .map(|n| (step * n as f32).sin() * tone.volume)
        .collect()
}

/// Replace `[start, end)` seconds of `audio` with a tone.
///
/// Bounds beyond the buffer are clamped to it. The result always has exactly
/// as many samples as the input.
pub fn splice_tone(
    audio: &AudioBuffer,
    start: f64,
    end: f64,
    tone: &ToneConfig,
) -> MediaResult<AudioBuffer> {
    let mut out = audio.clone();
    splice_in_place(&mut out, start, end, tone)?;
    Ok(out)
}

/// Replace every region of `audio` with a tone.
pub fn splice_regions(
    audio: &AudioBuffer,
    regions: &[AdRegion],
    tone: &ToneConfig,
) -> MediaResult<AudioBuffer> {
    let mut out = audio.clone();
    for region in regions {
        splice_in_place(&mut out, region.start, region.end, tone)?;
    }
    Ok(out)
}

fn splice_in_place(
    audio: &mut AudioBuffer,
    start: f64,
    end: f64,
    tone: &ToneConfig,
) -> MediaResult<()> {
    if !start.is_finite() || !end.is_finite() || start > end {
        return Err(MediaError::InvalidRange {
            start,
            end,
            len: audio.duration_secs(),
        });
    }

    let from = audio.sample_at(start);
    let to = audio.sample_at(end).max(from);
    if from == to {
        return Ok(());
    }

    let tone_samples = generate_tone(to - from, audio.sample_rate, tone);
    audio.samples[from..to].copy_from_slice(&tone_samples);
    Ok(())
}
