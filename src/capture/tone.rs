use std::f32::consts::TAU;
use std::time::Duration;
use tracing::info;

use super::backend::{AudioInput, CaptureError, InputStream, StreamFormat};
use super::paced::spawn_paced_track;
use crate::config::CaptureConfig;

pub const DEFAULT_FREQUENCY_HZ: f32 = 440.0;

/// Peak amplitude as a fraction of full scale
const AMPLITUDE: f32 = 0.3;

/// Synthetic input producing a continuous sine tone
///
/// Lets the recorder run end to end on machines without a microphone.
pub struct ToneInput {
    frequency_hz: f32,
    name: String,
}

impl ToneInput {
    pub fn new(frequency_hz: f32) -> Self {
        Self {
            frequency_hz,
            name: format!("tone ({} Hz)", frequency_hz),
        }
    }
}

/// Generate `len` interleaved samples, advancing `phase` (radians)
pub(crate) fn sine_frame(phase: &mut f32, step: f32, channels: usize, len: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(len);
    let channels = channels.max(1);

    while samples.len() < len {
        let value = (phase.sin() * AMPLITUDE * i16::MAX as f32) as i16;
        for _ in 0..channels {
            samples.push(value);
        }
        *phase = (*phase + step) % TAU;
    }

    samples.truncate(len);
    samples
}

#[async_trait::async_trait]
impl AudioInput for ToneInput {
    async fn acquire(&self, config: &CaptureConfig) -> Result<InputStream, CaptureError> {
        let format = StreamFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
        };

        info!(
            "Starting {} input ({}Hz, {} channels)",
            self.name, format.sample_rate, format.channels
        );

        let (frames_tx, frames_rx) = InputStream::channel();
        let samples_per_frame = config.samples_per_frame();
        let step = TAU * self.frequency_hz / format.sample_rate as f32;
        let channels = format.channels as usize;
        let mut phase = 0.0f32;

        let track = spawn_paced_track(
            self.name.clone(),
            frames_tx,
            format,
            Duration::from_millis(config.buffer_duration_ms),
            move || Some(sine_frame(&mut phase, step, channels, samples_per_frame)),
        );

        Ok(InputStream::new(format, frames_rx, vec![track]))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_frame_length_and_range() {
        let mut phase = 0.0;
        let step = TAU * 440.0 / 16_000.0;
        let samples = sine_frame(&mut phase, step, 1, 320);

        assert_eq!(samples.len(), 320);
        let limit = (AMPLITUDE * i16::MAX as f32) as i16 + 1;
        assert!(samples.iter().all(|s| s.abs() <= limit));
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_sine_frame_stereo_duplicates_channels() {
        let mut phase = 0.5;
        let samples = sine_frame(&mut phase, 0.1, 2, 8);

        for pair in samples.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_phase_continues_across_frames() {
        let step = 0.25;
        let mut phase = 0.0;
        let first = sine_frame(&mut phase, step, 1, 4);
        let second = sine_frame(&mut phase, step, 1, 4);

        let mut phase = 0.0;
        let whole = sine_frame(&mut phase, step, 1, 8);
        assert_eq!([first, second].concat(), whole);
    }
}
