//! Amplitude snapshot computation for the live waveform
//!
//! Frames from the capture stream are folded to mono into a bounded ring.
//! Each refresh turns the most recent window into a byte time-domain buffer
//! (128 = silence) plus a smoothed RMS level.

use std::collections::VecDeque;

use crate::capture::AudioFrame;

/// Byte value of a zero sample
pub const CENTER: u8 = 128;

/// Smoothing factor for the level meter (share of the new value)
const LEVEL_ALPHA: f32 = 0.3;

/// Bounded ring of recent mono samples
pub struct SampleRing {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append samples, evicting the oldest beyond capacity
    pub fn push_samples(&mut self, samples: &[i16]) {
        if samples.len() >= self.capacity {
            self.samples.clear();
            self.samples
                .extend(&samples[samples.len() - self.capacity..]);
            return;
        }

        let overflow = (self.samples.len() + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
        }
        self.samples.extend(samples);
    }

    /// Fold an interleaved frame to mono and append it
    pub fn push_frame(&mut self, frame: &AudioFrame) {
        let channels = frame.channels.max(1) as usize;
        if channels == 1 {
            self.push_samples(&frame.samples);
            return;
        }

        let mono: Vec<i16> = frame
            .samples
            .chunks_exact(channels)
            .map(|f| (f.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect();
        self.push_samples(&mono);
    }

    /// The newest `len` samples as bytes centred on 128, left-padded with silence
    pub fn time_domain(&self, len: usize) -> Vec<u8> {
        let available = self.samples.len().min(len);
        let mut out = vec![CENTER; len - available];
        out.extend(
            self.samples
                .iter()
                .skip(self.samples.len() - available)
                .map(|&s| sample_to_byte(s)),
        );
        out
    }

    /// RMS of the whole ring, normalised to 0.0-1.0
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64 / i16::MAX as f64;
                v * v
            })
            .sum();
        ((sum_squares / self.samples.len() as f64).sqrt() as f32).clamp(0.0, 1.0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn sample_to_byte(sample: i16) -> u8 {
    ((sample as i32 >> 8) + CENTER as i32).clamp(0, 255) as u8
}

/// Exponential moving average over level readings
#[derive(Debug, Default)]
pub struct LevelSmoother {
    previous: Option<f32>,
}

impl LevelSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, level: f32) -> f32 {
        let smoothed = match self.previous {
            None => level,
            Some(prev) => LEVEL_ALPHA * level + (1.0 - LEVEL_ALPHA) * prev,
        };
        self.previous = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// One complete waveform frame for the drawing step
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformSnapshot {
    /// Time-domain bytes, 128 = silence
    pub time_domain: Vec<u8>,
    /// Smoothed RMS level, 0.0-1.0
    pub level: f32,
    /// Increases with every published snapshot
    pub sequence: u64,
}

impl WaveformSnapshot {
    pub fn idle(len: usize, sequence: u64) -> Self {
        Self {
            time_domain: vec![CENTER; len],
            level: 0.0,
            sequence,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.level == 0.0 && self.time_domain.iter().all(|&b| b == CENTER)
    }

    /// Canvas points for a `width` x `height` surface.
    ///
    /// Each byte maps to `y = (b / 128) * height / 2`, x advances by
    /// `width / len`, and the line is closed at the right-hand midpoint.
    pub fn polyline(&self, width: f32, height: f32) -> Vec<(f32, f32)> {
        let mut points = Vec::with_capacity(self.time_domain.len() + 1);
        if self.time_domain.is_empty() {
            return points;
        }

        let slice_width = width / self.time_domain.len() as f32;
        let mut x = 0.0f32;
        for &byte in &self.time_domain {
            let v = byte as f32 / 128.0;
            points.push((x, v * height / 2.0));
            x += slice_width;
        }
        points.push((width, height / 2.0));
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let mut ring = SampleRing::new(256);
        let samples: Vec<i16> = (0..1000).map(|i| i as i16).collect();
        ring.push_samples(&samples);

        assert_eq!(ring.len(), 256);

        ring.push_samples(&[1, 2, 3]);
        assert_eq!(ring.len(), 256);
    }

    #[test]
    fn test_ring_keeps_newest_samples() {
        let mut ring = SampleRing::new(4);
        ring.push_samples(&[1, 2, 3]);
        ring.push_samples(&[4, 5]);

        let bytes = ring.time_domain(4);
        let expected: Vec<u8> = [2i16, 3, 4, 5].iter().map(|&s| sample_to_byte(s)).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_time_domain_pads_with_silence() {
        let mut ring = SampleRing::new(16);
        ring.push_samples(&[i16::MAX, i16::MIN]);

        let bytes = ring.time_domain(4);
        assert_eq!(bytes, vec![128, 128, 255, 0]);
    }

    #[test]
    fn test_push_frame_folds_stereo() {
        let mut ring = SampleRing::new(16);
        ring.push_frame(&AudioFrame {
            samples: vec![1000, 3000, -1000, -3000],
            sample_rate: 48_000,
            channels: 2,
            timestamp_ms: 0,
        });

        assert_eq!(ring.len(), 2);
        assert_eq!(
            ring.time_domain(2),
            vec![sample_to_byte(2000), sample_to_byte(-2000)]
        );
    }

    #[test]
    fn test_rms_range() {
        let mut ring = SampleRing::new(100);
        assert_eq!(ring.rms(), 0.0);

        ring.push_samples(&[i16::MAX; 100]);
        assert!(ring.rms() > 0.99 && ring.rms() <= 1.0);

        ring.clear();
        ring.push_samples(&[0; 100]);
        assert_eq!(ring.rms(), 0.0);
    }

    #[test]
    fn test_level_smoothing() {
        let mut smoother = LevelSmoother::new();
        assert_eq!(smoother.apply(0.5), 0.5);

        let expected = LEVEL_ALPHA * 1.0 + (1.0 - LEVEL_ALPHA) * 0.5;
        assert!((smoother.apply(1.0) - expected).abs() < 1e-6);

        smoother.reset();
        assert_eq!(smoother.apply(0.2), 0.2);
    }

    #[test]
    fn test_polyline_geometry() {
        let snapshot = WaveformSnapshot {
            time_domain: vec![128, 0, 255, 128],
            level: 0.5,
            sequence: 1,
        };
        let points = snapshot.polyline(300.0, 96.0);

        assert_eq!(points.len(), 5);
        assert_eq!(points[0], (0.0, 48.0));
        assert_eq!(points[1], (75.0, 0.0));
        assert_eq!(points[2].0, 150.0);
        assert!((points[2].1 - 255.0 / 128.0 * 48.0).abs() < 1e-4);
        assert_eq!(points[4], (300.0, 48.0));
    }

    #[test]
    fn test_idle_snapshot() {
        let idle = WaveformSnapshot::idle(128, 7);
        assert_eq!(idle.time_domain.len(), 128);
        assert!(idle.is_idle());
        assert_eq!(idle.sequence, 7);
        assert!(idle.polyline(300.0, 96.0).iter().all(|&(_, y)| y == 48.0));
    }
}
