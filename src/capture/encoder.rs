use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, StreamFormat};

pub const CLIP_MIME_TYPE: &str = "audio/wav";

/// Finished, immutable recording
#[derive(Clone)]
pub struct AudioClip {
    data: Arc<[u8]>,
    sample_rate: u32,
    channels: u16,
    sample_count: usize,
    recorded_at: DateTime<Utc>,
}

/// What a UI surface gets to see of a clip
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInfo {
    pub mime_type: &'static str,
    pub size_bytes: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl AudioClip {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        CLIP_MIME_TYPE
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved sample count (all channels)
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn duration_ms(&self) -> u64 {
        let frames = self.sample_count as u64 / self.channels.max(1) as u64;
        frames * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn info(&self) -> ClipInfo {
        ClipInfo {
            mime_type: CLIP_MIME_TYPE,
            size_bytes: self.len(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            duration_ms: self.duration_ms(),
            recorded_at: self.recorded_at,
        }
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.bytes())
            .with_context(|| format!("Failed to write clip to {}", path.display()))?;
        info!("Clip written: {} ({} bytes)", path.display(), self.len());
        Ok(())
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("size_bytes", &self.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_ms", &self.duration_ms())
            .finish()
    }
}

impl Serialize for AudioClip {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.info().serialize(serializer)
    }
}

/// Ordered chunks emitted during one recording
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Concatenate all chunks in order
    pub fn concat(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Turns incoming frames into little-endian PCM chunks and wraps the
/// concatenated chunks into a WAV clip at the end.
pub struct ChunkEncoder {
    format: StreamFormat,
    pending: Vec<i16>,
    dropped_frames: usize,
}

impl ChunkEncoder {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            pending: Vec::new(),
            dropped_frames: 0,
        }
    }

    pub fn push_frame(&mut self, frame: &AudioFrame) {
        if frame.sample_rate != self.format.sample_rate || frame.channels != self.format.channels {
            if self.dropped_frames == 0 {
                warn!(
                    "Dropping frame with unexpected format ({}Hz/{}ch, expected {}Hz/{}ch)",
                    frame.sample_rate, frame.channels, self.format.sample_rate, self.format.channels
                );
            }
            self.dropped_frames += 1;
            return;
        }
        self.pending.extend_from_slice(&frame.samples);
    }

    /// Emit everything pushed since the last chunk, if anything
    pub fn take_chunk(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = self.pending.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.pending.clear();
        Some(chunk)
    }

    pub fn finish(self, buffer: RecordingBuffer) -> Result<AudioClip> {
        let chunk_count = buffer.len();
        let pcm = buffer.concat();

        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;

        let mut sample_count = 0usize;
        for bytes in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                .context("Failed to write sample to WAV")?;
            sample_count += 1;
        }
        writer.finalize().context("Failed to finalize WAV clip")?;

        if self.dropped_frames > 0 {
            warn!("{} frames were dropped for format mismatch", self.dropped_frames);
        }
        debug!("Assembled clip from {} chunks ({} samples)", chunk_count, sample_count);

        Ok(AudioClip {
            data: Arc::from(cursor.into_inner()),
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            sample_count,
            recorded_at: Utc::now(),
        })
    }
}
