use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{info, warn};

use super::backend::{AudioInput, CaptureError, InputStream, StreamFormat};
use super::paced::spawn_paced_track;
use crate::config::CaptureConfig;

/// Fully decoded audio file (interleaved i16 PCM)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode any container/codec symphonia supports (WAV, FLAC, OGG, MP3, M4A)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unrecognised audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track")?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut samples: Vec<i16> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            }
        }

        if sample_rate == 0 || channels == 0 {
            anyhow::bail!("Audio file has no decodable samples: {}", path.display());
        }

        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }
}

/// Input that replays a decoded file at real-time pace, then ends
pub struct FileInput {
    path: PathBuf,
    name: String,
}

impl FileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file ({})", path.display());
        Self { path, name }
    }
}

#[async_trait::async_trait]
impl AudioInput for FileInput {
    async fn acquire(&self, config: &CaptureConfig) -> Result<InputStream, CaptureError> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| CaptureError::Source(e.to_string()))?
            .map_err(|e| CaptureError::Source(format!("{:#}", e)))?;

        let format = StreamFormat {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        };

        // Frame size follows the file's native format, not the requested one
        let native = CaptureConfig {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            buffer_duration_ms: config.buffer_duration_ms,
        };
        let samples_per_frame = native.samples_per_frame();

        let (frames_tx, frames_rx) = InputStream::channel();
        let samples = audio.samples;
        let mut position = 0usize;

        let track = spawn_paced_track(
            self.name.clone(),
            frames_tx,
            format,
            Duration::from_millis(config.buffer_duration_ms),
            move || {
                if position >= samples.len() {
                    return None;
                }
                let end = (position + samples_per_frame).min(samples.len());
                let frame = samples[position..end].to_vec();
                position = end;
                Some(frame)
            },
        );

        info!("Replaying {} ({:.1}s)", self.name, audio.duration_seconds);

        Ok(InputStream::new(format, frames_rx, vec![track]))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
