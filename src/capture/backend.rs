use anyhow::{bail, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CaptureConfig;

/// Frames buffered per subscriber before a slow reader starts lagging
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream was acquired
    pub timestamp_ms: u64,
}

/// Errors that can occur while acquiring an input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    PermissionDenied,
    NoInputDevice,
    UnsupportedFormat,
    Stream(String),
    Source(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "Permission to use the microphone was denied"),
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::UnsupportedFormat => write!(f, "No supported audio input format"),
            CaptureError::Stream(e) => write!(f, "Failed to open audio stream: {}", e),
            CaptureError::Source(e) => write!(f, "Failed to read audio source: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

/// One hardware (or simulated) track feeding an input stream.
///
/// Stopping a track ends frame delivery from it and frees whatever the track
/// holds (device stream, replay task). `stop` must be safe to call more than once.
pub trait MediaTrack: Send + Sync {
    fn stop(&self);

    fn is_live(&self) -> bool;

    fn label(&self) -> &str;
}

/// Shape of the frames an input stream delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A live input stream: the tracks producing it plus a fan-out of their frames.
///
/// Only the owner may release it; readers get frames through [`InputStream::subscribe`].
/// Once every producing track has ended, subscribers observe a closed channel.
pub struct InputStream {
    id: Uuid,
    format: StreamFormat,
    frames: broadcast::Receiver<AudioFrame>,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl InputStream {
    pub fn new(
        format: StreamFormat,
        frames: broadcast::Receiver<AudioFrame>,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            format,
            frames,
            tracks,
        }
    }

    /// Create the frame channel an input implementation publishes into
    pub fn channel() -> (broadcast::Sender<AudioFrame>, broadcast::Receiver<AudioFrame>) {
        broadcast::channel(FRAME_CHANNEL_CAPACITY)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Read-only view of the frames; does not keep the tracks alive.
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.resubscribe()
    }

    /// Stop every track. Consumes the stream, so it can only happen once.
    pub fn release(self) {
        for track in &self.tracks {
            debug!("Stopping track {}", track.label());
            track.stop();
        }
        info!("Input stream {} released ({} tracks)", self.id, self.tracks.len());
    }
}

/// Hardware audio acquisition
///
/// Implementations:
/// - Microphone: cpal default input device (`microphone` feature)
/// - File: decoded file replayed in real time
/// - Tone: synthetic sine wave, for dry runs without hardware
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire a live stream. May suspend while the user is asked for access.
    async fn acquire(&self, config: &CaptureConfig) -> Result<InputStream, CaptureError>;

    /// Input name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Default microphone
    Microphone,
    /// Decoded audio file, replayed at real-time pace
    File(PathBuf),
    /// Sine tone at the given frequency
    Tone { frequency_hz: f32 },
}

impl std::str::FromStr for AudioSource {
    type Err = anyhow::Error;

    /// Parses `mic`, `file:<path>`, `tone` or `tone:<hz>`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "mic" || s == "microphone" => Ok(AudioSource::Microphone),
            None if s == "tone" => Ok(AudioSource::Tone {
                frequency_hz: super::tone::DEFAULT_FREQUENCY_HZ,
            }),
            Some(("file", path)) if !path.is_empty() => Ok(AudioSource::File(PathBuf::from(path))),
            Some(("tone", hz)) => {
                let frequency_hz: f32 = hz
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid tone frequency: {}", hz))?;
                if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
                    bail!("Tone frequency must be positive, got {}", hz);
                }
                Ok(AudioSource::Tone { frequency_hz })
            }
            _ => bail!("Unknown audio source '{}' (expected mic, file:<path> or tone[:<hz>])", s),
        }
    }
}

/// Audio input factory
pub struct AudioInputFactory;

impl AudioInputFactory {
    /// Create an audio input for the requested source
    pub fn create(source: AudioSource) -> Result<Box<dyn AudioInput>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    Ok(Box::new(super::microphone::MicrophoneInput::new()))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    bail!("Microphone capture requires the `microphone` feature")
                }
            }

            AudioSource::File(path) => Ok(Box::new(super::file::FileInput::new(path))),

            AudioSource::Tone { frequency_hz } => {
                Ok(Box::new(super::tone::ToneInput::new(frequency_hz)))
            }
        }
    }
}
