//! Audio acquisition and the capture session
//!
//! - `backend`: input trait, stream/track handles, source factory
//! - `session`: one acquired stream plus its chunk encoder
//! - `encoder`: chunk emission, buffer and final WAV clip

pub mod backend;
pub mod encoder;
pub mod file;
#[cfg(feature = "microphone")]
pub mod microphone;
mod paced;
pub mod session;
pub mod tone;

pub use crate::config::CaptureConfig;
pub use backend::{
    AudioFrame, AudioInput, AudioInputFactory, AudioSource, CaptureError, InputStream, MediaTrack,
    StreamFormat,
};
pub use encoder::{AudioClip, ChunkEncoder, ClipInfo, RecordingBuffer, CLIP_MIME_TYPE};
pub use file::{AudioFile, FileInput};
pub use session::{CaptureSession, FlushCallback, SessionState};
pub use tone::ToneInput;
