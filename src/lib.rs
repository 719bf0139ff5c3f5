pub mod analysis;
pub mod capture;
pub mod config;
pub mod http;
pub mod recorder;

pub use analysis::{AnalysisFeed, WaveformSnapshot};
pub use capture::{
    AudioClip, AudioFrame, AudioInput, AudioInputFactory, AudioSource, CaptureError,
    CaptureSession, InputStream, MediaTrack,
};
pub use config::Config;
pub use http::{create_router, AppState, UploadTicket, UploadUrlIssuer};
pub use recorder::{format_elapsed, ClipRecorder, RecorderOptions, RecorderState};
