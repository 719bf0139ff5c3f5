//! Recorder lifecycle management
//!
//! `ClipRecorder` coordinates one capture session and one duration clock per
//! recording, enforces the maximum duration, and publishes `RecorderState`
//! snapshots for UI surfaces.

mod clock;
mod manager;
mod state;
mod timer;

pub use clock::{ClockTick, DurationClock};
pub use manager::{ClipRecorder, ProgressCallback, RecorderOptions, StreamTap};
pub use state::RecorderState;
pub use timer::format_elapsed;
