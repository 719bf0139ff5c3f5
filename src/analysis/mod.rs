//! Live waveform data feed
//!
//! A secondary consumer of the recorder's capture stream. It produces
//! amplitude snapshots for visualization and has no say over the recording.

mod feed;
pub mod waveform;

pub use feed::AnalysisFeed;
pub use waveform::{LevelSmoother, SampleRing, WaveformSnapshot};
