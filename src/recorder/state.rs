use serde::Serialize;

use crate::capture::AudioClip;

/// Snapshot of the recorder as seen by callers
///
/// Published whole through a watch channel on every transition.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderState {
    /// Whether a capture session is active
    pub is_recording: bool,

    /// Finished clip of the last completed recording
    pub audio_result: Option<AudioClip>,

    /// Human-readable description of the last failure
    pub error: Option<String>,

    /// Elapsed time of the current recording, 0 when idle
    pub elapsed_ms: u64,
}
