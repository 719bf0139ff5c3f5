// Task-driven tracks that publish frames at real-time pace.
//
// Used by the inputs that have no device clock of their own (tone, file
// replay). Stopping the track aborts the task, which drops its sender.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use super::backend::{AudioFrame, MediaTrack, StreamFormat};

pub(crate) struct PacedTrack {
    label: String,
    live: Arc<AtomicBool>,
    task: AbortHandle,
}

impl MediaTrack for PacedTrack {
    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Track {} stopped", self.label);
        }
        self.task.abort();
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Spawn a track that asks `next` for one frame of samples every `frame_duration`.
///
/// `next` returns `None` once the source is exhausted; the track then ends on its own.
pub(crate) fn spawn_paced_track<F>(
    label: String,
    frames: broadcast::Sender<AudioFrame>,
    format: StreamFormat,
    frame_duration: Duration,
    mut next: F,
) -> Arc<PacedTrack>
where
    F: FnMut() -> Option<Vec<i16>> + Send + 'static,
{
    let live = Arc::new(AtomicBool::new(true));
    let task_live = Arc::clone(&live);
    let task_label = label.clone();

    let task = tokio::spawn(async move {
        let started = Instant::now();
        let mut tick = interval_at(started + frame_duration, frame_duration);

        loop {
            tick.tick().await;

            let Some(samples) = next() else {
                break;
            };

            let frame = AudioFrame {
                samples,
                sample_rate: format.sample_rate,
                channels: format.channels,
                timestamp_ms: started.elapsed().as_millis() as u64,
            };

            // No subscribers yet is not an error
            let _ = frames.send(frame);
        }

        task_live.store(false, Ordering::SeqCst);
        debug!("Track {} reached end of source", task_label);
    });

    Arc::new(PacedTrack {
        label,
        live,
        task: task.abort_handle(),
    })
}
