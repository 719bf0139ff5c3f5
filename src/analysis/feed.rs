use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::waveform::{LevelSmoother, SampleRing, WaveformSnapshot};
use crate::config::AnalysisConfig;
use crate::recorder::ClipRecorder;

/// Sender side of the snapshot channel; `None` once the feed is shut down
type Publisher = Arc<Mutex<Option<watch::Sender<WaveformSnapshot>>>>;

/// Live waveform data source
///
/// Follows the recorder's `is_recording` flag: while recording it reads the
/// capture stream through [`ClipRecorder::tap`] and publishes a fresh
/// [`WaveformSnapshot`] every refresh interval. It never holds the stream
/// open on its own and never releases it.
pub struct AnalysisFeed {
    snapshots: watch::Receiver<WaveformSnapshot>,
    publisher: Publisher,
    task: Option<JoinHandle<()>>,
}

impl AnalysisFeed {
    pub fn spawn(recorder: ClipRecorder, config: AnalysisConfig) -> Self {
        let bins = config.bin_count();
        let (tx, snapshots) = watch::channel(WaveformSnapshot::idle(bins, 0));
        let publisher: Publisher = Arc::new(Mutex::new(Some(tx)));

        let task = tokio::spawn(run_feed(recorder, config, Arc::clone(&publisher)));

        Self {
            snapshots,
            publisher,
            task: Some(task),
        }
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> WaveformSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WaveformSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the refresh loop. Once this returns no snapshot is published again.
    pub fn shutdown(&mut self) {
        let detached = self
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if detached.is_some() {
            info!("Waveform feed shut down");
        }
    }
}

impl Drop for AnalysisFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Replace the current snapshot; false once the feed has been shut down
fn publish(publisher: &Publisher, snapshot: WaveformSnapshot) -> bool {
    match &*publisher.lock().unwrap_or_else(PoisonError::into_inner) {
        Some(tx) => {
            tx.send_replace(snapshot);
            true
        }
        None => false,
    }
}

async fn run_feed(recorder: ClipRecorder, config: AnalysisConfig, publisher: Publisher) {
    let bins = config.bin_count();
    let mut state_rx = recorder.subscribe();
    let mut ring = SampleRing::new(config.fft_size);
    let mut smoother = LevelSmoother::new();
    let mut sequence = 0u64;

    debug!("Waveform feed started ({} bins)", bins);

    loop {
        if state_rx.wait_for(|state| state.is_recording).await.is_err() {
            break;
        }

        let Some(tap) = recorder.tap() else {
            // Recording ended between the flag change and the tap
            if state_rx.wait_for(|state| !state.is_recording).await.is_err() {
                break;
            }
            continue;
        };
        let mut frames = tap.frames;
        let mut frames_open = true;

        let mut refresh = interval(config.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Waveform feed following session {}", tap.session_id);

        loop {
            tokio::select! {
                biased;

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !state_rx.borrow_and_update().is_recording {
                        break;
                    }
                    if recorder.active_session_id() != Some(tap.session_id) {
                        // A newer recording started; re-tap
                        break;
                    }
                }

                frame = frames.recv(), if frames_open => match frame {
                    Ok(frame) => ring.push_frame(&frame),
                    Err(RecvError::Lagged(n)) => debug!("Waveform feed skipped {} frames", n),
                    Err(RecvError::Closed) => {
                        frames_open = false;
                        if recorder.active_session_id() == Some(tap.session_id) {
                            recorder.report_error("Audio input stream ended unexpectedly");
                        }
                    }
                },

                _ = refresh.tick() => {
                    sequence += 1;
                    let snapshot = WaveformSnapshot {
                        time_domain: ring.time_domain(bins),
                        level: smoother.apply(ring.rms()),
                        sequence,
                    };
                    if !publish(&publisher, snapshot) {
                        return;
                    }
                }
            }
        }

        ring.clear();
        smoother.reset();
        sequence += 1;
        if !publish(&publisher, WaveformSnapshot::idle(bins, sequence)) {
            return;
        }

        debug!("Waveform feed idle");
    }

    debug!("Waveform feed stopped: recorder dropped");
}
