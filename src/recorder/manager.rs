use anyhow::Result;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::clock::{ClockTick, DurationClock};
use super::state::RecorderState;
use crate::capture::{AudioClip, AudioFrame, AudioInput, CaptureConfig, CaptureSession, InputStream};
use crate::config::RecorderConfig;

/// Called on every duration tick with the elapsed milliseconds
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Read-only subscription to the frames of one capture session
pub struct StreamTap {
    pub session_id: Uuid,
    pub frames: broadcast::Receiver<AudioFrame>,
}

#[derive(Clone, Default)]
pub struct RecorderOptions {
    pub recorder: RecorderConfig,
    pub capture: CaptureConfig,
    pub on_progress: Option<ProgressCallback>,
}

enum Phase {
    Idle,
    Acquiring,
    Active(ActiveRecording),
    /// Stopped; waiting for the encoder's final flush
    Finalizing {
        generation: u64,
    },
}

struct ActiveRecording {
    generation: u64,
    session: CaptureSession,
    clock: DurationClock,
}

struct Shared {
    input: Arc<dyn AudioInput>,
    options: RecorderOptions,
    phase: Mutex<Phase>,
    generation: AtomicU64,
    state_tx: watch::Sender<RecorderState>,
}

/// Bounded-duration clip recorder
///
/// Owns the capture session and the duration clock of the current recording.
/// Stopping by hand and hitting the time limit run the same teardown, and the
/// finished clip is published once per recording through [`RecorderState`].
///
/// Cloning yields another handle to the same recorder.
#[derive(Clone)]
pub struct ClipRecorder {
    shared: Arc<Shared>,
}

impl ClipRecorder {
    pub fn new(input: Arc<dyn AudioInput>, options: RecorderOptions) -> Self {
        let (state_tx, _) = watch::channel(RecorderState::default());

        Self {
            shared: Arc::new(Shared {
                input,
                options,
                phase: Mutex::new(Phase::Idle),
                generation: AtomicU64::new(0),
                state_tx,
            }),
        }
    }

    /// Acquire the input and begin recording.
    ///
    /// Failures are published as `RecorderState::error`, never returned.
    /// Dropping the returned future before it completes leaves the recorder idle.
    pub async fn start(&self) {
        let shared = &self.shared;

        let generation = {
            let mut phase = shared.lock_phase();
            match &*phase {
                Phase::Idle => {}
                Phase::Acquiring => {
                    warn!("Audio acquisition already in progress");
                    return;
                }
                Phase::Active(_) => {
                    warn!("Recording already started");
                    return;
                }
                Phase::Finalizing { .. } => {
                    warn!("Previous recording is still being finalized");
                    return;
                }
            }
            *phase = Phase::Acquiring;
            shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let _guard = AcquireGuard { shared };

        info!("Requesting audio input: {}", shared.input.name());

        match shared.input.acquire(&shared.options.capture).await {
            Ok(stream) => {
                if let Err(e) = Shared::activate(shared, generation, stream) {
                    error!("Failed to start recording: {:#}", e);
                    shared.fail(format!("Failed to start recording: {}", e));
                }
            }
            Err(e) => {
                error!("Audio acquisition failed: {}", e);
                shared.fail(e.to_string());
            }
        }
    }

    /// Stop the current recording. No-op unless recording.
    pub fn stop(&self) {
        if !self.shared.teardown(None) {
            debug!("Stop requested while not recording");
        }
    }

    /// Current snapshot
    pub fn state(&self) -> RecorderState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state_tx.borrow().is_recording
    }

    pub fn subscribe(&self) -> watch::Receiver<RecorderState> {
        self.shared.state_tx.subscribe()
    }

    /// Read-only frames of the live stream, while recording
    pub fn tap(&self) -> Option<StreamTap> {
        match &*self.shared.lock_phase() {
            Phase::Active(active) => active.session.tap().map(|frames| StreamTap {
                session_id: active.session.id(),
                frames,
            }),
            _ => None,
        }
    }

    /// Capture session of the current recording
    pub fn active_session_id(&self) -> Option<Uuid> {
        match &*self.shared.lock_phase() {
            Phase::Active(active) => Some(active.session.id()),
            _ => None,
        }
    }

    /// Publish a failure from a consumer of the same stream
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("Recorder error reported: {}", message);
        self.shared
            .state_tx
            .send_modify(|state| state.error = Some(message));
    }

    /// Stopped, with the final clip not yet published
    pub fn is_finalizing(&self) -> bool {
        matches!(&*self.shared.lock_phase(), Phase::Finalizing { .. })
    }

    /// Whether a duration tick is currently scheduled
    pub fn clock_armed(&self) -> bool {
        matches!(&*self.shared.lock_phase(), Phase::Active(active) if active.clock.is_armed())
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.shared.options
    }
}

impl Shared {
    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, message: String) {
        let mut phase = self.lock_phase();
        if matches!(*phase, Phase::Acquiring) {
            *phase = Phase::Idle;
        }
        self.state_tx.send_modify(|state| {
            state.is_recording = false;
            state.error = Some(message);
        });
    }

    fn activate(this: &Arc<Self>, generation: u64, stream: InputStream) -> Result<()> {
        let mut session = CaptureSession::new(stream);

        let weak = Arc::downgrade(this);
        session.start(
            this.options.recorder.chunk_interval(),
            Box::new(move |result| {
                if let Some(shared) = weak.upgrade() {
                    shared.complete(generation, result);
                }
            }),
        )?;

        let mut phase = this.lock_phase();
        if !matches!(*phase, Phase::Acquiring) {
            // Dropping the session releases the stream
            warn!("Recorder left acquisition before the input was ready");
            return Ok(());
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        let clock = DurationClock::start(
            this.options.recorder.max_duration(),
            this.options.recorder.chunk_interval(),
            move |tick| match weak.upgrade() {
                Some(shared) => shared.on_tick(generation, tick),
                None => ControlFlow::Break(()),
            },
        );

        info!(
            "Recording {} started (session {}, limit {}ms)",
            generation,
            session.id(),
            this.options.recorder.max_duration_ms
        );

        *phase = Phase::Active(ActiveRecording {
            generation,
            session,
            clock,
        });

        this.state_tx.send_modify(|state| {
            state.is_recording = true;
            state.audio_result = None;
            state.error = None;
            state.elapsed_ms = 0;
        });

        Ok(())
    }

    fn on_tick(&self, generation: u64, tick: ClockTick) -> ControlFlow<()> {
        let phase = self.lock_phase();
        match &*phase {
            Phase::Active(active) if active.generation == generation => {}
            _ => {
                debug!("Discarding stale duration tick of recording {}", generation);
                return ControlFlow::Break(());
            }
        }

        if tick.limit_reached {
            drop(phase);
            info!(
                "Recording {} reached its {}ms limit",
                generation, self.options.recorder.max_duration_ms
            );
            self.teardown(Some(generation));
            return ControlFlow::Break(());
        }

        let elapsed_ms = tick.elapsed.as_millis() as u64;
        self.state_tx
            .send_modify(|state| state.elapsed_ms = elapsed_ms);
        drop(phase);

        if let Some(on_progress) = &self.options.on_progress {
            on_progress(elapsed_ms);
        }

        ControlFlow::Continue(())
    }

    /// The one exit path out of an active recording, for both stop and limit.
    ///
    /// `expected` pins the teardown to a specific recording; `None` means
    /// whichever recording is active.
    fn teardown(&self, expected: Option<u64>) -> bool {
        let mut phase = self.lock_phase();

        let generation = match &*phase {
            Phase::Active(active) if expected.map_or(true, |g| g == active.generation) => {
                active.generation
            }
            _ => return false,
        };

        let Phase::Active(mut active) =
            std::mem::replace(&mut *phase, Phase::Finalizing { generation })
        else {
            return false;
        };

        active.clock.cancel();
        active.session.stop();

        self.state_tx
            .send_modify(|state| state.is_recording = false);

        info!(
            "Recording {} stopped after {}ms",
            generation,
            active.clock.elapsed().as_millis()
        );

        true
    }

    /// Encoder flush finished: publish the clip and reset the duration together
    fn complete(&self, generation: u64, result: Result<AudioClip>) {
        let mut phase = self.lock_phase();
        match &*phase {
            Phase::Finalizing { generation: g } if *g == generation => {}
            _ => {
                warn!("Discarding flush of recording {} that is no longer finalizing", generation);
                return;
            }
        }
        *phase = Phase::Idle;

        match result {
            Ok(clip) => {
                info!("Recording {} finalized: {:?}", generation, clip);
                self.state_tx.send_modify(|state| {
                    state.is_recording = false;
                    state.audio_result = Some(clip);
                    state.elapsed_ms = 0;
                });
            }
            Err(e) => {
                error!("Failed to finalize recording {}: {:#}", generation, e);
                self.state_tx.send_modify(|state| {
                    state.is_recording = false;
                    state.error = Some(format!("Failed to finalize recording: {}", e));
                    state.elapsed_ms = 0;
                });
            }
        }
    }
}

/// Returns the recorder to idle if `start` is abandoned or fails mid-acquisition
struct AcquireGuard<'a> {
    shared: &'a Arc<Shared>,
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        let mut phase = self.shared.lock_phase();
        if matches!(*phase, Phase::Acquiring) {
            debug!("Audio acquisition abandoned");
            *phase = Phase::Idle;
        }
    }
}
