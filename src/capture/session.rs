use anyhow::{bail, Result};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{AudioFrame, InputStream, StreamFormat};
use super::encoder::{AudioClip, ChunkEncoder, RecordingBuffer};

/// Invoked once by the encoder task after its final chunk has been flushed
pub type FlushCallback = Box<dyn FnOnce(Result<AudioClip>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

/// One acquired input stream plus the encoder consuming it
///
/// The stream's tracks are released when the session stops, or when it is
/// dropped in any state.
pub struct CaptureSession {
    id: Uuid,
    state: SessionState,
    stream: Option<InputStream>,
    encoder_stop: Option<oneshot::Sender<()>>,
}

impl CaptureSession {
    pub fn new(stream: InputStream) -> Self {
        Self {
            id: stream.id(),
            state: SessionState::Idle,
            stream: Some(stream),
            encoder_stop: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames of the live stream, while active
    pub fn tap(&self) -> Option<broadcast::Receiver<AudioFrame>> {
        match (&self.state, &self.stream) {
            (SessionState::Active, Some(stream)) => Some(stream.subscribe()),
            _ => None,
        }
    }

    /// Begin chunk emission every `chunk_interval` into a fresh buffer
    pub fn start(&mut self, chunk_interval: Duration, on_flush: FlushCallback) -> Result<()> {
        if self.state != SessionState::Idle {
            bail!("Capture session {} already started", self.id);
        }
        let Some(stream) = &self.stream else {
            bail!("Capture session {} has no stream", self.id);
        };

        let frames = stream.subscribe();
        let format = stream.format();
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(run_encoder(frames, stop_rx, format, chunk_interval, on_flush));

        self.encoder_stop = Some(stop_tx);
        self.state = SessionState::Active;
        info!(
            "Capture session {} active ({}Hz, {} channels, {}ms chunks)",
            self.id,
            format.sample_rate,
            format.channels,
            chunk_interval.as_millis()
        );

        Ok(())
    }

    /// Halt chunk emission and release the stream. No-op unless active.
    pub fn stop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        self.state = SessionState::Stopped;

        if let Some(stop) = self.encoder_stop.take() {
            // The encoder flushes on either a signal or a dropped sender
            let _ = stop.send(());
        }
        if let Some(stream) = self.stream.take() {
            stream.release();
        }

        info!("Capture session {} stopped", self.id);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
        if let Some(stream) = self.stream.take() {
            debug!("Releasing stream of unstarted capture session {}", self.id);
            stream.release();
        }
    }
}

async fn run_encoder(
    mut frames: broadcast::Receiver<AudioFrame>,
    mut stop_rx: oneshot::Receiver<()>,
    format: StreamFormat,
    chunk_interval: Duration,
    on_flush: FlushCallback,
) {
    let mut encoder = ChunkEncoder::new(format);
    let mut buffer = RecordingBuffer::new();
    let mut tick = interval_at(Instant::now() + chunk_interval, chunk_interval);
    let mut frames_open = true;

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break,

            frame = frames.recv(), if frames_open => match frame {
                Ok(frame) => encoder.push_frame(&frame),
                Err(RecvError::Lagged(n)) => warn!("Encoder lagged behind input, {} frames lost", n),
                Err(RecvError::Closed) => {
                    warn!("Input stream ended before the recording was stopped");
                    frames_open = false;
                }
            },

            _ = tick.tick() => {
                if let Some(chunk) = encoder.take_chunk() {
                    buffer.push(chunk);
                }
            }
        }
    }

    // Frames delivered before the tracks stopped still belong to the clip
    loop {
        match frames.try_recv() {
            Ok(frame) => encoder.push_frame(&frame),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    if let Some(chunk) = encoder.take_chunk() {
        buffer.push(chunk);
    }

    debug!(
        "Encoder flushed: {} chunks, {} bytes",
        buffer.len(),
        buffer.total_bytes()
    );

    on_flush(encoder.finish(buffer));
}
