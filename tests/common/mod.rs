// Test doubles for audio inputs
//
// FakeInput hands out streams whose frames are pushed by the test and whose
// tracks count how often they were stopped.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use voice_clip::capture::{
    AudioFrame, AudioInput, CaptureConfig, CaptureError, InputStream, MediaTrack, StreamFormat,
};

pub const SAMPLE_RATE: u32 = 16_000;

pub fn format() -> StreamFormat {
    StreamFormat {
        sample_rate: SAMPLE_RATE,
        channels: 1,
    }
}

pub fn frame(samples: Vec<i16>) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: SAMPLE_RATE,
        channels: 1,
        timestamp_ms: 0,
    }
}

/// Track that owns the frame sender; stopping it closes the stream
pub struct FakeTrack {
    stops: AtomicUsize,
    live: AtomicBool,
    sender: Mutex<Option<broadcast::Sender<AudioFrame>>>,
}

impl FakeTrack {
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Deliver a frame; false once the track has been stopped
    pub fn push(&self, frame: AudioFrame) -> bool {
        match &*self.sender.lock().unwrap() {
            Some(tx) => {
                let _ = tx.send(frame);
                true
            }
            None => false,
        }
    }

    /// End the source without a stop request
    pub fn end(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }
}

impl MediaTrack for FakeTrack {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.end();
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn label(&self) -> &str {
        "fake"
    }
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Grant,
    Deny,
    /// The first acquisition never completes; later ones are granted
    HangOnce,
}

pub struct FakeInput {
    behavior: Behavior,
    acquisitions: AtomicUsize,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeInput {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            acquisitions: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Tracks handed out so far, oldest first
    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn last_track(&self) -> Arc<FakeTrack> {
        self.tracks().last().cloned().expect("no stream acquired")
    }

    fn grant(&self) -> InputStream {
        let (tx, rx) = InputStream::channel();
        let track = Arc::new(FakeTrack {
            stops: AtomicUsize::new(0),
            live: AtomicBool::new(true),
            sender: Mutex::new(Some(tx)),
        });
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        InputStream::new(format(), rx, vec![track])
    }
}

#[async_trait::async_trait]
impl AudioInput for FakeInput {
    async fn acquire(&self, _config: &CaptureConfig) -> Result<InputStream, CaptureError> {
        let attempt = self.acquisitions.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Grant => Ok(self.grant()),
            Behavior::Deny => Err(CaptureError::PermissionDenied),
            Behavior::HangOnce if attempt == 0 => std::future::pending().await,
            Behavior::HangOnce => Ok(self.grant()),
        }
    }

    fn name(&self) -> &str {
        "fake input"
    }
}
