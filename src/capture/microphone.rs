//! Microphone input using cpal
//!
//! cpal streams are not `Send`, so each acquisition gets a dedicated thread
//! that builds, plays and finally drops the stream. Stopping the track wakes
//! that thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info};

use super::backend::{AudioFrame, AudioInput, CaptureError, InputStream, MediaTrack, StreamFormat};
use crate::config::CaptureConfig;

/// Default input device of the default host
pub struct MicrophoneInput;

impl MicrophoneInput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MicrophoneInput {
    fn default() -> Self {
        Self::new()
    }
}

struct DeviceTrack {
    label: String,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    live: Arc<AtomicBool>,
}

impl MediaTrack for DeviceTrack {
    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        let sender = match self.stop_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            // The capture thread may already be gone after a device error
            let _ = tx.send(());
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

type Opened = (Stream, StreamFormat, String);

fn open_default_stream(
    frames: broadcast::Sender<AudioFrame>,
    mono: bool,
    live: Arc<AtomicBool>,
) -> Result<Opened, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    let label = device.name().unwrap_or_else(|_| "default input".to_string());

    let supported = device
        .default_input_config()
        .map_err(|_| CaptureError::UnsupportedFormat)?;

    info!(
        "Using audio input device: {} ({} Hz, {} channels, {:?})",
        label,
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: if mono { 1 } else { config.channels },
    };

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, format, frames, live),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, format, frames, live),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, format, frames, live),
        _ => Err(CaptureError::UnsupportedFormat),
    }?;

    Ok((stream, format, label))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: StreamFormat,
    frames: broadcast::Sender<AudioFrame>,
    live: Arc<AtomicBool>,
) -> Result<Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let device_channels = config.channels as usize;
    let started = Instant::now();
    let error_live = Arc::clone(&live);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !live.load(Ordering::SeqCst) {
                    return;
                }

                let samples: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
                let samples = if format.channels == 1 && device_channels > 1 {
                    downmix_to_mono(&samples, device_channels)
                } else {
                    samples
                };

                let _ = frames.send(AudioFrame {
                    samples,
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                });
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_live.store(false, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoInputDevice,
            cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::UnsupportedFormat,
            other => CaptureError::Stream(other.to_string()),
        })
}

/// Average interleaved channels into one
fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

#[async_trait::async_trait]
impl AudioInput for MicrophoneInput {
    async fn acquire(&self, config: &CaptureConfig) -> Result<InputStream, CaptureError> {
        let (frames_tx, frames_rx) = InputStream::channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(StreamFormat, String), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let live = Arc::new(AtomicBool::new(true));
        let thread_live = Arc::clone(&live);
        let mono = config.channels == 1;

        std::thread::Builder::new()
            .name("voice-clip-mic".to_string())
            .spawn(move || {
                let (stream, format, label) =
                    match open_default_stream(frames_tx, mono, Arc::clone(&thread_live)) {
                        Ok(opened) => opened,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
                    return;
                }

                if ready_tx.send(Ok((format, label))).is_err() {
                    // Acquisition was abandoned; drop the stream right away
                    return;
                }

                // Blocks until the track is stopped or its handle dropped
                let _ = stop_rx.recv();
                thread_live.store(false, Ordering::SeqCst);
                drop(stream);
                info!("Microphone stream closed");
            })
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let (format, label) = ready_rx
            .await
            .map_err(|_| CaptureError::Stream("capture thread exited".to_string()))??;

        let track = Arc::new(DeviceTrack {
            label,
            stop_tx: Mutex::new(Some(stop_tx)),
            live,
        });

        Ok(InputStream::new(format, frames_rx, vec![track]))
    }

    fn name(&self) -> &str {
        "microphone"
    }
}
