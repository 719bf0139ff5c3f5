use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `VOICE_CLIP__RECORDER__MAX_DURATION_MS=30000`
const ENV_PREFIX: &str = "VOICE_CLIP";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub upload: UploadConfig,
}

/// Lifecycle manager settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Hard limit for a single clip (default: 60s)
    pub max_duration_ms: u64,
    /// Chunk emission and duration tick cadence
    pub chunk_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: 60_000,
            chunk_interval_ms: 100,
        }
    }
}

impl RecorderConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

/// Requested input stream format
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Preferred sample rate in Hz (inputs may deliver their native rate)
    pub sample_rate: u32,
    /// 1 = mono, 2 = stereo
    pub channels: u16,
    /// Frame size delivered by the input, in milliseconds
    pub buffer_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            buffer_duration_ms: 20,
        }
    }
}

impl CaptureConfig {
    /// Interleaved samples per delivered frame
    pub fn samples_per_frame(&self) -> usize {
        let frames = self.sample_rate as u64 * self.buffer_duration_ms / 1000;
        (frames.max(1) as usize) * self.channels.max(1) as usize
    }
}

/// Waveform feed settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analysis window; the snapshot carries `fft_size / 2` values
    pub fft_size: usize,
    /// Display refresh cadence
    pub refresh_interval_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            refresh_interval_ms: 16,
        }
    }
}

impl AnalysisConfig {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Upload URL service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub bind: String,
    pub port: u16,
    /// Storage gateway that accepts the issued PUT URLs
    pub gateway_url: String,
    pub bucket: String,
    pub content_type: String,
    /// Object key extension, matching `content_type`
    pub extension: String,
    pub expires_secs: u64,
    /// HMAC key shared with the gateway; required to serve.
    /// Usually set through `VOICE_CLIP__UPLOAD__SIGNING_SECRET`.
    pub signing_secret: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8787,
            gateway_url: "http://localhost:9000".to_string(),
            bucket: "voice-clips".to_string(),
            content_type: "audio/wav".to_string(),
            extension: "wav".to_string(),
            expires_secs: 300,
            signing_secret: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file (any format the `config`
    /// crate recognises by extension) plus `VOICE_CLIP__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recorder.max_duration_ms == 0 {
            bail!("recorder.max_duration_ms must be greater than zero");
        }
        if self.recorder.chunk_interval_ms == 0 {
            bail!("recorder.chunk_interval_ms must be greater than zero");
        }
        if self.capture.sample_rate == 0 || self.capture.channels == 0 {
            bail!("capture.sample_rate and capture.channels must be greater than zero");
        }
        if self.capture.buffer_duration_ms == 0 {
            bail!("capture.buffer_duration_ms must be greater than zero");
        }
        let fft = self.analysis.fft_size;
        if !fft.is_power_of_two() || !(32..=32768).contains(&fft) {
            bail!(
                "analysis.fft_size must be a power of two between 32 and 32768, got {}",
                fft
            );
        }
        if self.analysis.refresh_interval_ms == 0 {
            bail!("analysis.refresh_interval_ms must be greater than zero");
        }
        if self.upload.expires_secs == 0 {
            bail!("upload.expires_secs must be greater than zero");
        }
        Ok(())
    }
}
