use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use voice_clip::{
    format_elapsed, AnalysisFeed, AudioInputFactory, AudioSource, ClipRecorder, Config,
    RecorderOptions,
};

const METER_WIDTH: usize = 30;

#[derive(Parser)]
#[command(name = "voice-clip")]
#[command(about = "Record bounded voice clips and issue upload URLs")]
struct Cli {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/voice-clip")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one clip and write it as WAV
    Record {
        /// Input: mic, tone, tone:<hz> or file:<path>
        #[arg(short, long, default_value = "mic")]
        source: AudioSource,

        /// Override the configured maximum duration
        #[arg(short, long)]
        max_duration_ms: Option<u64>,

        /// Output file
        #[arg(short, long, default_value = "clip.wav")]
        out: PathBuf,
    },
    /// Serve the upload URL endpoint
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Record {
            source,
            max_duration_ms,
            out,
        } => {
            if let Some(ms) = max_duration_ms {
                cfg.recorder.max_duration_ms = ms;
                cfg.validate()?;
            }
            record(cfg, source, out).await
        }
        Command::Serve => voice_clip::http::serve(&cfg.upload).await,
    }
}

async fn record(cfg: Config, source: AudioSource, out: PathBuf) -> Result<()> {
    let input = AudioInputFactory::create(source)?;
    info!("Audio input: {}", input.name());

    let recorder = ClipRecorder::new(
        Arc::from(input),
        RecorderOptions {
            recorder: cfg.recorder.clone(),
            capture: cfg.capture.clone(),
            on_progress: None,
        },
    );
    let feed = AnalysisFeed::spawn(recorder.clone(), cfg.analysis.clone());

    let mut states = recorder.subscribe();
    let mut snapshots = feed.subscribe();

    recorder.start().await;

    let state = states.borrow_and_update().clone();
    if let Some(err) = state.error {
        bail!("Could not start recording: {}", err);
    }

    info!(
        "Recording (limit {}). Press Ctrl+C to stop",
        format_elapsed(cfg.recorder.max_duration_ms)
    );

    let mut elapsed_ms = 0;
    let mut level = 0.0;
    let mut stopping = false;

    let clip = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                eprintln!();
                info!("Stopping recording...");
                stopping = true;
                recorder.stop();
            }

            changed = states.changed() => {
                changed.context("Recorder dropped")?;
                let state = states.borrow_and_update().clone();

                if let Some(clip) = state.audio_result {
                    break clip;
                }

                if state.is_recording {
                    if let (Some(err), false) = (&state.error, stopping) {
                        // e.g. a file source ran out; keep what was captured
                        warn!("{}; stopping", err);
                        stopping = true;
                        recorder.stop();
                    }
                    elapsed_ms = state.elapsed_ms;
                    draw_status(elapsed_ms, level);
                } else if !recorder.is_finalizing() {
                    // The flush has settled, so the latest state holds its outcome
                    let settled = recorder.state();
                    if let Some(clip) = settled.audio_result {
                        break clip;
                    }
                    bail!(
                        "Recording failed: {}",
                        settled.error.as_deref().unwrap_or("no audio was captured")
                    );
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    continue;
                }
                level = snapshots.borrow_and_update().level;
                draw_status(elapsed_ms, level);
            }
        }
    };
    eprintln!();

    clip.write_to(&out)?;

    info!("Recording complete!");
    info!("  File: {}", out.display());
    info!("  Duration: {:.1}s", clip.duration_ms() as f64 / 1000.0);
    info!("  Size: {} bytes ({})", clip.len(), clip.mime_type());

    Ok(())
}

fn draw_status(elapsed_ms: u64, level: f32) {
    let filled = ((level * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);
    eprint!(
        "\r{} [{}{}]",
        format_elapsed(elapsed_ms),
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled)
    );
    let _ = std::io::stderr().flush();
}
