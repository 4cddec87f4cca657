//! xsync - subtitle extraction and audio decode service
//!
//! Runs the chunked-transfer message service on stdio, or drives the same
//! demux and decode pipelines directly from the command line.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xsync::cli::{parse_windows, Args, Commands};
use xsync::config::Config;
use xsync::decode::{AudioDecoder, AudioWindow};
use xsync::demux::DemuxOrchestrator;
use xsync::engine::{EngineLoader, FfmpegBootstrap};
use xsync::service::Service;
use xsync::timeline::{cue_starts_ms, format_srt_time, TimelineValidator};
use xsync::relay::RelayLayer;
use xsync::track::{Track, TrackPayload};

const DEFAULT_CONFIG: &str = "xsync.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG);
                Config::from_file(DEFAULT_CONFIG)?
            } else {
                Config::default()
            }
        }
    };

    let loader = Arc::new(EngineLoader::new(
        config.engine.clone(),
        Arc::new(FfmpegBootstrap::new(config.engine.clone())),
    ));

    match args.command {
        Commands::Serve => {
            let service = Arc::new(Service::new(config, loader));
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            service.serve(stdin, tokio::io::stdout()).await?;
            info!("Input closed, shutting down");
        }
        Commands::Extract { input, output_dir } => {
            let media = std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let validator = TimelineValidator::from_config(&config.timeline);
            let orchestrator = DemuxOrchestrator::new(loader, validator, config.demux.clone());
            let tracks = orchestrator.extract(&job_name(&input), media).await?;
            write_tracks(&tracks, &output_dir)?;
        }
        Commands::ExtractUrl { url, output_dir } => {
            let validator = TimelineValidator::from_config(&config.timeline);
            let orchestrator = DemuxOrchestrator::new(loader, validator, config.demux.clone());
            let tracks = orchestrator.extract_url("stream", &url).await?;
            write_tracks(&tracks, &output_dir)?;
        }
        Commands::Decode { input, windows, output_dir } => {
            let media = std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let windows: Vec<AudioWindow> = parse_windows(&windows)?
                .into_iter()
                .map(|(start, duration)| AudioWindow {
                    input: media.clone(),
                    start_sec: Some(start),
                    dur_sec: duration,
                    seek_to_sec: Some(start),
                })
                .collect();

            let decoder = AudioDecoder::new(loader, config.demux.clone());
            let decoded = decoder.decode_windows(&job_name(&input), windows).await?;

            std::fs::create_dir_all(&output_dir)?;
            for (i, window) in decoded.iter().enumerate() {
                let path = output_dir.join(format!("window_{:02}.wav", i + 1));
                std::fs::write(&path, &window.audio)?;
                println!("{} (starts at {}ms, {} bytes)", path.display(), window.start_ms, window.audio.len());
            }
        }
        Commands::Assess { files } => {
            let validator = TimelineValidator::from_config(&config.timeline);
            let mut implausible = 0;
            for file in &files {
                let text = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let starts = cue_starts_ms(&text);
                let assessment = validator.assess_text(&text);
                let span = match (starts.first(), starts.last()) {
                    (Some(first), Some(last)) => format!(
                        "{} .. {}",
                        format_srt_time(*first as f64 / 1000.0),
                        format_srt_time(*last as f64 / 1000.0)
                    ),
                    _ => "-".to_string(),
                };
                println!(
                    "{}: {} cue(s) [{}] flat={} non_monotonic={}",
                    file.display(),
                    starts.len(),
                    span,
                    assessment.flat_cue_starts,
                    assessment.non_monotonic_cues
                );
                if !assessment.is_plausible() {
                    implausible += 1;
                }
            }
            if implausible > 0 {
                anyhow::bail!("{} of {} file(s) have an implausible timeline", implausible, files.len());
            }
        }
        Commands::Probe => {
            match loader.acquire().await {
                Ok(handle) => println!("Engine ready: {}", handle.mode()),
                Err(e) => {
                    for failure in loader.failures() {
                        println!("{:<22} failed: {}", failure.mode.as_str(), failure.reason);
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Default configuration written to {}", output.display());
        }
    }

    Ok(())
}

fn job_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "cli".to_string())
}

fn write_tracks(tracks: &[Track], output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    for track in tracks {
        let path = output_dir.join(&track.label);
        match &track.payload {
            TrackPayload::Content(text) => std::fs::write(&path, text)?,
            TrackPayload::ContentBase64(bytes) => std::fs::write(&path, bytes)?,
            TrackPayload::TransferId(id) => {
                warn!("Track {} is an outbound transfer ({}), skipping", track.label, id);
                continue;
            }
        }
        println!("{:<28} {:<6} {:>10} bytes", track.label, codec_name(track.binary), track.byte_length);
    }
    info!("Extracted {} track(s) to {}", tracks.len(), output_dir.display());
    Ok(())
}

fn codec_name(binary: bool) -> &'static str {
    if binary { "copy" } else { "srt" }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir: PathBuf = std::env::current_dir()?.join(".xsync").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "xsync.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout carries protocol replies, so the console layer writes to stderr
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .with(RelayLayer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
