use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{Result, XsyncError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve line-delimited JSON requests on stdin/stdout
    Serve,

    /// Extract every subtitle track from a media file
    Extract {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        /// Directory the extracted tracks are written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Extract subtitle streams from an HTTP(S) stream URL
    ExtractUrl {
        /// Stream or playlist URL, read by the engine directly
        #[arg(short, long)]
        url: String,

        /// Directory the converted SRT tracks are written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Decode audio windows to 16 kHz mono WAV
    Decode {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        /// Windows as start:duration seconds (comma-separated)
        #[arg(short, long, default_value = "0:30")]
        windows: String,

        /// Directory the WAV files are written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Check SRT files for flat or non-monotonic timelines
    Assess {
        /// SRT files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Load the media engine and report which strategy succeeded
    Probe,

    /// Write the default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "xsync.toml")]
        output: PathBuf,
    },
}

/// Parse `start:duration` pairs such as `0:30,30:30`. A bare number is a start.
pub fn parse_windows(windows: &str) -> Result<Vec<(f64, Option<f64>)>> {
    windows
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (start, duration) = match part.split_once(':') {
                Some((start, duration)) => (start, Some(duration)),
                None => (part, None),
            };
            let number = |s: &str| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| XsyncError::Config(format!("Invalid window '{}'", part)))
            };
            Ok((number(start)?, duration.map(number).transpose()?))
        })
        .collect()
}
