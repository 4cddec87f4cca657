use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::error::{Result, XsyncError};

// Default values kept as functions so partial config files stay valid
fn default_chunk_size() -> usize {
    512 * 1024
}

fn default_inline_threshold() -> usize {
    // approx 2.5 MiB before chunking
    5 * 512 * 1024
}

fn default_session_ttl_secs() -> u64 {
    5 * 60
}

fn default_max_message_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub demux: DemuxConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of each outbound chunk in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Payloads larger than this are chunked instead of sent inline
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
    /// Lifetime of an idle reassembly session
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Largest single message accepted from the channel
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the ffmpeg binary
    pub binary_path: String,
    /// Try the bare in-process strategy before any worker strategy
    pub force_bare: bool,
    /// Override shared-memory capability detection (None = detect)
    pub shared_memory: Option<bool>,
    /// Worker script inspected by the placeholder pre-check
    pub worker_script: Option<String>,
    /// Enable the placeholder pre-check
    #[serde(default = "default_true")]
    pub placeholder_check: bool,
    /// Bootstrap timeout for the multi-thread worker strategy
    pub multi_thread_timeout_secs: u64,
    /// Bootstrap timeout for the single-thread worker strategy
    pub single_thread_timeout_secs: u64,
    /// Bootstrap timeout for the bare direct strategy
    pub bare_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Value passed to -analyzeduration
    pub analyze_duration: String,
    /// Value passed to -probesize
    pub probe_size: String,
    /// Upper bound on subtitle streams probed per input
    pub max_streams: usize,
    /// Budget for a single engine command
    pub attempt_timeout_secs: u64,
    /// Budget for a whole extract job
    pub job_timeout_secs: u64,
    /// Budget for a whole audio decode job
    pub decode_timeout_secs: u64,
    /// Budget for a whole stream URL extract job (fetch included)
    pub url_timeout_secs: u64,
    /// Emit stream copies that could not be converted to text as binary tracks
    #[serde(default = "default_true")]
    pub include_binary_copies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Minimum parsed cues before the flat-start check applies
    pub min_cues: usize,
    /// Distinct/total start ratio at or below which a track counts as flat
    pub flat_ratio: f64,
    /// Tolerance for backwards steps between consecutive cue starts (seconds)
    pub epsilon_secs: f64,
}

/// Per-request log lines written back on the message channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay log lines for in-flight requests to the caller
    pub enabled: bool,
    /// Relay info-level progress too; otherwise only warnings and errors
    pub verbose: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            inline_threshold: default_inline_threshold(),
            session_ttl_secs: default_session_ttl_secs(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            force_bare: false,
            shared_memory: None,
            worker_script: None,
            placeholder_check: true,
            multi_thread_timeout_secs: 120,
            single_thread_timeout_secs: 45,
            bare_timeout_secs: 45,
        }
    }
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            analyze_duration: "60M".to_string(),
            probe_size: "60M".to_string(),
            max_streams: 32,
            attempt_timeout_secs: 60,
            job_timeout_secs: 90,
            decode_timeout_secs: 180,
            url_timeout_secs: 180,
            include_binary_copies: true,
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            min_cues: 6,
            flat_ratio: 0.2,
            epsilon_secs: 1e-3,
        }
    }
}

impl TransferConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl DemuxConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.url_timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| XsyncError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| XsyncError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| XsyncError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| XsyncError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values that would make the transfer or validator layers misbehave
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(XsyncError::Config("transfer.chunk_size must be positive".to_string()));
        }
        if self.transfer.chunk_size > self.transfer.max_message_bytes {
            return Err(XsyncError::Config(format!(
                "transfer.chunk_size ({}) exceeds transfer.max_message_bytes ({})",
                self.transfer.chunk_size, self.transfer.max_message_bytes
            )));
        }
        if !(0.0..=1.0).contains(&self.timeline.flat_ratio) {
            return Err(XsyncError::Config(format!(
                "timeline.flat_ratio must be within 0..=1, got {}",
                self.timeline.flat_ratio
            )));
        }
        if self.demux.max_streams == 0 {
            return Err(XsyncError::Config("demux.max_streams must be positive".to_string()));
        }
        Ok(())
    }
}
