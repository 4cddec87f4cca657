// Media engine abstraction
//
// The engine is an opaque demux/transcode capability driven through a small
// filesystem surface plus a "run command" operation:
// - commands: argument builders for every command the crate issues
// - ffmpeg: native ffmpeg implementation backed by a private scratch directory
// - loader: strategy ladder that bootstraps and caches one shared engine
// - scratch: job-local file namespace with cleanup on every exit path

pub mod commands;
pub mod ffmpeg;
pub mod loader;
pub mod scratch;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use commands::*;
pub use ffmpeg::*;
pub use loader::*;
pub use scratch::*;

use crate::error::{Result, XsyncError};

/// How the engine instance executes commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Supervised child process using every available core
    WorkerMultiThread,
    /// Supervised child process pinned to one thread
    WorkerSingleThread,
    /// Blocking invocation on the caller's side, single thread
    BareDirect,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::WorkerMultiThread => "worker-multi-thread",
            EngineMode::WorkerSingleThread => "worker-single-thread",
            EngineMode::BareDirect => "bare-direct",
        }
    }

    pub fn is_worker(&self) -> bool {
        !matches!(self, EngineMode::BareDirect)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal surface every engine exposes: a flat virtual filesystem and a command runner
#[async_trait]
pub trait Engine: Send + Sync {
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    fn remove_file(&self, name: &str) -> Result<()>;

    fn list_files(&self) -> Result<Vec<String>>;

    /// Run one command. Relative file names resolve inside the virtual filesystem.
    async fn run(&self, args: Vec<String>) -> Result<()>;
}

/// The single shared engine instance.
///
/// Cloning is cheap; every clone drives the same engine. Commands from all holders
/// are serialized because the engine's command surface is not reentrant.
#[derive(Clone)]
pub struct EngineHandle {
    mode: EngineMode,
    engine: Arc<dyn Engine>,
    turn: Arc<Mutex<()>>,
}

impl EngineHandle {
    pub fn new(mode: EngineMode, engine: Arc<dyn Engine>) -> Self {
        Self {
            mode,
            engine,
            turn: Arc::new(Mutex::new(())),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    /// Run `command`, waiting at most `timeout` for it (queueing included).
    ///
    /// On timeout the command is abandoned, not cancelled: it keeps its turn on the
    /// engine until it finishes and its outcome is dropped.
    pub async fn run(&self, command: EngineCommand, timeout: Duration) -> Result<()> {
        self.submit(command, timeout, None).await
    }

    /// Like [`run`](Self::run), for a command writing into `scratch`.
    ///
    /// If the job has dropped its scratch by the time the command's turn comes, the
    /// command is skipped; if it is dropped while the command runs, whatever the
    /// command wrote under the job prefix is swept afterwards.
    pub async fn run_in(&self, scratch: &JobScratch, command: EngineCommand, timeout: Duration) -> Result<()> {
        self.submit(command, timeout, Some(scratch.lease())).await
    }

    async fn submit(&self, command: EngineCommand, timeout: Duration, lease: Option<ScratchLease>) -> Result<()> {
        let engine = self.engine.clone();
        let turn = self.turn.clone();
        let description = command.description.clone();
        debug!("Queueing engine command: {} {:?}", description, command.args);

        let task = tokio::spawn(async move {
            let _turn = turn.lock_owned().await;
            if lease.as_ref().is_some_and(ScratchLease::is_released) {
                debug!("Skipping {}: job already finished", command.description);
                return Err(XsyncError::Engine(format!("{} skipped: job already finished", command.description)));
            }
            let result = engine.run(command.args).await;
            if let Some(lease) = lease.filter(ScratchLease::is_released) {
                lease.sweep(engine.as_ref());
            }
            result
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(XsyncError::Engine(format!(
                "{} aborted: {}",
                description, join_err
            ))),
            Err(_) => {
                warn!("{} exceeded {:?}; abandoning (late result will be ignored)", description, timeout);
                Err(XsyncError::timeout(description, timeout))
            }
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").field("mode", &self.mode).finish()
    }
}
