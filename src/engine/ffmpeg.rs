use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Result, XsyncError};
use super::{Engine, EngineBootstrap, EngineMode};

/// Native ffmpeg engine. Its virtual filesystem is a private scratch directory that
/// lives as long as the engine.
pub struct FfmpegEngine {
    binary_path: String,
    mode: EngineMode,
    workdir: TempDir,
}

impl FfmpegEngine {
    pub fn new<S: Into<String>>(binary_path: S, mode: EngineMode) -> Result<Self> {
        let workdir = tempfile::Builder::new().prefix("xsync-engine-").tempdir()?;
        Ok(Self {
            binary_path: binary_path.into(),
            mode,
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Check the binary responds and return its version line
    pub async fn probe(&self) -> Result<String> {
        let output = self.execute(vec!["-version".to_string()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(XsyncError::EngineLoad(format!("ffmpeg version check failed: {}", stderr.trim())));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("Unknown version").to_string())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let flat = relative.components().count() == 1
            && matches!(relative.components().next(), Some(Component::Normal(_)));
        if !flat {
            return Err(XsyncError::Engine(format!("Invalid engine file name: {}", name)));
        }
        Ok(self.workdir.path().join(relative))
    }

    fn thread_args(&self) -> [&'static str; 2] {
        match self.mode {
            EngineMode::WorkerMultiThread => ["-threads", "0"],
            EngineMode::WorkerSingleThread | EngineMode::BareDirect => ["-threads", "1"],
        }
    }

    async fn execute(&self, args: Vec<String>) -> Result<Output> {
        let binary = self.binary_path.clone();
        let workdir = self.workdir.path().to_path_buf();

        if self.mode.is_worker() {
            tokio::process::Command::new(&binary)
                .args(&args)
                .current_dir(&workdir)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| XsyncError::Engine(format!("Failed to spawn {}: {}", binary, e)))
        } else {
            tokio::task::spawn_blocking(move || {
                std::process::Command::new(&binary)
                    .args(&args)
                    .current_dir(&workdir)
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|e| XsyncError::Engine(format!("Failed to execute {}: {}", binary, e)))
            })
            .await
            .map_err(|e| XsyncError::Engine(format!("Blocking ffmpeg task failed: {}", e)))?
        }
    }
}

/// Last few stderr lines, which is where ffmpeg reports the actual failure
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(8);
    lines[start..].join("\n")
}

#[async_trait]
impl Engine for FfmpegEngine {
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        std::fs::write(self.path_for(name)?, data)?;
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path_for(name)?)?)
    }

    fn remove_file(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path_for(name)?)?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.workdir.path())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        let mut full_args: Vec<String> = ["-hide_banner", "-nostdin"]
            .iter()
            .chain(self.thread_args().iter())
            .map(|s| s.to_string())
            .collect();
        full_args.extend(args);
        debug!("Executing ffmpeg ({}): {:?}", self.mode, full_args);

        let output = self.execute(full_args).await?;
        if !output.status.success() {
            return Err(XsyncError::Engine(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(())
    }
}

/// Bootstraps native ffmpeg engines for the loader's strategies
pub struct FfmpegBootstrap {
    config: EngineConfig,
}

impl FfmpegBootstrap {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineBootstrap for FfmpegBootstrap {
    async fn bootstrap(&self, mode: EngineMode) -> Result<Arc<dyn Engine>> {
        let engine = FfmpegEngine::new(&self.config.binary_path, mode)
            .map_err(|e| XsyncError::EngineLoad(format!("Failed to create engine scratch directory: {}", e)))?;
        let version = engine.probe().await.map_err(|e| match e {
            XsyncError::EngineLoad(_) => e,
            other => XsyncError::EngineLoad(other.to_string()),
        })?;
        info!("ffmpeg ready ({}): {}", mode, version);
        Ok(Arc::new(engine))
    }
}
