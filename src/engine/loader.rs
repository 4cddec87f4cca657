use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{Result, XsyncError};
use super::{Engine, EngineHandle, EngineMode};

/// Constructs one engine instance for a given mode
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineBootstrap: Send + Sync {
    async fn bootstrap(&self, mode: EngineMode) -> Result<Arc<dyn Engine>>;
}

/// Host features the strategies depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub shared_memory: bool,
}

impl HostCapabilities {
    /// Detect capabilities, honouring a configured override
    pub fn detect(config: &EngineConfig) -> Self {
        let shared_memory = config.shared_memory.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() > 1)
                .unwrap_or(false)
        });
        Self { shared_memory }
    }
}

/// One rung of the bootstrap ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub mode: EngineMode,
    pub timeout: Duration,
    pub requires_shared_memory: bool,
}

impl StrategyDescriptor {
    pub fn is_available(&self, caps: &HostCapabilities) -> bool {
        !self.requires_shared_memory || caps.shared_memory
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum LoaderState {
    Unloaded,
    Loading,
    Ready { mode: EngineMode },
}

/// A strategy that failed or timed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub mode: EngineMode,
    pub reason: String,
}

/// Optional packaging pre-check: a worker script under 1 KiB that mentions a
/// "placeholder" is a build stub, so worker strategies would only waste their timeouts.
pub fn worker_script_looks_placeholder(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => {
            let stub = bytes.len() < 1024
                && String::from_utf8_lossy(&bytes).to_lowercase().contains("placeholder");
            if stub {
                warn!("Detected placeholder worker script at {}; preferring bare engine", path.display());
            }
            stub
        }
        Err(e) => {
            debug!("Worker script {} not readable ({}); skipping placeholder check", path.display(), e);
            false
        }
    }
}

/// Resolves and caches the one shared engine instance.
///
/// `acquire` is single-flight: concurrent callers during a load wait for it and
/// receive the same handle. A failed load caches nothing.
pub struct EngineLoader {
    bootstrap: Arc<dyn EngineBootstrap>,
    config: EngineConfig,
    capabilities: HostCapabilities,
    handle: OnceCell<EngineHandle>,
    state: Mutex<LoaderState>,
    failures: Mutex<Vec<StrategyFailure>>,
}

impl EngineLoader {
    pub fn new(config: EngineConfig, bootstrap: Arc<dyn EngineBootstrap>) -> Self {
        let capabilities = HostCapabilities::detect(&config);
        Self::with_capabilities(config, bootstrap, capabilities)
    }

    pub fn with_capabilities(
        config: EngineConfig,
        bootstrap: Arc<dyn EngineBootstrap>,
        capabilities: HostCapabilities,
    ) -> Self {
        Self {
            bootstrap,
            config,
            capabilities,
            handle: OnceCell::new(),
            state: Mutex::new(LoaderState::Unloaded),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn failures(&self) -> Vec<StrategyFailure> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn loaded(&self) -> Option<EngineHandle> {
        self.handle.get().cloned()
    }

    /// Whether the bare strategy should lead the ladder
    pub fn prefers_bare(&self) -> bool {
        if self.config.force_bare {
            return true;
        }
        self.config.placeholder_check
            && self
                .config
                .worker_script
                .as_deref()
                .map(|p| worker_script_looks_placeholder(Path::new(p)))
                .unwrap_or(false)
    }

    /// Ordered strategies. Bare leads when preferred, otherwise it is the last resort.
    pub fn plan(&self, prefer_bare: bool) -> Vec<StrategyDescriptor> {
        let bare = StrategyDescriptor {
            mode: EngineMode::BareDirect,
            timeout: Duration::from_secs(self.config.bare_timeout_secs),
            requires_shared_memory: false,
        };
        let workers = [
            StrategyDescriptor {
                mode: EngineMode::WorkerMultiThread,
                timeout: Duration::from_secs(self.config.multi_thread_timeout_secs),
                requires_shared_memory: true,
            },
            StrategyDescriptor {
                mode: EngineMode::WorkerSingleThread,
                timeout: Duration::from_secs(self.config.single_thread_timeout_secs),
                requires_shared_memory: false,
            },
        ];

        let mut plan = Vec::with_capacity(3);
        if prefer_bare {
            plan.push(bare.clone());
        }
        plan.extend(workers);
        if !prefer_bare {
            plan.push(bare);
        }
        plan
    }

    pub async fn acquire(&self) -> Result<EngineHandle> {
        if let Some(handle) = self.handle.get() {
            debug!("Engine already loaded ({})", handle.mode());
            return Ok(handle.clone());
        }
        self.handle.get_or_try_init(|| self.load()).await.cloned()
    }

    async fn load(&self) -> Result<EngineHandle> {
        self.set_state(LoaderState::Loading);
        info!(
            "Engine loading... (shared memory: {})",
            if self.capabilities.shared_memory { "yes" } else { "no" }
        );

        let prefer_bare = self.prefers_bare();
        if prefer_bare {
            warn!("Bare engine strategy requested first");
        }

        // failures describe the latest load only
        let mut failures = Vec::new();
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clear();
        for strategy in self.plan(prefer_bare) {
            if !strategy.is_available(&self.capabilities) {
                debug!("Skipping {} strategy: shared memory unavailable", strategy.mode);
                continue;
            }

            info!("Loading engine ({}), timeout {:?}", strategy.mode, strategy.timeout);
            let attempt = tokio::time::timeout(strategy.timeout, self.bootstrap.bootstrap(strategy.mode)).await;
            let reason = match attempt {
                Ok(Ok(engine)) => {
                    info!("Engine load finished ({})", strategy.mode);
                    self.set_state(LoaderState::Ready { mode: strategy.mode });
                    return Ok(EngineHandle::new(strategy.mode, engine));
                }
                Ok(Err(XsyncError::EngineLoad(reason))) => reason,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("{} load timed out after {:?}", strategy.mode, strategy.timeout),
            };
            warn!("Engine {} load failed: {}", strategy.mode, reason);
            failures.push(StrategyFailure { mode: strategy.mode, reason });
            *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = failures.clone();
        }

        self.set_state(LoaderState::Unloaded);
        let summary = failures
            .iter()
            .map(|f| format!("{}: {}", f.mode, f.reason))
            .collect::<Vec<_>>()
            .join("; ");
        error!("All engine strategies exhausted: {}", summary);
        Err(XsyncError::EngineLoad(format!("All engine strategies failed ({})", summary)))
    }

    fn set_state(&self, state: LoaderState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
