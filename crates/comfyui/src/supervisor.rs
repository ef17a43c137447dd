//! Engine reachability probe and lazy start.
//!
//! [`EngineSupervisor::is_ready`] is a cheap `GET /system_stats` probe.
//! [`EngineSupervisor::ensure_started`] launches the engine through an
//! [`EngineLauncher`] when the probe fails, serialized by a single async
//! mutex so concurrent requests trigger at most one launch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instafit_core::error::CoreError;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::api::ComfyUIApi;
use crate::config::EngineConfig;

/// Proxy variables cleared in the engine's environment so that loopback
/// traffic is never routed through a proxy.
const PROXY_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Errors raised while bringing the engine up.
#[derive(Debug, thiserror::Error)]
pub enum EngineStartError {
    #[error("Engine is not reachable and autostart is disabled")]
    AutostartDisabled,

    #[error("Failed to launch engine: {0}")]
    Spawn(String),

    #[error("Engine did not become ready within {waited_secs}s")]
    NotReady { waited_secs: u64 },
}

impl From<EngineStartError> for CoreError {
    fn from(err: EngineStartError) -> Self {
        CoreError::Resource(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Launchers
// ---------------------------------------------------------------------------

/// Starts (and optionally stops) an engine process.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Launch the engine. Returns once the process is spawned, not once it
    /// is ready.
    async fn launch(&self) -> Result<(), EngineStartError>;

    /// Stop whatever `launch` started.
    async fn shutdown(&self) {}
}

/// Spawns `python main.py --listen <host>` inside the engine checkout.
pub struct ProcessLauncher {
    engine_dir: PathBuf,
    python: String,
    listen_host: String,
    child: Mutex<Option<Child>>,
}

impl ProcessLauncher {
    pub fn new(engine_dir: PathBuf, python: String, listen_host: String) -> Self {
        Self {
            engine_dir,
            python,
            listen_host,
            child: Mutex::new(None),
        }
    }

    /// `None` when the config has no engine directory.
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        config.engine_dir.as_ref().map(|dir| {
            Self::new(
                dir.clone(),
                config.python.clone(),
                config.listen_host.clone(),
            )
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg("main.py")
            .arg("--listen")
            .arg(&self.listen_host)
            .current_dir(&self.engine_dir)
            .kill_on_drop(true);
        for var in PROXY_VARS {
            cmd.env_remove(var);
        }
        cmd.env("NO_PROXY", "*").env("no_proxy", "*");
        cmd
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<(), EngineStartError> {
        let mut slot = self.child.lock().await;

        // A previous launch that never became ready is replaced.
        if let Some(mut stale) = slot.take() {
            if let Err(e) = stale.kill().await {
                tracing::warn!(error = %e, "Failed to kill stale engine process");
            }
        }

        tracing::info!(
            engine_dir = %self.engine_dir.display(),
            python = %self.python,
            "Launching ComfyUI engine",
        );

        let child = self
            .command()
            .spawn()
            .map_err(|e| EngineStartError::Spawn(e.to_string()))?;

        tracing::info!(pid = child.id(), "Engine process spawned");
        *slot = Some(child);
        Ok(())
    }

    async fn shutdown(&self) {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            tracing::info!(pid = child.id(), "Stopping engine process");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to stop engine process");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Owns the readiness probe and the start lock for one engine.
pub struct EngineSupervisor {
    api: ComfyUIApi,
    launcher: Option<Arc<dyn EngineLauncher>>,
    probe_timeout: Duration,
    settle_timeout: Duration,
    poll_interval: Duration,
    start_lock: Mutex<()>,
}

impl EngineSupervisor {
    pub fn new(
        api: ComfyUIApi,
        launcher: Option<Arc<dyn EngineLauncher>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            api,
            launcher,
            probe_timeout: config.probe_timeout,
            settle_timeout: config.settle_timeout,
            poll_interval: config.poll_interval,
            start_lock: Mutex::new(()),
        }
    }

    /// Supervisor using a [`ProcessLauncher`] when autostart is configured.
    pub fn from_config(api: ComfyUIApi, config: &EngineConfig) -> Self {
        let launcher = ProcessLauncher::from_config(config)
            .map(|l| Arc::new(l) as Arc<dyn EngineLauncher>);
        Self::new(api, launcher, config)
    }

    /// Whether the engine answers `GET /system_stats` in time.
    pub async fn is_ready(&self) -> bool {
        match self.api.system_stats(self.probe_timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Engine readiness probe failed");
                false
            }
        }
    }

    /// Make sure the engine is reachable, launching it if necessary.
    ///
    /// Concurrent callers wait on the same lock; whoever holds it re-checks
    /// readiness first, so only one launch happens. A failed start does not
    /// affect later calls.
    pub async fn ensure_started(&self) -> Result<(), EngineStartError> {
        if self.is_ready().await {
            return Ok(());
        }

        let _guard = self.start_lock.lock().await;

        if self.is_ready().await {
            tracing::debug!("Engine became ready while waiting for start lock");
            return Ok(());
        }

        let Some(launcher) = &self.launcher else {
            tracing::warn!("Engine unreachable and autostart is disabled");
            return Err(EngineStartError::AutostartDisabled);
        };

        launcher.launch().await?;

        let deadline = tokio::time::Instant::now() + self.settle_timeout;
        loop {
            if self.is_ready().await {
                tracing::info!("Engine is ready");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::error!(
                    waited_secs = self.settle_timeout.as_secs(),
                    "Engine did not become ready",
                );
                return Err(EngineStartError::NotReady {
                    waited_secs: self.settle_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop an engine this supervisor launched.
    pub async fn shutdown(&self) {
        if let Some(launcher) = &self.launcher {
            launcher.shutdown().await;
        }
    }
}
