//! Connection and lifecycle settings for the generation engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::ws_url_from_api_url;
use crate::template::DEFAULT_OUTPUT_NODE;

/// Default ComfyUI HTTP address.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";

/// Tunable parameters for talking to (and starting) one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// Base WebSocket URL, derived from `api_url` by default.
    pub ws_url: String,
    /// Engine checkout containing `main.py`. `None` disables autostart.
    pub engine_dir: Option<PathBuf>,
    /// Interpreter used to launch `main.py`.
    pub python: String,
    /// Address passed to `--listen`.
    pub listen_host: String,
    /// How long to wait for a launched engine to become reachable.
    pub settle_timeout: Duration,
    /// Timeout for a single readiness probe.
    pub probe_timeout: Duration,
    /// Delay between readiness probes while waiting for startup.
    pub poll_interval: Duration,
    /// Maximum silence on the job stream before giving up.
    pub job_idle_timeout: Duration,
    /// Node whose binary output is the job result.
    pub output_node: String,
    /// Job template file.
    pub workflow_path: PathBuf,
}

impl EngineConfig {
    /// Defaults pointed at `api_url`.
    pub fn for_url(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            ws_url: ws_url_from_api_url(&api_url),
            api_url,
            ..Self::default()
        }
    }

    pub fn autostart_enabled(&self) -> bool {
        self.engine_dir.is_some()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: ws_url_from_api_url(DEFAULT_API_URL),
            engine_dir: None,
            python: "python".to_string(),
            listen_host: "127.0.0.1".to_string(),
            settle_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            job_idle_timeout: Duration::from_secs(120),
            output_node: DEFAULT_OUTPUT_NODE.to_string(),
            workflow_path: PathBuf::from("./ImageWorkflow.json"),
        }
    }
}
