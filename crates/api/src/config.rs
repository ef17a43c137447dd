use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use instafit_cloud::r2::R2Config;
use instafit_comfyui::config::{EngineConfig, DEFAULT_API_URL};
use instafit_pipeline::config::{
    FailurePolicy, PipelineConfig, ResponseContract, SegmenterConfig, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MAX_FILES, DEFAULT_SEGMENTER_TIMEOUT,
};

use crate::auth::jwt::JwtConfig;

/// Where garment images are stored.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Cloudflare R2 through its S3-compatible API.
    R2(R2Config),
    /// Process-local map; objects are lost on restart.
    Memory { base_url: String },
}

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret, the segmenter location and the R2
/// credentials have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`). Try-on jobs are slow.
    pub request_timeout_secs: u64,
    /// Maximum request body size in bytes (default: 50 MiB).
    pub max_upload_bytes: usize,
    /// Expose `POST /api/test-auth` for minting tokens without a login flow.
    pub enable_test_auth: bool,
    /// JWT token configuration.
    pub jwt: JwtConfig,
    /// Generation engine connection and autostart settings.
    pub engine: EngineConfig,
    /// Segmentation adapter selection.
    pub segmenter: SegmenterConfig,
    /// Wardrobe pipeline limits and policies.
    pub pipeline: PipelineConfig,
    /// Object storage backend.
    pub storage: StorageBackend,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                       |
    /// |--------------------------------|-------------------------------|
    /// | `HOST`                         | `0.0.0.0`                     |
    /// | `PORT`                         | `8080`                        |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`       |
    /// | `REQUEST_TIMEOUT_SECS`         | `300`                         |
    /// | `MAX_UPLOAD_BYTES`             | `52428800`                    |
    /// | `ENABLE_TEST_AUTH`             | `false`                       |
    /// | `ENGINE_URL`                   | `http://127.0.0.1:8188`       |
    /// | `ENGINE_DIR`                   | unset (autostart disabled)    |
    /// | `ENGINE_PYTHON`                | `python`                      |
    /// | `ENGINE_SETTLE_SECS`           | `10`                          |
    /// | `ENGINE_JOB_IDLE_TIMEOUT_SECS` | `120`                         |
    /// | `ENGINE_OUTPUT_NODE`           | `30`                          |
    /// | `WORKFLOW_PATH`                | `./ImageWorkflow.json`        |
    /// | `SEGMENTER_URL`                | one of URL / SCRIPT required  |
    /// | `SEGMENTER_SCRIPT`             | one of URL / SCRIPT required  |
    /// | `SEGMENTER_PYTHON`             | `python`                      |
    /// | `SEGMENTER_TIMEOUT_SECS`       | `120`                         |
    /// | `PIPELINE_MAX_FILES`           | `20`                          |
    /// | `PIPELINE_MAX_CONCURRENCY`     | `4`                           |
    /// | `PIPELINE_FAIL_FAST`           | `false`                       |
    /// | `PIPELINE_PARTIAL_SUCCESS`     | `false`                       |
    /// | `STORAGE_BACKEND`              | `r2` (or `memory`)            |
    /// | `STORAGE_PUBLIC_URL`           | `http://localhost:8080/files` |
    /// | `R2_*`                         | required for `r2`             |
    ///
    /// JWT settings are documented on [`JwtConfig::from_env`].
    ///
    /// # Panics
    ///
    /// Panics on any missing required variable, unparsable value, or a zero
    /// timeout or pipeline limit, so a misconfigured deployment fails at
    /// startup rather than per request.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "52428800".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let enable_test_auth = env_flag("ENABLE_TEST_AUTH");

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
            enable_test_auth,
            jwt,
            engine: engine_from_env(),
            segmenter: segmenter_from_env(),
            pipeline: pipeline_from_env(),
            storage: storage_from_env(),
        }
    }
}

fn engine_from_env() -> EngineConfig {
    let api_url = std::env::var("ENGINE_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
    let defaults = EngineConfig::for_url(api_url);

    EngineConfig {
        engine_dir: std::env::var("ENGINE_DIR").ok().map(PathBuf::from),
        python: std::env::var("ENGINE_PYTHON").unwrap_or(defaults.python.clone()),
        settle_timeout: Duration::from_secs(env_positive(
            "ENGINE_SETTLE_SECS",
            defaults.settle_timeout.as_secs(),
        )),
        job_idle_timeout: Duration::from_secs(env_positive(
            "ENGINE_JOB_IDLE_TIMEOUT_SECS",
            defaults.job_idle_timeout.as_secs(),
        )),
        output_node: std::env::var("ENGINE_OUTPUT_NODE").unwrap_or(defaults.output_node.clone()),
        workflow_path: std::env::var("WORKFLOW_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.workflow_path.clone()),
        ..defaults
    }
}

fn segmenter_from_env() -> SegmenterConfig {
    let timeout = Duration::from_secs(env_positive(
        "SEGMENTER_TIMEOUT_SECS",
        DEFAULT_SEGMENTER_TIMEOUT.as_secs(),
    ));

    if let Ok(base_url) = std::env::var("SEGMENTER_URL") {
        return SegmenterConfig::Http { base_url, timeout };
    }

    let script = std::env::var("SEGMENTER_SCRIPT")
        .expect("SEGMENTER_URL or SEGMENTER_SCRIPT must be set in the environment");
    SegmenterConfig::Process {
        interpreter: std::env::var("SEGMENTER_PYTHON").unwrap_or_else(|_| "python".into()),
        script: PathBuf::from(script),
        timeout,
    }
}

fn pipeline_from_env() -> PipelineConfig {
    PipelineConfig {
        max_files: env_positive("PIPELINE_MAX_FILES", DEFAULT_MAX_FILES),
        max_concurrency: env_positive("PIPELINE_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY),
        failure_policy: if env_flag("PIPELINE_FAIL_FAST") {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::RunToCompletion
        },
        response_contract: if env_flag("PIPELINE_PARTIAL_SUCCESS") {
            ResponseContract::PartialSuccess
        } else {
            ResponseContract::AllOrNothing
        },
    }
}

fn storage_from_env() -> StorageBackend {
    let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "r2".into());
    match backend.as_str() {
        "memory" => StorageBackend::Memory {
            base_url: std::env::var("STORAGE_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080/files".into()),
        },
        "r2" => StorageBackend::R2(R2Config {
            account_id: required("R2_ACCOUNT_ID"),
            access_key_id: required("R2_ACCESS_KEY_ID"),
            secret_access_key: required("R2_SECRET_ACCESS_KEY"),
            bucket: required("R2_BUCKET_NAME"),
            public_url: required("R2_PUBLIC_URL"),
        }),
        other => panic!("STORAGE_BACKEND must be `r2` or `memory`, got `{other}`"),
    }
}

fn required(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set in the environment"))
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} is invalid ({raw}): {e}")),
        Err(_) => default,
    }
}

/// Like [`env_parse`], but zero is rejected.
fn env_positive<T>(name: &str, default: T) -> T
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    require_positive(name, env_parse(name, default))
}

fn require_positive<T: Default + PartialEq>(name: &str, value: T) -> T {
    if value == T::default() {
        panic!("{name} must be greater than zero");
    }
    value
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
