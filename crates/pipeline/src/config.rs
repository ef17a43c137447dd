//! Pipeline limits and failure handling policies.

use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound on files per request.
pub const DEFAULT_MAX_FILES: usize = 20;

/// Default number of files processed at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default timeout for one segmentation call.
pub const DEFAULT_SEGMENTER_TIMEOUT: Duration = Duration::from_secs(120);

/// What to do with sibling files once one file fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Let every file finish and report all failures.
    #[default]
    RunToCompletion,
    /// Cancel the remaining files after the first failure.
    FailFast,
}

/// How an outcome with failures is turned into a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseContract {
    /// Any failure fails the whole request.
    #[default]
    AllOrNothing,
    /// Return the stored items plus warnings when at least one item was
    /// stored.
    PartialSuccess,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_files: usize,
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub response_contract: ResponseContract,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            failure_policy: FailurePolicy::default(),
            response_contract: ResponseContract::default(),
        }
    }
}

/// Which segmentation adapter to use.
#[derive(Debug, Clone)]
pub enum SegmenterConfig {
    /// Remote service exposing `POST /segment/`.
    Http { base_url: String, timeout: Duration },
    /// Local script that reads an image on stdin and writes a ZIP to stdout.
    Process {
        interpreter: String,
        script: PathBuf,
        timeout: Duration,
    },
}
