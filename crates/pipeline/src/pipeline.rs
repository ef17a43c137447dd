//! Concurrent segment-then-upload fan-out.
//!
//! One unit is spawned per uploaded file. A unit waits for a semaphore
//! permit, calls the segmenter, then uploads each garment in turn. The
//! coordinator joins every unit, keeping the results of successful uploads
//! and recording failures in the order they complete.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use instafit_cloud::storage::{ObjectStorage, StorageError};
use instafit_core::error::CoreError;
use instafit_core::wardrobe::{
    is_safe_key_segment, wardrobe_object_key, UploadResult, IMAGE_CONTENT_TYPE,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{FailurePolicy, PipelineConfig, ResponseContract};
use crate::segmenter::{SegmentationError, Segmenter};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single file failed.
#[derive(Debug, thiserror::Error)]
pub enum UnitErrorKind {
    #[error("{0}")]
    Segmentation(#[from] SegmentationError),

    #[error("invalid garment id: {0}")]
    InvalidKey(String),

    #[error("{0}")]
    Upload(#[from] StorageError),

    #[error("processing cancelled")]
    Cancelled,

    #[error("processing task panicked: {0}")]
    Panicked(String),
}

/// Failure of the unit handling one uploaded file.
#[derive(Debug, thiserror::Error)]
#[error("File {file_index}: {kind}")]
pub struct UnitError {
    /// Zero-based position of the file in the request.
    pub file_index: usize,
    #[source]
    pub kind: UnitErrorKind,
}

/// Request-level pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No files were uploaded")]
    NoFiles,

    #[error("Too many files: {count} uploaded, at most {max} allowed")]
    TooManyFiles { count: usize, max: usize },

    #[error("Invalid user id '{0}'")]
    InvalidUser(String),

    #[error("Processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Unit(#[from] UnitError),
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoFiles
            | PipelineError::TooManyFiles { .. }
            | PipelineError::InvalidUser(_) => CoreError::Validation(err.to_string()),
            PipelineError::Cancelled => CoreError::Internal(err.to_string()),
            PipelineError::Unit(unit) => CoreError::Collaborator(unit.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Everything produced by one `process` call.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Stored garments across all files, in completion order.
    pub results: Vec<UploadResult>,
    /// Per-file failures in completion order.
    pub failures: Vec<UnitError>,
}

/// Response payload after applying a [`ResponseContract`].
#[derive(Debug, Serialize)]
pub struct WardrobeBatch {
    pub items: Vec<UploadResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PipelineOutcome {
    /// The representative error: the first failure observed.
    pub fn first_error(&self) -> Option<&UnitError> {
        self.failures.first()
    }

    pub fn count(&self) -> usize {
        self.results.len()
    }

    /// Apply `contract` to decide between success and the first failure.
    pub fn resolve(self, contract: ResponseContract) -> Result<WardrobeBatch, PipelineError> {
        let Self { results, failures } = self;

        let partial_ok = contract == ResponseContract::PartialSuccess && !results.is_empty();
        if !partial_ok {
            if let Some(first) = failures.into_iter().next() {
                return Err(PipelineError::Unit(first));
            }
            return Ok(WardrobeBatch {
                items: results,
                warnings: Vec::new(),
            });
        }

        Ok(WardrobeBatch {
            items: results,
            warnings: failures.iter().map(ToString::to_string).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SegmentationPipeline {
    segmenter: Arc<dyn Segmenter>,
    storage: Arc<dyn ObjectStorage>,
    config: PipelineConfig,
}

impl SegmentationPipeline {
    pub fn new(
        segmenter: Arc<dyn Segmenter>,
        storage: Arc<dyn ObjectStorage>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            segmenter,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Segment and store every file for `user_id`.
    ///
    /// Returns `Err` only for request-level problems (no files, too many,
    /// bad user id, caller cancellation). Per-file failures are reported in
    /// the outcome.
    pub async fn process(
        &self,
        user_id: &str,
        files: Vec<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::NoFiles);
        }
        if files.len() > self.config.max_files {
            return Err(PipelineError::TooManyFiles {
                count: files.len(),
                max: self.config.max_files,
            });
        }
        if !is_safe_key_segment(user_id) {
            return Err(PipelineError::InvalidUser(user_id.to_string()));
        }

        let file_count = files.len();
        tracing::info!(user_id, file_count, "Processing wardrobe upload");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let units_cancel = cancel.child_token();
        let user_id: Arc<str> = Arc::from(user_id);

        let mut units = JoinSet::new();
        for (file_index, image) in files.into_iter().enumerate() {
            let unit = Unit {
                file_index,
                user_id: Arc::clone(&user_id),
                segmenter: Arc::clone(&self.segmenter),
                storage: Arc::clone(&self.storage),
                semaphore: Arc::clone(&semaphore),
                cancel: units_cancel.clone(),
            };
            units.spawn(unit.run(image));
        }

        let mut outcome = PipelineOutcome::default();
        while let Some(joined) = units.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Pipeline unit could not be joined");
                    continue;
                }
            };

            outcome.results.extend(report.results);

            let Some(kind) = report.error else { continue };

            // Siblings stopped by fail-fast are not failures of their own.
            if matches!(kind, UnitErrorKind::Cancelled) && units_cancel.is_cancelled() {
                continue;
            }

            tracing::warn!(
                user_id = %user_id,
                file_index = report.file_index,
                error = %kind,
                "Wardrobe file failed",
            );
            outcome.failures.push(UnitError {
                file_index: report.file_index,
                kind,
            });

            if self.config.failure_policy == FailurePolicy::FailFast && !units_cancel.is_cancelled()
            {
                tracing::info!(user_id = %user_id, "Fail-fast: cancelling remaining files");
                units_cancel.cancel();
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(user_id = %user_id, "Wardrobe upload cancelled by caller");
            return Err(PipelineError::Cancelled);
        }

        tracing::info!(
            user_id = %user_id,
            stored = outcome.results.len(),
            failed = outcome.failures.len(),
            "Wardrobe upload processed",
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

struct UnitReport {
    file_index: usize,
    results: Vec<UploadResult>,
    error: Option<UnitErrorKind>,
}

struct Unit {
    file_index: usize,
    user_id: Arc<str>,
    segmenter: Arc<dyn Segmenter>,
    storage: Arc<dyn ObjectStorage>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Unit {
    async fn run(self, image: Bytes) -> UnitReport {
        let mut results = Vec::new();
        let outcome = AssertUnwindSafe(self.execute(image, &mut results))
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(kind)) => Some(kind),
            Err(panic) => Some(UnitErrorKind::Panicked(panic_message(panic.as_ref()))),
        };

        UnitReport {
            file_index: self.file_index,
            results,
            error,
        }
    }

    async fn execute(
        &self,
        image: Bytes,
        results: &mut Vec<UploadResult>,
    ) -> Result<(), UnitErrorKind> {
        let _permit = self
            .cancellable(self.semaphore.acquire())
            .await?
            .map_err(|_| UnitErrorKind::Cancelled)?;

        tracing::debug!(file_index = self.file_index, bytes = image.len(), "Segmenting file");
        let segments = self.cancellable(self.segmenter.segment(image)).await??;
        if segments.is_empty() {
            return Err(SegmentationError::Empty.into());
        }

        tracing::debug!(
            file_index = self.file_index,
            garments = segments.len(),
            "Uploading segmented garments",
        );

        for segment in segments {
            let key = wardrobe_object_key(&self.user_id, &segment.id)
                .map_err(|e| UnitErrorKind::InvalidKey(e.to_string()))?;
            let image_url = self
                .cancellable(self.storage.upload(segment.image, &key, IMAGE_CONTENT_TYPE))
                .await??;

            results.push(UploadResult {
                image_url,
                clothing_id: segment.id,
                metadata: segment.metadata,
            });
        }

        Ok(())
    }

    /// Run `fut` unless the unit is cancelled first.
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, UnitErrorKind> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UnitErrorKind::Cancelled),
            out = fut => Ok(out),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
