//! Segmentation collaborator seam.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use instafit_core::wardrobe::SegmentedImage;

use crate::config::SegmenterConfig;
use crate::http::HttpSegmenter;
use crate::process::ProcessSegmenter;

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    /// The service could not be reached or the process could not run.
    #[error("Segmentation request failed: {0}")]
    Transport(String),

    /// The service reported a failure.
    #[error("Segmentation service error: {0}")]
    Service(String),

    /// The response could not be decoded.
    #[error("Invalid segmentation response: {0}")]
    InvalidResponse(String),

    #[error("Segmentation timed out after {0}s")]
    Timeout(u64),

    /// The call succeeded but found no garments.
    #[error("Segmentation produced no images")]
    Empty,
}

/// Turns one photo into zero or more garment cut-outs.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, image: Bytes) -> Result<Vec<SegmentedImage>, SegmentationError>;
}

/// Build the adapter selected by `config`.
pub fn build_segmenter(config: &SegmenterConfig) -> Arc<dyn Segmenter> {
    match config {
        SegmenterConfig::Http { base_url, timeout } => {
            Arc::new(HttpSegmenter::new(base_url, *timeout))
        }
        SegmenterConfig::Process {
            interpreter,
            script,
            timeout,
        } => Arc::new(ProcessSegmenter::new(
            interpreter.clone(),
            script.clone(),
            *timeout,
        )),
    }
}
