//! HTTP segmentation adapter.
//!
//! `POST {base_url}/segment/` with the photo in multipart field `file`. The
//! service answers
//!
//! ```json
//! { "segmented_images": [ { "filename": "a1.png", "image": "<base64>", "metadata": {} } ] }
//! ```
//!
//! or `{"error": "..."}` on failure.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use instafit_core::types::Metadata;
use instafit_core::wardrobe::{segment_id_from_filename, SegmentedImage};
use serde::Deserialize;

use crate::segmenter::{SegmentationError, Segmenter};

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    #[serde(default)]
    segmented_images: Vec<SegmentEntry>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentEntry {
    #[serde(default)]
    filename: Option<String>,
    image: String,
    #[serde(default)]
    metadata: Metadata,
}

pub struct HttpSegmenter {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSegmenter {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{}/segment/", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Segmenter for HttpSegmenter {
    async fn segment(&self, image: Bytes) -> Result<Vec<SegmentedImage>, SegmentationError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("upload.jpg");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SegmentationError::Timeout(self.timeout.as_secs())
                } else {
                    SegmentationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SegmentationError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<SegmentResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("status {status}: {}", String::from_utf8_lossy(&body)));
            return Err(SegmentationError::Service(message));
        }

        decode_response(&body)
    }
}

/// Decode a successful `/segment/` response body.
pub(crate) fn decode_response(body: &[u8]) -> Result<Vec<SegmentedImage>, SegmentationError> {
    let parsed: SegmentResponse = serde_json::from_slice(body)
        .map_err(|e| SegmentationError::InvalidResponse(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(SegmentationError::Service(error));
    }

    parsed
        .segmented_images
        .into_iter()
        .map(|entry| {
            let image = BASE64.decode(entry.image.as_bytes()).map_err(|e| {
                SegmentationError::InvalidResponse(format!("bad base64 image data: {e}"))
            })?;
            Ok(SegmentedImage {
                id: segment_id_from_filename(entry.filename.as_deref()),
                image: Bytes::from(image),
                metadata: entry.metadata,
            })
        })
        .collect()
}
