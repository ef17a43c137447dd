//! Submit-then-stream job client.
//!
//! [`JobClient::submit`] runs one try-on job end to end:
//!
//! 1. open the WebSocket under the process [`ClientId`],
//! 2. `POST /prompt` the patched template and read back the `prompt_id`,
//! 3. drive an [`ExecutionTracker`] from the socket until completion,
//! 4. return the first non-empty artifact from the output node.
//!
//! The socket is opened before submission so no frame for the job can be
//! missed. On cancellation or idle timeout the job is removed from the
//! engine queue on a best-effort basis.

use std::time::Duration;

use instafit_core::error::CoreError;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::{ClientId, ComfyUIClient, WsStream};
use crate::config::EngineConfig;
use crate::session::{run_session, Artifact, ExecutionTracker};
use crate::template::JobTemplate;

/// How long to wait for the close handshake when tearing a session down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while running a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job could not be queued, or the engine did not return an id.
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// An input image could not be uploaded to the engine.
    #[error("Input upload failed: {0}")]
    Upload(String),

    /// The WebSocket could not be opened.
    #[error("Failed to open job stream: {0}")]
    Connection(String),

    /// The stream ended or failed before the job completed.
    #[error("Job stream interrupted: {0}")]
    StreamInterrupted(String),

    /// A frame could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine reported a node failure for this job.
    #[error("Execution failed at node {node}: {message}")]
    Execution { node: String, message: String },

    #[error("No frame received for {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Job cancelled")]
    Cancelled,

    /// The job completed without producing output on the output node.
    #[error("Job completed without producing an output image")]
    NoArtifact,
}

impl From<JobError> for CoreError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Protocol(msg) => CoreError::Protocol(msg),
            JobError::Cancelled => CoreError::Internal(err.to_string()),
            other => CoreError::Collaborator(other.to_string()),
        }
    }
}

/// Client for submitting jobs to one ComfyUI instance.
///
/// Cheap to share behind an `Arc`; the [`ClientId`] is generated once and
/// reused for every job.
pub struct JobClient {
    api: ComfyUIApi,
    client: ComfyUIClient,
    client_id: ClientId,
    output_node: String,
    idle_timeout: Duration,
}

impl JobClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_api(ComfyUIApi::new(config.api_url.clone()), config)
    }

    /// Build a client around an existing API handle (shared connection pool).
    pub fn with_api(api: ComfyUIApi, config: &EngineConfig) -> Self {
        let client_id = ClientId::generate();
        tracing::info!(client_id = %client_id, api_url = %config.api_url, "Job client initialised");
        Self {
            api,
            client: ComfyUIClient::new(config.ws_url.clone()),
            client_id,
            output_node: config.output_node.clone(),
            idle_timeout: config.job_idle_timeout,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Upload an input image and return the reference to patch into a
    /// `LoadImage` node.
    pub async fn upload_input(&self, data: Vec<u8>, filename: &str) -> Result<String, JobError> {
        let uploaded = self
            .api
            .upload_image(data, filename)
            .await
            .map_err(|e| JobError::Upload(e.to_string()))?;
        tracing::debug!(filename, reference = %uploaded.image_reference(), "Uploaded input image");
        Ok(uploaded.image_reference())
    }

    /// Submit `template` and wait for its output artifact.
    pub async fn submit(
        &self,
        template: &JobTemplate,
        cancel: &CancellationToken,
    ) -> Result<Artifact, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let workflow = template
            .to_value()
            .map_err(|e| JobError::Submission(format!("Failed to serialize job template: {e}")))?;

        let mut conn = self
            .client
            .connect(&self.client_id)
            .await
            .map_err(|e| JobError::Connection(e.to_string()))?;

        let submitted = match self
            .api
            .submit_workflow(&workflow, self.client_id.as_str())
            .await
        {
            Ok(resp) if !resp.prompt_id.is_empty() => resp,
            Ok(_) => {
                close_quietly(&mut conn.ws_stream).await;
                return Err(JobError::Submission("Engine returned an empty prompt_id".into()));
            }
            Err(e) => {
                close_quietly(&mut conn.ws_stream).await;
                return Err(JobError::Submission(e.to_string()));
            }
        };

        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Job submitted",
        );

        let mut tracker = ExecutionTracker::new(&submitted.prompt_id, &self.output_node);
        let outcome = run_session(&mut conn.ws_stream, &mut tracker, self.idle_timeout, cancel).await;
        close_quietly(&mut conn.ws_stream).await;

        match outcome {
            Ok(()) => {
                let artifact = tracker.into_artifact();
                match &artifact {
                    Ok(a) => tracing::info!(prompt_id = %submitted.prompt_id, bytes = a.data.len(), "Job completed"),
                    Err(e) => tracing::warn!(prompt_id = %submitted.prompt_id, error = %e, "Job completed without output"),
                }
                artifact
            }
            Err(err @ (JobError::Cancelled | JobError::Timeout(_))) => {
                tracing::warn!(prompt_id = %submitted.prompt_id, error = %err, "Abandoning job");
                self.abandon(&tracker).await;
                Err(err)
            }
            Err(err) => {
                tracing::error!(prompt_id = %submitted.prompt_id, error = %err, "Job failed");
                Err(err)
            }
        }
    }

    /// Best-effort removal of an abandoned job from the engine.
    ///
    /// The prompt is deleted from the queue; if it had already started
    /// executing, the running execution is interrupted as well.
    async fn abandon(&self, tracker: &ExecutionTracker) {
        let prompt_id = tracker.prompt_id();
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove job from queue");
        }
        if tracker.cursor().is_some() {
            if let Err(e) = self.api.interrupt().await {
                tracing::warn!(prompt_id, error = %e, "Failed to interrupt running job");
            }
        }
    }
}

async fn close_quietly(stream: &mut WsStream) {
    match tokio::time::timeout(CLOSE_TIMEOUT, stream.close(None)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "WebSocket close failed"),
        Err(_) => tracing::debug!("WebSocket close timed out"),
    }
}
