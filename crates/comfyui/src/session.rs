//! Streaming session state machine for a single submitted job.
//!
//! [`ExecutionTracker`] interprets frames in arrival order: `executing`
//! control frames for the tracked prompt move the execution cursor, and
//! binary frames received while the cursor sits on the output node are kept
//! as artifacts. [`run_session`] drives a tracker from a WebSocket stream
//! until the prompt completes, the stream breaks, the idle timeout fires, or
//! the caller cancels.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::job::JobError;
use crate::messages::{parse_message, ComfyUIMessage};

/// Length of the prefix ComfyUI puts in front of every binary frame.
pub const BINARY_HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Binary frames
// ---------------------------------------------------------------------------

/// Encoding of an image carried in a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Map the header's format code (1 = JPEG, 2 = PNG). Unknown codes are
    /// treated as JPEG.
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::Png,
            _ => Self::Jpeg,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Decoded 8-byte binary frame prefix: two big-endian `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFrameHeader {
    /// Event type (1 = preview / websocket image).
    pub event: u32,
    pub format: ImageFormat,
}

/// Split a raw binary frame into its header and payload.
///
/// The returned payload is exactly `frame.len() - 8` bytes long. Frames
/// shorter than the header are a protocol error.
pub fn strip_header(frame: &[u8]) -> Result<(BinaryFrameHeader, &[u8]), JobError> {
    if frame.len() < BINARY_HEADER_LEN {
        return Err(JobError::Protocol(format!(
            "binary frame of {} bytes is shorter than the {BINARY_HEADER_LEN}-byte header",
            frame.len()
        )));
    }
    let (head, payload) = frame.split_at(BINARY_HEADER_LEN);
    let event = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let format = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
    Ok((
        BinaryFrameHeader {
            event,
            format: ImageFormat::from_code(format),
        },
        payload,
    ))
}

/// Binary output captured from the designated output node.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub data: Bytes,
    pub format: ImageFormat,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Outcome of feeding one frame to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The tracked prompt reported completion; stop reading.
    Completed,
}

/// Execution cursor and artifact collection for one prompt.
#[derive(Debug)]
pub struct ExecutionTracker {
    prompt_id: String,
    output_node: String,
    cursor: Option<String>,
    artifacts: Vec<Artifact>,
}

impl ExecutionTracker {
    pub fn new(prompt_id: impl Into<String>, output_node: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            output_node: output_node.into(),
            cursor: None,
            artifacts: Vec::new(),
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// Node currently executing for the tracked prompt, if any.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    fn is_tracked(&self, prompt_id: Option<&str>) -> bool {
        prompt_id == Some(self.prompt_id.as_str())
    }

    /// Decode and apply a text (control) frame.
    pub fn handle_text(&mut self, text: &str) -> Result<Step, JobError> {
        let msg = parse_message(text)
            .map_err(|e| JobError::Protocol(format!("invalid control frame: {e}")))?;
        self.handle_message(msg)
    }

    /// Apply a decoded control frame.
    pub fn handle_message(&mut self, msg: ComfyUIMessage) -> Result<Step, JobError> {
        match msg {
            ComfyUIMessage::Executing(data) => {
                if !self.is_tracked(data.prompt_id.as_deref()) {
                    tracing::trace!(prompt_id = ?data.prompt_id, "Ignoring executing frame for another prompt");
                    return Ok(Step::Continue);
                }
                match data.node {
                    None => {
                        tracing::debug!(prompt_id = %self.prompt_id, "Execution completed (all nodes done)");
                        return Ok(Step::Completed);
                    }
                    Some(node) => {
                        tracing::debug!(prompt_id = %self.prompt_id, node = %node, "Executing node");
                        self.cursor = Some(node);
                    }
                }
            }
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == self.prompt_id => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                return Err(JobError::Execution {
                    node: data.node_id,
                    message: data.exception_message,
                });
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::trace!(prompt_id = %data.prompt_id, "Ignoring error for another prompt");
            }
            ComfyUIMessage::Progress(data) => {
                if data.prompt_id.is_none() || self.is_tracked(data.prompt_id.as_deref()) {
                    tracing::debug!(
                        prompt_id = %self.prompt_id,
                        value = data.value,
                        max = data.max,
                        percent = data.percent(),
                        "Generation progress",
                    );
                }
            }
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, "Execution started");
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, cached = data.nodes.len(), "Execution used cache");
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, node = %data.node, "Node executed with output");
            }
            ComfyUIMessage::ExecutionSuccess(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, "Execution succeeded");
            }
            ComfyUIMessage::Status(data) => {
                tracing::trace!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
            ComfyUIMessage::Unknown(kind) => {
                tracing::trace!(kind = %kind, "Ignoring unknown control frame");
            }
        }
        Ok(Step::Continue)
    }

    /// Apply a binary frame: strip its header, keep the payload only when
    /// the cursor is on the output node.
    pub fn handle_binary(&mut self, frame: &[u8]) -> Result<Step, JobError> {
        let (header, payload) = strip_header(frame)?;

        if self.cursor.as_deref() == Some(self.output_node.as_str()) {
            tracing::debug!(
                prompt_id = %self.prompt_id,
                bytes = payload.len(),
                format = ?header.format,
                "Captured output frame",
            );
            self.artifacts.push(Artifact {
                data: Bytes::copy_from_slice(payload),
                format: header.format,
            });
        } else {
            tracing::trace!(cursor = ?self.cursor, bytes = payload.len(), "Discarding intermediate binary frame");
        }
        Ok(Step::Continue)
    }

    /// First non-empty artifact captured during the session.
    pub fn into_artifact(self) -> Result<Artifact, JobError> {
        self.artifacts
            .into_iter()
            .find(|a| !a.data.is_empty())
            .ok_or(JobError::NoArtifact)
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// Feed frames from `stream` into `tracker` until the prompt completes.
///
/// Frames are processed strictly in arrival order. Returns:
/// - `Ok(())` once the tracked prompt reports completion,
/// - [`JobError::StreamInterrupted`] if the stream ends or fails first,
/// - [`JobError::Timeout`] if no frame arrives within `idle_timeout`,
/// - [`JobError::Cancelled`] when `cancel` fires,
/// - any protocol or execution error raised by the tracker.
pub async fn run_session<S>(
    stream: &mut S,
    tracker: &mut ExecutionTracker,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), JobError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => return Err(JobError::Timeout(idle_timeout)),
            Ok(None) => {
                return Err(JobError::StreamInterrupted(
                    "connection closed before the job completed".into(),
                ))
            }
            Ok(Some(Err(e))) => return Err(JobError::StreamInterrupted(e.to_string())),
            Ok(Some(Ok(msg))) => msg,
        };

        let step = match msg {
            Message::Text(text) => tracker.handle_text(&text)?,
            Message::Binary(data) => tracker.handle_binary(&data)?,
            Message::Close(frame) => {
                return Err(JobError::StreamInterrupted(format!(
                    "engine closed the connection: {frame:?}"
                )))
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Step::Continue,
        };

        if step == Step::Completed {
            return Ok(());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
