//! ComfyUI WebSocket control-frame types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module decodes them once, at the
//! boundary, into the closed [`ComfyUIMessage`] enum. Kinds this client does
//! not interpret (custom-node broadcasts, newer engine messages) decode to
//! [`ComfyUIMessage::Unknown`] instead of failing.

use serde::Deserialize;

/// All ComfyUI WebSocket message types the job client distinguishes.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// The whole prompt finished without errors.
    ExecutionSuccess(ExecutionSuccessData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other `type` tag; carries the tag for logging.
    Unknown(String),
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed. Frames
/// without a `prompt_id` cannot belong to any tracked job.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100), or 0 when `max` is not positive.
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_success` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSuccessData {
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Outer `{"type", "data"}` shape shared by every control frame.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON, or for an `executing` / `execution_error`
/// frame whose payload does not have the expected shape. The remaining kinds
/// only feed logging, so a payload they cannot decode becomes
/// [`ComfyUIMessage::Unknown`]. Unknown `type` values are not an error.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;

    let msg = match kind.as_str() {
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        "status" => lenient(kind, data, ComfyUIMessage::Status),
        "execution_start" => lenient(kind, data, ComfyUIMessage::ExecutionStart),
        "execution_cached" => lenient(kind, data, ComfyUIMessage::ExecutionCached),
        "progress" => lenient(kind, data, ComfyUIMessage::Progress),
        "executed" => lenient(kind, data, ComfyUIMessage::Executed),
        "execution_success" => lenient(kind, data, ComfyUIMessage::ExecutionSuccess),
        _ => ComfyUIMessage::Unknown(kind),
    };

    Ok(msg)
}

fn lenient<T, F>(kind: String, data: serde_json::Value, wrap: F) -> ComfyUIMessage
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> ComfyUIMessage,
{
    match serde_json::from_value(data) {
        Ok(payload) => wrap(payload),
        Err(e) => {
            tracing::debug!(kind = %kind, error = %e, "Undecodable informational frame");
            ComfyUIMessage::Unknown(kind)
        }
    }
}
