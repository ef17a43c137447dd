//! In-process fake ComfyUI engine for integration tests.
//!
//! Serves the HTTP endpoints the job client and supervisor use, plus a
//! `/ws` endpoint that replays a scripted sequence of frames once a prompt
//! has been submitted.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// Prompt id the fake engine hands out for every submission.
pub const PROMPT_ID: &str = "fake-prompt-1";

/// One scripted server action on the WebSocket.
#[derive(Debug, Clone)]
pub enum ScriptFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Send a close frame and end the connection.
    Close,
}

#[derive(Default)]
pub struct FakeState {
    pub ready: AtomicBool,
    pub fail_submit: AtomicBool,
    pub script: Mutex<Vec<ScriptFrame>>,
    pub submitted: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub probes: AtomicUsize,
    pub ws_connections: AtomicUsize,
    submitted_notify: Notify,
}

pub struct FakeEngine {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeEngine {
    /// Start a fake engine that reports ready and plays `script` on `/ws`.
    pub async fn start(script: Vec<ScriptFrame>) -> Self {
        let state = Arc::new(FakeState::default());
        state.ready.store(true, Ordering::SeqCst);
        *state.script.lock().unwrap() = script;

        let app = Router::new()
            .route("/system_stats", get(system_stats))
            .route("/prompt", post(submit_prompt))
            .route("/queue", post(queue))
            .route("/interrupt", post(interrupt))
            .route("/upload/image", post(upload_image))
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.ready.store(ready, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.state.submitted.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------------

pub fn executing(prompt_id: &str, node: Option<&str>) -> ScriptFrame {
    ScriptFrame::Text(
        json!({ "type": "executing", "data": { "node": node, "prompt_id": prompt_id } })
            .to_string(),
    )
}

pub fn control(kind: &str, data: Value) -> ScriptFrame {
    ScriptFrame::Text(json!({ "type": kind, "data": data }).to_string())
}

pub fn image_frame(format: u32, payload: &[u8]) -> ScriptFrame {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(payload);
    ScriptFrame::Binary(out)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn system_stats(State(state): State<Arc<FakeState>>) -> impl IntoResponse {
    state.probes.fetch_add(1, Ordering::SeqCst);
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(json!({ "system": { "os": "fake" }, "devices": [] })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "starting" })))
    }
}

async fn submit_prompt(
    State(state): State<Arc<FakeState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if state.fail_submit.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "type": "prompt_outputs_failed_validation" } })),
        );
    }
    state.submitted.lock().unwrap().push(body);
    state.submitted_notify.notify_one();
    (
        StatusCode::OK,
        Json(json!({ "prompt_id": PROMPT_ID, "number": 3, "node_errors": {} })),
    )
}

async fn queue(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> StatusCode {
    if let Some(ids) = body["delete"].as_array() {
        let mut deleted = state.deleted.lock().unwrap();
        deleted.extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    StatusCode::OK
}

async fn interrupt(State(state): State<Arc<FakeState>>) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn upload_image(
    State(state): State<Arc<FakeState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut name = None;
    let mut kind = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("image") => name = field.file_name().map(str::to_string),
            Some("type") => kind = field.text().await.ok(),
            _ => {}
        }
    }
    let name = name.unwrap_or_else(|| "unnamed.png".to_string());
    state.uploads.lock().unwrap().push(name.clone());
    Json(json!({ "name": name, "subfolder": "", "type": kind.unwrap_or_default() }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<FakeState>>) -> impl IntoResponse {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| play_script(socket, state))
}

async fn play_script(mut socket: WebSocket, state: Arc<FakeState>) {
    let _ = socket
        .send(Message::Text(
            json!({ "type": "status", "data": { "status": { "exec_info": { "queue_remaining": 0 } } } })
                .to_string()
                .into(),
        ))
        .await;

    state.submitted_notify.notified().await;

    let script = state.script.lock().unwrap().clone();
    for frame in script {
        let msg = match frame {
            ScriptFrame::Text(text) => Message::Text(text.into()),
            ScriptFrame::Binary(data) => Message::Binary(data.into()),
            ScriptFrame::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        };
        if socket.send(msg).await.is_err() {
            return;
        }
    }

    // Keep the connection open until the client hangs up.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
