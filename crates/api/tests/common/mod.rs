//! Shared helpers for API integration tests.
//!
//! Builds the real router (same middleware stack as `main.rs`) over an
//! in-memory storage backend, a scripted segmenter and, when a test needs
//! one, an in-process fake generation engine.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get as route_get, post};
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

use instafit_api::auth::jwt::{generate_token, JwtConfig};
use instafit_api::config::{ServerConfig, StorageBackend};
use instafit_api::router::build_app_router;
use instafit_api::state::AppState;
use instafit_cloud::memory::MemoryStorage;
use instafit_comfyui::api::ComfyUIApi;
use instafit_comfyui::config::EngineConfig;
use instafit_comfyui::job::JobClient;
use instafit_comfyui::supervisor::EngineSupervisor;
use instafit_core::types::Metadata;
use instafit_core::wardrobe::SegmentedImage;
use instafit_pipeline::config::{PipelineConfig, SegmenterConfig};
use instafit_pipeline::pipeline::SegmentationPipeline;
use instafit_pipeline::segmenter::{SegmentationError, Segmenter};

pub const JWT_SECRET: &str = "api-test-secret-that-is-long-enough";
pub const STORAGE_URL: &str = "https://cdn.test";
/// An address nothing listens on.
pub const DEAD_ENGINE_URL: &str = "http://127.0.0.1:9";
pub const PROMPT_ID: &str = "api-prompt-1";
pub const TRYON_PIXELS: &[u8] = b"generated-tryon-image";

/// Job template with the three patch targets and an output node.
const WORKFLOW: &str = r#"{
  "21": { "class_type": "GroundingDinoSAMSegment", "inputs": { "prompt": "placeholder" } },
  "22": { "class_type": "LoadImage", "inputs": { "image": "garment.png" } },
  "27": { "class_type": "LoadImage", "inputs": { "image": "person.png" } },
  "30": { "class_type": "SaveImageWebsocket", "inputs": { "images": ["29", 0] } }
}"#;

// ---------------------------------------------------------------------------
// Scripted segmenter
// ---------------------------------------------------------------------------

/// Segmenter keyed on the upload's contents: `"fail"` is rejected, anything
/// else yields two garments named `<contents>-0` and `<contents>-1`.
#[derive(Default)]
pub struct StubSegmenter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Segmenter for StubSegmenter {
    async fn segment(&self, image: Bytes) -> Result<Vec<SegmentedImage>, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = String::from_utf8_lossy(&image).to_string();
        if name == "fail" {
            return Err(SegmentationError::Service("no person found".into()));
        }
        Ok((0..2)
            .map(|i| {
                let mut metadata = Metadata::new();
                metadata.insert("category".into(), "top".into());
                SegmentedImage {
                    id: format!("{name}-{i}"),
                    image: Bytes::from(format!("{name}-{i}-pixels")),
                    metadata,
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Test app
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub storage: Arc<MemoryStorage>,
    pub segmenter: Arc<StubSegmenter>,
    _workdir: TempDir,
}

/// Build a test `ServerConfig` pointing at `engine_url`.
pub fn test_config(engine_url: &str, workflow_path: PathBuf) -> ServerConfig {
    let mut engine = EngineConfig::for_url(engine_url);
    engine.probe_timeout = Duration::from_millis(500);
    engine.job_idle_timeout = Duration::from_secs(5);
    engine.workflow_path = workflow_path;

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        enable_test_auth: false,
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
            expiry_hours: 1,
        },
        engine,
        segmenter: SegmenterConfig::Http {
            base_url: "http://unused.test".to_string(),
            timeout: Duration::from_secs(1),
        },
        pipeline: PipelineConfig::default(),
        storage: StorageBackend::Memory {
            base_url: STORAGE_URL.to_string(),
        },
    }
}

/// Build the app; `tweak` adjusts the config before the state is assembled.
pub fn build_test_app_with(engine_url: &str, tweak: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let workdir = tempfile::tempdir().unwrap();
    let workflow_path = workdir.path().join("ImageWorkflow.json");
    std::fs::write(&workflow_path, WORKFLOW).unwrap();

    let mut config = test_config(engine_url, workflow_path);
    tweak(&mut config);

    let storage = Arc::new(MemoryStorage::new(STORAGE_URL));
    let segmenter = Arc::new(StubSegmenter::default());
    let pipeline = Arc::new(SegmentationPipeline::new(
        segmenter.clone(),
        storage.clone(),
        config.pipeline.clone(),
    ));

    let api = ComfyUIApi::new(config.engine.api_url.clone());
    let supervisor = Arc::new(EngineSupervisor::new(api.clone(), None, &config.engine));
    let jobs = Arc::new(JobClient::with_api(api, &config.engine));

    let state = AppState {
        config: Arc::new(config.clone()),
        storage: storage.clone(),
        pipeline,
        supervisor,
        jobs,
    };

    TestApp {
        router: build_app_router(state, &config),
        storage,
        segmenter,
        _workdir: workdir,
    }
}

pub fn build_test_app(engine_url: &str) -> TestApp {
    build_test_app_with(engine_url, |_| {})
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub fn bearer(user_id: &str) -> String {
    let config = JwtConfig {
        secret: JWT_SECRET.to_string(),
        expiry_hours: 1,
    };
    format!("Bearer {}", generate_token(user_id, &config).unwrap())
}

/// One multipart form part.
pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

const BOUNDARY: &str = "instafit-test-boundary";

pub fn multipart_body(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                name,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

pub fn multipart_request(uri: &str, auth: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let (content_type, body) = multipart_body(parts);
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::from(body)).unwrap()
}

pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn delete(app: &TestApp, uri: &str, auth: Option<&str>) -> Response<Body> {
    let mut builder = Request::delete(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &TestApp, uri: &str, body: Value) -> Response<Body> {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Fake generation engine
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EngineState {
    pub submitted: Mutex<Vec<Value>>,
    pub uploads: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    /// Hold the job open instead of finishing it.
    pub stall: std::sync::atomic::AtomicBool,
    submitted_notify: Notify,
}

/// Fake engine that completes every job with a PNG of [`TRYON_PIXELS`].
pub struct FakeEngine {
    pub addr: SocketAddr,
    pub state: Arc<EngineState>,
}

impl FakeEngine {
    pub async fn start() -> Self {
        let state = Arc::new(EngineState::default());
        let app = Router::new()
            .route("/system_stats", route_get(|| async { Json(json!({ "system": {} })) }))
            .route("/prompt", post(submit_prompt))
            .route("/upload/image", post(upload_image))
            .route("/queue", post(queue))
            .route("/interrupt", post(|| async { StatusCode::OK }))
            .route("/ws", route_get(ws_handler))
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

    pub fn submitted(&self) -> Vec<Value> {
        self.state.submitted.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }
}

async fn submit_prompt(
    State(state): State<Arc<EngineState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.submitted.lock().unwrap().push(body);
    state.submitted_notify.notify_one();
    Json(json!({ "prompt_id": PROMPT_ID, "number": 1 }))
}

async fn upload_image(
    State(state): State<Arc<EngineState>>,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut name = String::from("unnamed.png");
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("image") {
            if let Some(file_name) = field.file_name() {
                name = file_name.to_string();
            }
        }
    }
    state.uploads.lock().unwrap().push(name.clone());
    Json(json!({ "name": name, "subfolder": "", "type": "input" }))
}

async fn queue(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> StatusCode {
    if let Some(ids) = body["delete"].as_array() {
        let mut deleted = state.deleted.lock().unwrap();
        deleted.extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    StatusCode::OK
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<EngineState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_job(socket, state))
}

fn executing(node: Option<&str>) -> Message {
    Message::Text(
        json!({ "type": "executing", "data": { "node": node, "prompt_id": PROMPT_ID } })
            .to_string()
            .into(),
    )
}

async fn run_job(mut socket: WebSocket, state: Arc<EngineState>) {
    state.submitted_notify.notified().await;

    if !state.stall.load(Ordering::SeqCst) {
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.extend_from_slice(&2u32.to_be_bytes());
        frame.extend_from_slice(TRYON_PIXELS);

        for msg in [
            executing(Some("30")),
            Message::Binary(frame.into()),
            executing(None),
        ] {
            if socket.send(msg).await.is_err() {
                return;
            }
        }
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
