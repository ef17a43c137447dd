use std::sync::Arc;

use instafit_cloud::storage::ObjectStorage;
use instafit_comfyui::job::JobClient;
use instafit_comfyui::supervisor::EngineSupervisor;
use instafit_pipeline::pipeline::SegmentationPipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every field is behind an `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Object storage holding wardrobe images.
    pub storage: Arc<dyn ObjectStorage>,
    /// Segment-and-upload pipeline for wardrobe uploads.
    pub pipeline: Arc<SegmentationPipeline>,
    /// Owner of the generation engine's lifecycle.
    pub supervisor: Arc<EngineSupervisor>,
    /// Job submission client for the generation engine.
    pub jobs: Arc<JobClient>,
}
