use axum::routing::post;
use axum::Router;

use crate::handlers::tryon;
use crate::state::AppState;

/// ```text
/// POST /virtual-tryon  -> virtual_tryon (requires auth)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/virtual-tryon", post(tryon::virtual_tryon))
}
