//! Route definitions for the `/wardrobe` resource.

use axum::routing::{delete, post};
use axum::Router;

use crate::handlers::wardrobe;
use crate::state::AppState;

/// Routes mounted at `/wardrobe`.
///
/// ```text
/// POST   /add          -> add_clothes (requires auth)
/// DELETE /{cloth_id}   -> delete_cloth (requires auth)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/add", post(wardrobe::add_clothes))
        .route("/{cloth_id}", delete(wardrobe::delete_cloth))
}
