pub mod auth;
pub mod health;
pub mod tryon;
pub mod wardrobe;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                                          service + engine status (public)
/// /test-auth                                       mint a token (when enabled)
///
/// /wardrobe/add                                    segment and store garments (POST, auth)
/// /wardrobe/{cloth_id}                             delete a stored garment (DELETE, auth)
///
/// /virtual-tryon                                   run a try-on job (POST, auth)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .nest("/wardrobe", wardrobe::router())
        .merge(tryon::router())
}
