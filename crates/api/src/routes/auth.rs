//! Route definitions for token issuance.

use axum::routing::post;
use axum::Router;

use crate::handlers::auth;
use crate::state::AppState;

/// ```text
/// POST /test-auth  -> test_auth (404 unless ENABLE_TEST_AUTH)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/test-auth", post(auth::test_auth))
}
