//! Handler for minting bearer tokens outside a login flow.

use axum::extract::State;
use axum::Json;
use instafit_core::error::CoreError;
use instafit_core::wardrobe::is_safe_key_segment;
use serde::{Deserialize, Serialize};

use crate::auth::jwt::generate_token;
use crate::error::{AppError, AppResult};
use crate::response::SuccessResponse;
use crate::state::AppState;

/// Request body for `POST /test-auth`.
#[derive(Debug, Deserialize)]
pub struct TestAuthRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Issue a token for an arbitrary user id.
///
/// Answers 404 unless `ENABLE_TEST_AUTH` is set, so production deployments
/// do not expose it.
pub async fn test_auth(
    State(state): State<AppState>,
    Json(input): Json<TestAuthRequest>,
) -> AppResult<Json<SuccessResponse<TokenResponse>>> {
    if !state.config.enable_test_auth {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "route",
            id: "/test-auth".into(),
        }));
    }

    // The user id becomes a storage key segment.
    if !is_safe_key_segment(&input.user_id) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Invalid user_id '{}'",
            input.user_id
        ))));
    }

    let token = generate_token(&input.user_id, &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("Token generation failed: {e}")))?;

    tracing::info!(user_id = %input.user_id, "Issued test token");

    Ok(Json(SuccessResponse::new(TokenResponse { token })))
}
