//! Handlers for the `/wardrobe` resource.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use instafit_core::wardrobe::{wardrobe_object_key, UploadResult};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::SuccessResponse;
use crate::state::AppState;

/// Multipart field carrying the garment photos.
const CLOTHES_FIELD: &str = "clothes";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AddClothesResponse {
    pub count: usize,
    pub items: Vec<UploadResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteClothResponse {
    #[serde(rename = "clothId")]
    pub cloth_id: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /wardrobe/add
///
/// Segments every `clothes` photo into garments and stores each one under
/// the caller's wardrobe prefix.
pub async fn add_clothes(
    user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<SuccessResponse<AddClothesResponse>>> {
    let mut files: Vec<Bytes> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(CLOTHES_FIELD) {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        if data.is_empty() {
            return Err(AppError::BadRequest(format!(
                "File {} is empty",
                files.len()
            )));
        }
        files.push(data);
    }

    // Dropping the request (client disconnect, timeout) cancels the units.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state
        .pipeline
        .process(&user.user_id, files, &cancel)
        .await?;
    let batch = outcome.resolve(state.pipeline.config().response_contract)?;

    tracing::info!(
        user_id = %user.user_id,
        count = batch.items.len(),
        warnings = batch.warnings.len(),
        "Wardrobe upload complete"
    );

    Ok(Json(SuccessResponse::new(AddClothesResponse {
        count: batch.items.len(),
        items: batch.items,
        warnings: batch.warnings,
    })))
}

/// DELETE /wardrobe/{cloth_id}
pub async fn delete_cloth(
    user: AuthUser,
    State(state): State<AppState>,
    Path(cloth_id): Path<String>,
) -> AppResult<Json<SuccessResponse<DeleteClothResponse>>> {
    let key = wardrobe_object_key(&user.user_id, &cloth_id)?;
    state.storage.delete(&key).await?;

    tracing::info!(user_id = %user.user_id, cloth_id = %cloth_id, "Garment deleted");

    Ok(Json(SuccessResponse::new(DeleteClothResponse { cloth_id })))
}
