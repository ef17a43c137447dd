//! Shared response envelope for API handlers.
//!
//! Successful JSON responses carry `"success": true` next to their payload
//! fields, mirroring the `{ "success": false, ... }` error body produced by
//! [`AppError`](crate::error::AppError).

use serde::Serialize;

/// Standard `{ "success": true, ...T }` response envelope.
///
/// `T` must serialize as a map; its fields are flattened into the envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(SuccessResponse::new(DeleteResponse { cloth_id })))
/// ```
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
