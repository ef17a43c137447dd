//! Wardrobe domain types and object-storage key construction.

use bytes::Bytes;
use serde::Serialize;

use crate::error::CoreError;
use crate::types::Metadata;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Top-level prefix for every wardrobe object.
pub const WARDROBE_PREFIX: &str = "wardrobe";

/// Content type recorded for stored garment images.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// File extension used in wardrobe object keys.
pub const IMAGE_EXTENSION: &str = "jpg";

/// Upper bound on a user id or item id used as a key segment.
pub const MAX_KEY_SEGMENT_LENGTH: usize = 128;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One garment cut out of an uploaded photo by the segmentation service.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedImage {
    pub id: String,
    pub image: Bytes,
    pub metadata: Metadata,
}

/// A stored garment, as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub image_url: String,
    pub clothing_id: String,
    pub metadata: Metadata,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Whether `segment` can be embedded in an object key as a single path
/// component.
pub fn is_safe_key_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= MAX_KEY_SEGMENT_LENGTH
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Build `wardrobe/{user_id}/{item_id}.jpg`.
pub fn wardrobe_object_key(user_id: &str, item_id: &str) -> Result<String, CoreError> {
    if !is_safe_key_segment(user_id) {
        return Err(CoreError::Validation(format!(
            "Invalid user id for storage key: '{user_id}'"
        )));
    }
    if !is_safe_key_segment(item_id) {
        return Err(CoreError::Validation(format!(
            "Invalid item id for storage key: '{item_id}'"
        )));
    }
    Ok(format!(
        "{WARDROBE_PREFIX}/{user_id}/{item_id}.{IMAGE_EXTENSION}"
    ))
}

/// Derive a segment id from an archive or response filename.
///
/// The id is the file stem (`"a1b2.png"` -> `"a1b2"`). A missing or empty
/// stem yields a fresh UUID v4.
pub fn segment_id_from_filename(filename: Option<&str>) -> String {
    let stem = filename
        .map(|name| name.rsplit('/').next().unwrap_or(name))
        .map(|base| match base.rfind('.') {
            Some(0) | None => base,
            Some(idx) => &base[..idx],
        })
        .filter(|stem| !stem.is_empty());

    match stem {
        Some(stem) => stem.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
