//! Storage collaborator trait and errors.

use async_trait::async_trait;
use bytes::Bytes;
use instafit_core::error::CoreError;

/// Errors returned by an [`ObjectStorage`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to upload '{key}': {message}")]
    Upload { key: String, message: String },

    #[error("Failed to delete '{key}': {message}")]
    Delete { key: String, message: String },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::Collaborator(err.to_string())
    }
}

/// Blob store addressed by string keys.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `key` and return its public URL.
    ///
    /// Ownership of the bytes moves into the call.
    async fn upload(&self, data: Bytes, key: &str, content_type: &str)
        -> Result<String, StorageError>;

    /// Remove the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Join a public base URL and an object key.
pub fn public_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_joins_without_double_slash() {
        assert_eq!(
            public_url("https://cdn.example.com/", "wardrobe/u/1.jpg"),
            "https://cdn.example.com/wardrobe/u/1.jpg"
        );
        assert_eq!(
            public_url("https://cdn.example.com", "/wardrobe/u/1.jpg"),
            "https://cdn.example.com/wardrobe/u/1.jpg"
        );
    }

    #[test]
    fn storage_errors_are_collaborator_errors() {
        let err = StorageError::Upload {
            key: "wardrobe/u/1.jpg".into(),
            message: "403 Forbidden".into(),
        };
        match CoreError::from(err) {
            CoreError::Collaborator(msg) => assert!(msg.contains("wardrobe/u/1.jpg")),
            other => panic!("Expected Collaborator, got {other:?}"),
        }
    }
}
