//! In-process object storage.
//!
//! Used for local development without R2 credentials and by tests that need
//! to inspect what was stored or inject failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::storage::{public_url, ObjectStorage, StorageError};

/// A stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// [`ObjectStorage`] that keeps objects in a map.
pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Make every upload or delete of `key` fail.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into());
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// All stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn should_fail(&self, key: &str) -> bool {
        self.failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if self.should_fail(key) {
            return Err(StorageError::Upload {
                key: key.to_string(),
                message: "injected failure".into(),
            });
        }
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(public_url(&self.base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.should_fail(key) {
            return Err(StorageError::Delete {
                key: key.to_string(),
                message: "injected failure".into(),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
