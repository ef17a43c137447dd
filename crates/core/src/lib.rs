//! Shared building blocks for the Instafit backend.
//!
//! Holds the cross-crate error taxonomy, the wardrobe domain types that flow
//! between the segmentation pipeline and the storage layer, and the helpers
//! that build object-storage keys.

pub mod error;
pub mod types;
pub mod wardrobe;
