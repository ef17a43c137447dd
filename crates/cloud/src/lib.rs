//! Object storage for wardrobe images.
//!
//! [`storage::ObjectStorage`] is the seam the segmentation pipeline and the
//! HTTP handlers upload through. [`r2::R2Storage`] talks to Cloudflare R2
//! over the S3 API; [`memory::MemoryStorage`] keeps objects in process.

pub mod memory;
pub mod r2;
pub mod storage;
