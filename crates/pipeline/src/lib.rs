//! Wardrobe segmentation pipeline.
//!
//! Each uploaded photo is sent to a [`segmenter::Segmenter`]; every garment
//! it returns is uploaded to object storage. Files are processed
//! concurrently under a bounded [`tokio::sync::Semaphore`] and the per-file
//! results are folded into a single [`pipeline::PipelineOutcome`].

pub mod config;
pub mod http;
pub mod pipeline;
pub mod process;
pub mod segmenter;
