//! ComfyUI client library for virtual try-on jobs.
//!
//! Provides typed control-frame parsing, the job template patcher, the
//! submit-then-stream job client, HTTP API wrappers, and the engine
//! supervisor that probes and lazily starts a local ComfyUI instance.

pub mod api;
pub mod client;
pub mod config;
pub mod job;
pub mod messages;
pub mod session;
pub mod supervisor;
pub mod template;
