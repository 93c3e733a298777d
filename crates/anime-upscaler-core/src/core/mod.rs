//! Anime Upscaler Core Engine
//!
//! Handles tool resolution, per-job pipelines, batch dispatch and settings.

pub mod batch;
pub mod discovery;
pub mod ffmpeg;
pub mod jobs;
pub mod process;
pub mod settings;
pub mod tools;
pub mod workspace;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
pub(crate) mod testing;
