//! Anime Upscaler Core Library
//!
//! Batch orchestration for AI super-resolution of images and videos.
//! Pixel work is delegated to an external upscaler (Real-ESRGAN ncnn build)
//! and container work to FFmpeg; this crate sequences those invocations,
//! bounds concurrency, aggregates progress and guarantees cleanup of
//! per-job temporary state.

pub mod core;
pub mod logging;
