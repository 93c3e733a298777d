//! Anime Upscaler Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CoreError;

// =============================================================================
// ID Types
// =============================================================================

/// Job unique identifier (ULID)
pub type JobId = String;

// =============================================================================
// Media Types
// =============================================================================

/// Image extensions accepted as batch inputs (lowercase, without dot)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Video extensions accepted as batch inputs (lowercase, without dot)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv"];

/// Kind of pipeline a job runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a path by extension.
    ///
    /// Anything that is not a known video container runs the image pipeline.
    pub fn from_path(path: &Path) -> Self {
        match lowercase_extension(path) {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

/// Returns true when the path has an image or video extension we accept.
pub fn is_supported_media(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| {
            IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Output format for upscaled images
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Value passed to the upscaler's `-f` flag and used as file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(CoreError::ValidationError(format!(
                "Unsupported image format '{other}' (expected jpg, png or webp)"
            ))),
        }
    }
}

/// Upscale factor implied by a model id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFactor {
    X2,
    X3,
    X4,
}

impl ScaleFactor {
    /// Derives the scale from a model id.
    ///
    /// Substrings are tested in the order `x2`, `x3`, `x4`; the first match
    /// wins and ids without any marker default to `x4`.
    pub fn from_model_id(model_id: &str) -> Self {
        if model_id.contains("x2") {
            ScaleFactor::X2
        } else if model_id.contains("x3") {
            ScaleFactor::X3
        } else {
            ScaleFactor::X4
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleFactor::X2 => "x2",
            ScaleFactor::X3 => "x3",
            ScaleFactor::X4 => "x4",
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// External Tools
// =============================================================================

/// External executables the pipelines depend on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    /// AI super-resolution executable
    Upscaler,
    /// Media toolkit used for demuxing and muxing
    MediaTool,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Upscaler => f.write_str("Real-ESRGAN"),
            ToolKind::MediaTool => f.write_str("FFmpeg"),
        }
    }
}

// =============================================================================
// Time Formatting
// =============================================================================

/// Formats a duration as `MM:SS`, or `HH:MM:SS` once it reaches an hour.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
