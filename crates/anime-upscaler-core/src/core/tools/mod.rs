//! External Tool Locator
//!
//! Resolves the upscaler and FFmpeg executables and the upscaler's models
//! directory. Executables are probed in the working directory, then its
//! `bin/` subdirectory, then each entry of `PATH`; the first candidate that
//! is a regular file wins. Locations are resolved per job and never cached,
//! so a tool reinstalled mid-batch is picked up by the next job.

mod models;
mod upscaler;

pub use models::*;
pub use upscaler::*;

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{CoreError, CoreResult, ToolKind};

/// Executable names tried for the upscaler, in order
pub const UPSCALER_CANDIDATES: &[&str] = &[
    "realesrgan-ncnn-vulkan",
    "realesrgan-ncnn-vulkan.exe",
    "realsr-esrgan",
    "realsr-esrgan.exe",
];

/// Executable names tried for the media toolkit
#[cfg(target_os = "windows")]
pub const MEDIA_TOOL_CANDIDATES: &[&str] = &["ffmpeg.exe"];

/// Executable names tried for the media toolkit
#[cfg(not(target_os = "windows"))]
pub const MEDIA_TOOL_CANDIDATES: &[&str] = &["ffmpeg"];

/// Resolved upscaler installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalToolLocation {
    pub executable_path: PathBuf,
    pub models_directory: PathBuf,
}

/// Probes the filesystem for external tools
#[derive(Debug, Clone)]
pub struct ToolLocator {
    working_dir: PathBuf,
    search_path: Option<OsString>,
    upscaler_override: Option<PathBuf>,
    media_tool_override: Option<PathBuf>,
}

impl ToolLocator {
    /// Creates a locator rooted at `working_dir` searching `search_path`
    /// (a `PATH`-style list) after the local candidates.
    pub fn new(working_dir: impl Into<PathBuf>, search_path: Option<OsString>) -> Self {
        Self {
            working_dir: working_dir.into(),
            search_path,
            upscaler_override: None,
            media_tool_override: None,
        }
    }

    /// Locator for the current process: its working directory and `PATH`.
    pub fn from_env() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(working_dir, std::env::var_os("PATH"))
    }

    /// Prefer an explicitly configured upscaler executable
    pub fn with_upscaler_override(mut self, path: Option<PathBuf>) -> Self {
        self.upscaler_override = path;
        self
    }

    /// Prefer an explicitly configured FFmpeg executable
    pub fn with_media_tool_override(mut self, path: Option<PathBuf>) -> Self {
        self.media_tool_override = path;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn locate_upscaler(&self) -> Option<PathBuf> {
        self.locate(ToolKind::Upscaler, self.upscaler_override.as_deref(), UPSCALER_CANDIDATES)
    }

    pub fn locate_media_tool(&self) -> Option<PathBuf> {
        self.locate(
            ToolKind::MediaTool,
            self.media_tool_override.as_deref(),
            MEDIA_TOOL_CANDIDATES,
        )
    }

    /// Finds the models directory belonging to an upscaler executable.
    ///
    /// Probe order: `<exe dir>/models`, `<exe dir>/../models`,
    /// `<cwd>/models`, `<cwd>/bin/models`.
    pub fn locate_models_dir(&self, upscaler_path: &Path) -> Option<PathBuf> {
        let exe_dir = upscaler_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());

        let candidates = [
            exe_dir.join("models"),
            exe_dir.join("..").join("models"),
            self.working_dir.join("models"),
            self.working_dir.join("bin").join("models"),
        ];

        candidates.into_iter().find(|dir| probe_dir(dir))
    }

    /// Resolves the upscaler and its models directory, failing with
    /// `MissingTool` / `MissingModel` before anything is spawned.
    pub fn resolve_upscaler(&self) -> CoreResult<ExternalToolLocation> {
        let executable_path = self.locate_upscaler().ok_or(CoreError::MissingTool {
            tool: ToolKind::Upscaler,
        })?;

        let models_directory = self.locate_models_dir(&executable_path).ok_or_else(|| {
            CoreError::MissingModel(
                "Real-ESRGAN models directory not found. Please ensure models are installed."
                    .to_string(),
            )
        })?;

        Ok(ExternalToolLocation {
            executable_path,
            models_directory,
        })
    }

    pub fn resolve_media_tool(&self) -> CoreResult<PathBuf> {
        self.locate_media_tool().ok_or(CoreError::MissingTool {
            tool: ToolKind::MediaTool,
        })
    }

    /// Model id a job configured with `requested` would actually run.
    ///
    /// Falls back to `requested` itself whenever resolution is impossible, so
    /// naming never fails; the job reports the real error when it runs.
    pub fn effective_model_id(&self, requested: &str) -> String {
        self.resolve_upscaler()
            .ok()
            .and_then(|location| resolve_model(requested, &location.models_directory).ok())
            .map(|resolution| resolution.asset.id)
            .unwrap_or_else(|| requested.to_string())
    }

    fn locate(
        &self,
        tool: ToolKind,
        override_path: Option<&Path>,
        candidates: &[&str],
    ) -> Option<PathBuf> {
        if let Some(path) = override_path {
            if probe_file(path) {
                return Some(path.to_path_buf());
            }
            tracing::warn!(
                "Configured {} path {} does not exist, searching default locations",
                tool,
                path.display()
            );
        }

        let local_dirs = [self.working_dir.clone(), self.working_dir.join("bin")];
        for dir in &local_dirs {
            for name in candidates {
                let path = dir.join(name);
                if probe_file(&path) {
                    return Some(path);
                }
            }
        }

        let search_path = self.search_path.as_ref()?;
        for name in candidates {
            for dir in std::env::split_paths(search_path) {
                let path = dir.join(name);
                if probe_file(&path) {
                    return Some(path);
                }
            }
        }

        None
    }
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Regular-file check; I/O errors other than "not found" count as absent
/// and are logged.
fn probe_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file(),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Could not probe {}: {}", path.display(), e);
            false
        }
    }
}

fn probe_dir(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Could not probe {}: {}", path.display(), e);
            false
        }
    }
}
