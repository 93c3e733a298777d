//! Input discovery and dependency checks.
//!
//! Expands user-supplied paths into an ordered list of media files, and
//! reports which external dependencies are missing before a batch starts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use super::tools::{list_available_models, ToolLocator};
use super::{is_supported_media, MediaKind};

/// Maximum directory depth scanned for inputs
pub const MAX_SCAN_DEPTH: usize = 16;

/// Recursively collects supported media files under `dir`, sorted by path.
pub fn collect_media_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(MAX_SCAN_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry during scan");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_supported_media(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Expands files and directories into batch inputs, preserving argument order.
///
/// Directories contribute their media files in sorted order. Files with
/// unsupported extensions and missing paths are skipped with a warning.
/// Duplicates keep their first position.
pub fn expand_inputs<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut inputs: Vec<PathBuf> = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let found = if path.is_dir() {
            collect_media_files(path)
        } else if path.is_file() {
            if is_supported_media(path) {
                vec![path.to_path_buf()]
            } else {
                tracing::warn!("Skipping unsupported file {}", path.display());
                Vec::new()
            }
        } else {
            tracing::warn!("Skipping missing path {}", path.display());
            Vec::new()
        };

        for file in found {
            if !inputs.contains(&file) {
                inputs.push(file);
            }
        }
    }

    inputs
}

/// Result of probing every external dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub upscaler: Option<PathBuf>,
    pub media_tool: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub models: Vec<String>,
}

impl DependencyReport {
    /// Human-readable list of missing dependencies
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.upscaler.is_none() {
            missing.push(
                "Real-ESRGAN executable not found. Download realesrgan-ncnn-vulkan and place it \
                 in the bin folder or on PATH."
                    .to_string(),
            );
        } else if self.models_dir.is_none() {
            missing.push("Real-ESRGAN models directory not found.".to_string());
        } else if self.models.is_empty() {
            missing.push("No Real-ESRGAN models (.param + .bin pairs) installed.".to_string());
        }
        if self.media_tool.is_none() {
            missing.push("FFmpeg not found. Video processing will not be available.".to_string());
        }
        missing
    }

    /// Images can be processed
    pub fn can_upscale(&self) -> bool {
        self.upscaler.is_some() && !self.models.is_empty()
    }

    /// Videos can be processed
    pub fn can_process_video(&self) -> bool {
        self.can_upscale() && self.media_tool.is_some()
    }

    pub fn supports(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => self.can_upscale(),
            MediaKind::Video => self.can_process_video(),
        }
    }
}

/// Probes the upscaler, FFmpeg, models directory and installed models.
pub fn check_dependencies(locator: &ToolLocator) -> DependencyReport {
    let upscaler = locator.locate_upscaler();
    let models_dir = upscaler
        .as_deref()
        .and_then(|exe| locator.locate_models_dir(exe));
    let models = models_dir
        .as_deref()
        .map(list_available_models)
        .unwrap_or_default();

    DependencyReport {
        upscaler,
        media_tool: locator.locate_media_tool(),
        models_dir,
        models,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_collect_media_files_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("b.PNG"));
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("season1").join("ep01.mkv"));
        touch(&dir.path().join("notes.txt"));

        let files = collect_media_files(dir.path());
        assert_eq!(
            files,
            vec![
                dir.path().join("a.mp4"),
                dir.path().join("b.PNG"),
                dir.path().join("season1").join("ep01.mkv"),
            ]
        );
    }

    #[test]
    fn test_expand_inputs_skips_unsupported_and_duplicates() {
        let dir = tempdir().unwrap();
        let clip = dir.path().join("clip.mov");
        let photo = dir.path().join("shots").join("photo.jpg");
        let readme = dir.path().join("README.md");
        touch(&clip);
        touch(&photo);
        touch(&readme);

        let inputs = expand_inputs([
            clip.clone(),
            readme,
            dir.path().join("missing.png"),
            dir.path().join("shots"),
            photo.clone(),
        ]);
        assert_eq!(inputs, vec![clip, photo]);
    }

    #[test]
    fn test_dependency_report_lists_missing_tools() {
        let dir = tempdir().unwrap();
        let locator = ToolLocator::new(dir.path(), None);

        let report = check_dependencies(&locator);
        assert!(!report.can_upscale());
        let missing = report.missing();
        assert_eq!(missing.len(), 2);
        assert!(missing[0].contains("Real-ESRGAN"));
        assert!(missing[1].contains("FFmpeg"));
    }

    #[test]
    fn test_dependency_report_complete_install() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        touch(&bin.join("realesrgan-ncnn-vulkan"));
        touch(&bin.join(crate::core::tools::MEDIA_TOOL_CANDIDATES[0]));
        touch(&bin.join("models").join("realesrgan-x4plus.param"));
        touch(&bin.join("models").join("realesrgan-x4plus.bin"));

        let report = check_dependencies(&ToolLocator::new(dir.path(), None));
        assert!(report.missing().is_empty());
        assert!(report.supports(MediaKind::Video));
        assert_eq!(report.models, vec!["realesrgan-x4plus"]);
        assert_eq!(report.models_dir, Some(bin.join("models")));
    }

    #[test]
    fn test_images_only_without_ffmpeg() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("realesrgan-ncnn-vulkan"));
        touch(&dir.path().join("models").join("realesr-animevideov3-x2.param"));
        touch(&dir.path().join("models").join("realesr-animevideov3-x2.bin"));

        let report = check_dependencies(&ToolLocator::new(dir.path(), None));
        assert!(report.supports(MediaKind::Image));
        assert!(!report.supports(MediaKind::Video));
        assert_eq!(report.missing().len(), 1);
    }
}
