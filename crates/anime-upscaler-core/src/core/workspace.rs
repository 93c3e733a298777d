//! Per-job temporary workspace.
//!
//! A video job extracts frames into `frames/` and writes upscaled frames into
//! `upscaled/` under a unique root. The root is removed by [`Workspace::destroy`]
//! on every normal exit path; if the owning job is dropped mid-pipeline (task
//! aborted) the inner [`TempDir`] removes it on drop.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::ffmpeg::{frame_file_name, FRAME_EXTENSION, FRAME_PREFIX};
use super::{CoreError, CoreResult};

/// Prefix for workspace roots inside the temp base directory
pub const WORKSPACE_PREFIX: &str = "anime_upscaler_";

/// Temporary directory tree owned by one video job
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
    frames_dir: PathBuf,
    upscaled_dir: PathBuf,
}

impl Workspace {
    /// Creates `<base>/anime_upscaler_<job>_XXXX/{frames,upscaled}`.
    pub fn create(base: &Path, job_id: &str) -> CoreResult<Self> {
        std::fs::create_dir_all(base)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{WORKSPACE_PREFIX}{job_id}_"))
            .tempdir_in(base)?;

        let root = dir.path().to_path_buf();
        let frames_dir = root.join("frames");
        let upscaled_dir = root.join("upscaled");
        std::fs::create_dir_all(&frames_dir)?;
        std::fs::create_dir_all(&upscaled_dir)?;

        Ok(Self {
            dir: Some(dir),
            root,
            frames_dir,
            upscaled_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn upscaled_dir(&self) -> &Path {
        &self.upscaled_dir
    }

    /// Location for the temporary audio track
    pub fn audio_path(&self) -> PathBuf {
        self.root.join("audio.mka")
    }

    /// Extracted frames in ascending index order
    pub fn extracted_frames(&self) -> CoreResult<Vec<PathBuf>> {
        list_frames(&self.frames_dir)
    }

    /// Renumbers upscaled frames into a gap-free `frame_000001..` sequence.
    ///
    /// Returns the number of frames in the compacted sequence.
    pub fn compact_upscaled_frames(&self) -> CoreResult<usize> {
        let frames = list_frames(&self.upscaled_dir)?;

        // Indices are distinct and ascending, so the k-th frame's index is at
        // least k and no rename clobbers a frame that has not been moved yet.
        for (i, frame) in frames.iter().enumerate() {
            let target = self.upscaled_dir.join(frame_file_name(i + 1));
            if *frame != target {
                std::fs::rename(frame, &target)?;
            }
        }

        Ok(frames.len())
    }

    /// Removes the workspace tree.
    ///
    /// Failures come back as `CleanupWarning` for the caller to log.
    pub fn destroy(mut self) -> CoreResult<()> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(|e| CoreError::CleanupWarning {
                path: self.root.display().to_string(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// `*.png` files of a frame directory in ascending frame index order.
///
/// The index is compared numerically: FFmpeg's `%06d` grows to seven digits
/// at frame 1,000,000, where lexical order breaks.
fn list_frames(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case(FRAME_EXTENSION))
                    .unwrap_or(false)
        })
        .collect();
    frames.sort_by(|a, b| {
        let index = |p: &Path| frame_index(p).unwrap_or(u64::MAX);
        index(a).cmp(&index(b)).then_with(|| a.cmp(b))
    });
    Ok(frames)
}

/// Numeric index of `frame_<n>.png`; unnumbered files sort last.
fn frame_index(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix(FRAME_PREFIX))
        .and_then(|digits| digits.parse().ok())
}
