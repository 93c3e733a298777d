//! Test doubles for pipeline and batch tests.
//!
//! [`FakeToolRunner`] never spawns anything. It records each invocation and
//! reproduces the filesystem effects of the real tools: FFmpeg writes a frame
//! sequence, an audio file or the final video; the upscaler writes its `-o`
//! target.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ffmpeg::frame_file_name;
use super::jobs::{ExecutorContext, JobEvent};
use super::process::{SharedToolRunner, ToolInvocation, ToolOutput, ToolRunner};
use super::tools::{ToolLocator, MEDIA_TOOL_CANDIDATES};
use super::{CoreError, CoreResult};

#[derive(Default)]
pub(crate) struct FakeToolRunner {
    invocations: Mutex<Vec<ToolInvocation>>,
    upscales: AtomicUsize,
    frame_count: usize,
    with_audio: bool,
    fail_extraction: bool,
    fail_reassembly: bool,
    /// Reassembly deletes the job workspace, so its cleanup fails
    remove_workspace_on_reassembly: bool,
    /// 1-based frame indices the upscaler fails on
    failing_frames: Vec<usize>,
    /// Upscaler inputs containing this text fail
    failing_marker: Option<String>,
    /// Cancel the token after this many upscaler calls
    cancel_after: Option<(usize, CancellationToken)>,
    /// Every invocation takes this long unless cancelled
    delay: Option<Duration>,
    /// Delays ignore cancellation, like a process that will not exit
    uncancellable: bool,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self {
            frame_count: 3,
            with_audio: true,
            ..Self::default()
        }
    }

    pub fn frames(mut self, count: usize) -> Self {
        self.frame_count = count;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.with_audio = false;
        self
    }

    pub fn failing_extraction(mut self) -> Self {
        self.fail_extraction = true;
        self
    }

    pub fn failing_reassembly(mut self) -> Self {
        self.fail_reassembly = true;
        self
    }

    pub fn removing_workspace_on_reassembly(mut self) -> Self {
        self.remove_workspace_on_reassembly = true;
        self
    }

    pub fn failing_frames(mut self, frames: &[usize]) -> Self {
        self.failing_frames = frames.to_vec();
        self
    }

    pub fn failing_inputs_containing(mut self, marker: &str) -> Self {
        self.failing_marker = Some(marker.to_string());
        self
    }

    pub fn cancel_after_upscales(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ignoring_cancellation(mut self) -> Self {
        self.uncancellable = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count_where(&self, predicate: impl Fn(&ToolInvocation) -> bool) -> usize {
        self.invocations().iter().filter(|inv| predicate(inv)).count()
    }

    fn simulate_media_tool(&self, invocation: &ToolInvocation) -> ToolOutput {
        let target = invocation.last_arg().map(Path::to_path_buf).unwrap_or_default();

        if invocation.has_arg("rgb24") {
            if self.fail_extraction {
                return failure(1, "Invalid data found when processing input");
            }
            let frames_dir = target.parent().map(Path::to_path_buf).unwrap_or_default();
            for index in 1..=self.frame_count {
                std::fs::write(frames_dir.join(frame_file_name(index)), b"frame").unwrap();
            }
            return ok();
        }

        if invocation.has_arg("-vn") {
            if !self.with_audio {
                return failure(1, "Output file #0 does not contain any stream");
            }
            std::fs::write(&target, b"audio").unwrap();
            return ok();
        }

        if self.fail_reassembly {
            return failure(1, "Error while opening encoder");
        }
        std::fs::write(&target, b"video").unwrap();

        if self.remove_workspace_on_reassembly {
            let frames = invocation.flag_value("-i").map(PathBuf::from).unwrap_or_default();
            if let Some(root) = frames.parent().and_then(Path::parent) {
                std::fs::remove_dir_all(root).unwrap();
            }
        }
        ok()
    }

    fn simulate_upscaler(&self, invocation: &ToolInvocation) -> ToolOutput {
        let call = self.upscales.fetch_add(1, Ordering::SeqCst) + 1;
        let input = invocation
            .flag_value("-i")
            .map(PathBuf::from)
            .unwrap_or_default();
        let output = invocation
            .flag_value("-o")
            .map(PathBuf::from)
            .unwrap_or_default();

        let fails_by_frame = self
            .failing_frames
            .iter()
            .any(|index| input.ends_with(frame_file_name(*index)));
        let fails_by_marker = self
            .failing_marker
            .as_deref()
            .map(|marker| input.to_string_lossy().contains(marker))
            .unwrap_or(false);

        let result = if fails_by_frame || fails_by_marker {
            failure(255, "vkQueueSubmit failed")
        } else {
            std::fs::write(&output, b"upscaled").unwrap();
            ok()
        };

        if let Some((after, token)) = &self.cancel_after {
            if call == *after {
                token.cancel();
            }
        }
        result
    }
}

#[async_trait]
impl ToolRunner for FakeToolRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> CoreResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.invocations.lock().unwrap().push(invocation.clone());

        if let Some(delay) = self.delay {
            if self.uncancellable {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                }
            }
        }

        if is_media_tool(invocation) {
            Ok(self.simulate_media_tool(invocation))
        } else {
            Ok(self.simulate_upscaler(invocation))
        }
    }
}

fn ok() -> ToolOutput {
    ToolOutput {
        exit_code: Some(0),
        stderr: String::new(),
    }
}

fn failure(code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        exit_code: Some(code),
        stderr: stderr.to_string(),
    }
}

pub(crate) fn is_media_tool(invocation: &ToolInvocation) -> bool {
    invocation
        .program
        .file_stem()
        .map(|stem| stem == "ffmpeg")
        .unwrap_or(false)
}

pub(crate) fn is_reassembly(invocation: &ToolInvocation) -> bool {
    is_media_tool(invocation) && invocation.has_arg("-framerate")
}

pub(crate) fn is_upscale(invocation: &ToolInvocation) -> bool {
    !is_media_tool(invocation)
}

// =============================================================================
// Fixtures
// =============================================================================

/// Directory laid out like a portable install:
/// `bin/realesrgan-ncnn-vulkan`, `bin/ffmpeg`, `bin/models/<id>.{param,bin}`.
pub(crate) fn install_tools(models: &[&str], with_media_tool: bool) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    let models_dir = bin.join("models");
    std::fs::create_dir_all(&models_dir).unwrap();

    std::fs::write(bin.join("realesrgan-ncnn-vulkan"), b"").unwrap();
    if with_media_tool {
        std::fs::write(bin.join(MEDIA_TOOL_CANDIDATES[0]), b"").unwrap();
    }
    for id in models {
        std::fs::write(models_dir.join(format!("{id}.param")), b"").unwrap();
        std::fs::write(models_dir.join(format!("{id}.bin")), b"").unwrap();
    }
    dir
}

pub(crate) fn context(
    install_dir: &Path,
    runner: &Arc<FakeToolRunner>,
    temp_root: &Path,
) -> ExecutorContext {
    let runner: SharedToolRunner = runner.clone();
    ExecutorContext {
        locator: Arc::new(ToolLocator::new(install_dir, None)),
        runner,
        temp_root: temp_root.to_path_buf(),
    }
}

/// Collects everything currently buffered in the channel
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
