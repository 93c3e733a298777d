//! Job Executor
//!
//! Runs one job's pipeline and reports through the job event channel.
//!
//! Image jobs are a single upscaler call. Video jobs run
//! extract -> upscale (frame by frame) -> reassemble inside a [`Workspace`]
//! that is destroyed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::ffmpeg::{EncodeSettings, FFmpegCommands, FRAME_EXTENSION};
use crate::core::process::{SharedToolRunner, ToolInvocation, ToolOutput};
use crate::core::settings::JobSettings;
use crate::core::tools::{resolve_model, ExternalToolLocation, ModelAsset, ToolLocator};
use crate::core::workspace::Workspace;
use crate::core::{is_supported_media, CoreError, CoreResult, JobId, MediaKind, ToolKind};

use super::{Job, JobEvent, JobEventKind, JobStatus, LogLevel};

/// Collaborators shared by every job of a batch
#[derive(Clone)]
pub struct ExecutorContext {
    pub locator: Arc<ToolLocator>,
    pub runner: SharedToolRunner,
    /// Base directory for video workspaces
    pub temp_root: PathBuf,
}

/// Executes a single job
pub struct JobExecutor {
    job_id: JobId,
    input: PathBuf,
    output: PathBuf,
    kind: MediaKind,
    settings: JobSettings,
    context: ExecutorContext,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobExecutor {
    pub fn new(
        job: &Job,
        settings: JobSettings,
        context: ExecutorContext,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            input: job.input_path.clone(),
            output: job.output_path.clone(),
            kind: job.kind,
            settings,
            context,
            cancel,
            events,
        }
    }

    /// Runs the pipeline to a terminal status.
    ///
    /// Emits at most one `Error`, and `Finished` exactly once as the last event.
    pub async fn run(self) -> JobStatus {
        tracing::info!(
            "Job {} started: {} -> {}",
            self.job_id,
            self.input.display(),
            self.output.display()
        );

        let result = if !is_supported_media(&self.input) {
            Err(CoreError::UnsupportedInput(self.input.display().to_string()))
        } else {
            match self.kind {
                MediaKind::Image => self.run_image().await,
                MediaKind::Video => self.run_video().await,
            }
        };

        let status = match result {
            Ok(output) => {
                tracing::info!("Job {} completed: {}", self.job_id, output.display());
                self.emit(JobEventKind::Result(output));
                JobStatus::Succeeded
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("Job {} cancelled", self.job_id);
                self.log(LogLevel::Info, "Processing cancelled".to_string());
                JobStatus::Cancelled
            }
            Err(e) => {
                tracing::error!("Job {} failed: {}", self.job_id, e);
                self.emit(JobEventKind::Error(e.to_string()));
                JobStatus::Failed
            }
        };

        self.emit(JobEventKind::Finished(status));
        status
    }

    // =========================================================================
    // Image pipeline
    // =========================================================================

    async fn run_image(&self) -> CoreResult<PathBuf> {
        let location = self.context.locator.resolve_upscaler()?;
        let model = self.resolve_model(&location)?;
        self.check_cancelled()?;

        ensure_parent_dir(&self.output)?;

        let invocation = self
            .settings
            .upscale_options(&model.id, self.settings.image_format.as_str())
            .invocation(&location.executable_path, &self.input, &self.output);

        let output = self.execute(&invocation).await?;
        if !output.success() {
            return Err(CoreError::ToolInvocationFailure {
                tool: ToolKind::Upscaler,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(self.output.clone())
    }

    // =========================================================================
    // Video pipeline
    // =========================================================================

    async fn run_video(&self) -> CoreResult<PathBuf> {
        let location = self.context.locator.resolve_upscaler()?;
        let ffmpeg = FFmpegCommands::new(self.context.locator.resolve_media_tool()?);
        let model = self.resolve_model(&location)?;
        self.check_cancelled()?;

        let workspace = Workspace::create(&self.context.temp_root, &self.job_id)?;
        tracing::debug!("Job {}: workspace {}", self.job_id, workspace.root().display());

        let result = self
            .run_video_stages(&workspace, &location, &ffmpeg, &model)
            .await;

        let cleanup = workspace.destroy().or_else(|e| self.tolerate(e));
        let output = result?;
        cleanup?;
        Ok(output)
    }

    async fn run_video_stages(
        &self,
        workspace: &Workspace,
        location: &ExternalToolLocation,
        ffmpeg: &FFmpegCommands,
        model: &ModelAsset,
    ) -> CoreResult<PathBuf> {
        let total = self.extract_frames(workspace, ffmpeg).await?;
        self.upscale_frames(workspace, location, model, total).await?;

        self.check_cancelled()?;
        self.reassemble(workspace, ffmpeg, total).await
    }

    /// Extract stage; returns the number of frames on disk.
    async fn extract_frames(
        &self,
        workspace: &Workspace,
        ffmpeg: &FFmpegCommands,
    ) -> CoreResult<usize> {
        self.log(LogLevel::Info, "Extracting frames".to_string());

        let output = self
            .execute(&ffmpeg.extract_frames(&self.input, workspace.frames_dir()))
            .await?;
        if !output.success() {
            return Err(CoreError::ToolInvocationFailure {
                tool: ToolKind::MediaTool,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let total = workspace.extracted_frames()?.len();
        if total == 0 {
            return Err(CoreError::NoFramesExtracted(self.input.display().to_string()));
        }

        self.log(LogLevel::Info, format!("Extracted {} frames", total));
        Ok(total)
    }

    /// Upscale stage. Stops early (without error) on cancellation; the caller
    /// re-checks the token before reassembly.
    async fn upscale_frames(
        &self,
        workspace: &Workspace,
        location: &ExternalToolLocation,
        model: &ModelAsset,
        total: usize,
    ) -> CoreResult<()> {
        let frames = workspace.extracted_frames()?;
        let options = self.settings.upscale_options(&model.id, FRAME_EXTENSION);

        self.log(
            LogLevel::Info,
            format!("Upscaling {} frames with {}", total, model.id),
        );

        for (index, frame) in frames.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(name) = frame.file_name() else {
                continue;
            };
            let target = workspace.upscaled_dir().join(name);
            let invocation = options.invocation(&location.executable_path, frame, &target);

            match self.execute(&invocation).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    tracing::debug!("Job {}: upscaler stderr: {}", self.job_id, output.stderr.trim());
                    self.tolerate(CoreError::PartialFrameFailure {
                        frame: name.to_string_lossy().into_owned(),
                        exit_code: output.exit_code,
                    })?;
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e),
            }

            let progress = ((index + 1) * 100 / total) as u8;
            self.emit(JobEventKind::Progress(progress));
        }

        Ok(())
    }

    /// Reassemble stage: audio extraction then muxing.
    async fn reassemble(
        &self,
        workspace: &Workspace,
        ffmpeg: &FFmpegCommands,
        total: usize,
    ) -> CoreResult<PathBuf> {
        let upscaled = workspace.compact_upscaled_frames()?;
        if upscaled == 0 {
            return Err(CoreError::ReassemblyFailure {
                exit_code: None,
                stderr: "no frames were upscaled".to_string(),
            });
        }
        if upscaled < total {
            self.log(
                LogLevel::Warning,
                format!(
                    "{} of {} frames failed to upscale; reassembling {} frames",
                    total - upscaled,
                    total,
                    upscaled
                ),
            );
        }

        let audio_path = workspace.audio_path();
        let result = self.mux(workspace, ffmpeg, &audio_path).await;

        if audio_path.exists() {
            if let Err(e) = std::fs::remove_file(&audio_path) {
                tracing::warn!(
                    "Job {}: could not remove {}: {}",
                    self.job_id,
                    audio_path.display(),
                    e
                );
            }
        }

        result
    }

    async fn mux(
        &self,
        workspace: &Workspace,
        ffmpeg: &FFmpegCommands,
        audio_path: &Path,
    ) -> CoreResult<PathBuf> {
        let audio = self.extract_audio(ffmpeg, audio_path).await?;

        self.log(LogLevel::Info, "Reassembling video".to_string());
        ensure_parent_dir(&self.output)?;

        let invocation = ffmpeg.reassemble(
            workspace.upscaled_dir(),
            audio.as_deref(),
            &self.output,
            EncodeSettings {
                fps: self.settings.output_fps,
                crf: self.settings.video_quality_crf,
            },
        );

        let output = self.execute(&invocation).await?;
        if !output.success() {
            return Err(CoreError::ReassemblyFailure {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(self.output.clone())
    }

    /// Copies the source audio track. A failed or empty extraction means the
    /// source has no audio.
    async fn extract_audio(
        &self,
        ffmpeg: &FFmpegCommands,
        audio_path: &Path,
    ) -> CoreResult<Option<PathBuf>> {
        let has_audio = match self
            .execute(&ffmpeg.extract_audio(&self.input, audio_path))
            .await
        {
            Ok(output) => output.success() && is_non_empty_file(audio_path),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::debug!("Job {}: audio extraction failed: {}", self.job_id, e);
                false
            }
        };

        if has_audio {
            Ok(Some(audio_path.to_path_buf()))
        } else {
            self.log(LogLevel::Info, "No audio track found".to_string());
            Ok(None)
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Resolves the configured model, logging any substitution.
    fn resolve_model(&self, location: &ExternalToolLocation) -> CoreResult<ModelAsset> {
        let resolution = resolve_model(&self.settings.model_id, &location.models_directory)?;

        if let Some(requested) = &resolution.substituted_for {
            let message = format!(
                "Model '{}' not found, using '{}' instead",
                requested, resolution.asset.id
            );
            tracing::warn!("Job {}: {}", self.job_id, message);
            self.log(LogLevel::Warning, message);
        }

        Ok(resolution.asset)
    }

    /// Reports a non-fatal error as a warning; fatal errors are returned.
    fn tolerate(&self, error: CoreError) -> CoreResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        tracing::warn!("Job {}: {}", self.job_id, error);
        self.log(LogLevel::Warning, error.to_string());
        Ok(())
    }

    async fn execute(&self, invocation: &ToolInvocation) -> CoreResult<ToolOutput> {
        tracing::debug!("Job {}: {}", self.job_id, invocation.display());
        self.context.runner.run(invocation, &self.cancel).await
    }

    fn check_cancelled(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, kind: JobEventKind) {
        // The receiver only goes away when the batch itself is torn down.
        let _ = self.events.send(JobEvent {
            job_id: self.job_id.clone(),
            kind,
        });
    }

    fn log(&self, level: LogLevel, message: String) {
        self.emit(JobEventKind::Log { level, message });
    }
}

fn ensure_parent_dir(path: &Path) -> CoreResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
