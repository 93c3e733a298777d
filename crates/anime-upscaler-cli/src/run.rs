//! `run` command: expand inputs, run the batch, render its events.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anime_upscaler_core::core::batch::{BatchConfig, BatchController, BatchEvent};
use anime_upscaler_core::core::discovery::{check_dependencies, expand_inputs};
use anime_upscaler_core::core::jobs::{JobStatus, LogLevel};
use anime_upscaler_core::core::process::SystemToolRunner;
use anime_upscaler_core::core::settings::{AppSettings, SettingsManager};
use anime_upscaler_core::core::tools::ModelPreset;
use anime_upscaler_core::core::{format_duration, ImageFormat, MediaKind};
use anyhow::{bail, Context};
use clap::Args;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image or video files, or directories to scan recursively
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Model id, e.g. realesrgan-x4plus-anime
    #[arg(short, long, conflicts_with = "preset")]
    model: Option<String>,

    /// Model preset: anime-video-2x, anime-video-3x, anime-video-4x, general-4x, anime-photos-4x
    #[arg(long)]
    preset: Option<ModelPreset>,

    /// Frame rate of upscaled videos
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=120))]
    fps: Option<u32>,

    /// Video quality (CRF, lower is better)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=51))]
    crf: Option<u8>,

    /// Output format for images: jpg, png or webp
    #[arg(long)]
    format: Option<ImageFormat>,

    /// Upscaler tile size (0 = automatic)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=2048))]
    tile_size: Option<u32>,

    /// Run the upscaler on CPU
    #[arg(long)]
    no_gpu: bool,

    /// Maximum jobs running at once
    #[arg(short = 'j', long)]
    jobs: Option<u32>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Persist the given options as new defaults
    #[arg(long)]
    save: bool,
}

impl RunArgs {
    /// Overlays command-line options on loaded settings.
    fn apply(&self, settings: &mut AppSettings) {
        if let Some(preset) = self.preset {
            settings.upscale.model_id = preset.model_id().to_string();
        }
        if let Some(model) = &self.model {
            settings.upscale.model_id = model.clone();
        }
        if let Some(fps) = self.fps {
            settings.upscale.output_fps = fps;
        }
        if let Some(crf) = self.crf {
            settings.upscale.video_quality_crf = crf;
        }
        if let Some(format) = self.format {
            settings.upscale.image_format = format;
        }
        if let Some(tile) = self.tile_size {
            settings.upscale.tile_size = Some(tile);
        }
        if self.no_gpu {
            settings.upscale.use_gpu = false;
        }
        if let Some(jobs) = self.jobs {
            settings.batch.max_concurrent_jobs = jobs;
        }
        if let Some(output) = &self.output {
            settings.batch.output_dir = Some(output.clone());
        }
        settings.normalize();
    }
}

pub async fn execute(args: RunArgs, manager: &SettingsManager) -> anyhow::Result<ExitCode> {
    let mut settings = manager.load();
    args.apply(&mut settings);
    if args.save {
        settings = manager.save(&settings).context("Failed to save settings")?;
    }

    let locator = Arc::new(crate::locator_for(&settings));
    let report = check_dependencies(&locator);
    if !report.can_upscale() {
        for message in report.missing() {
            eprintln!("{message}");
        }
        bail!("Required dependencies are missing; run `anime-upscaler doctor` for details");
    }

    let inputs = expand_inputs(&args.inputs);
    if inputs.is_empty() {
        bail!("No supported image or video files found");
    }
    if !report.can_process_video()
        && inputs.iter().any(|p| MediaKind::from_path(p) == MediaKind::Video)
    {
        tracing::warn!("FFmpeg not found; video files will fail");
        eprintln!("Warning: FFmpeg not found, video files will fail.");
    }

    let mut controller = BatchController::new(
        BatchConfig::from_settings(&settings.batch),
        settings.upscale.clone(),
        locator,
        SystemToolRunner::shared(),
    );
    controller.enqueue(inputs);

    let mut batch = controller.start();
    let handle = batch.handle();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = batch.next_event() => match event {
                Some(event) => print_event(&event, args.json)?,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Stopping... waiting for running jobs to exit");
                handle.stop();
            }
        }
    }

    let summary = batch.wait().await?;
    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_event(event: &BatchEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to encode event")?);
        return Ok(());
    }

    match event {
        BatchEvent::BatchStarted { total } => println!("Processing {total} files"),
        BatchEvent::JobStarted { input_name, kind, .. } => {
            let kind = match kind {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
            };
            println!("[{input_name}] Started ({kind})");
        }
        BatchEvent::JobProgress {
            input_name,
            progress,
            ..
        } => println!("[{input_name}] {progress}%"),
        BatchEvent::JobLog {
            input_name,
            level,
            message,
            ..
        } => match level {
            LogLevel::Info => println!("[{input_name}] {message}"),
            LogLevel::Warning => println!("[{input_name}] Warning: {message}"),
        },
        BatchEvent::JobError {
            input_name,
            message,
            ..
        } => println!("[{input_name}] Error: {message}"),
        BatchEvent::JobResult {
            input_name, output, ..
        } => println!("[{input_name}] Saved {}", output.display()),
        BatchEvent::JobFinished {
            input_name, status, ..
        } => println!("[{input_name}] {}", status_label(*status)),
        BatchEvent::BatchProgress(progress) => {
            let remaining = progress
                .remaining()
                .map(format_duration)
                .unwrap_or_else(|| "--:--".to_string());
            println!(
                "Overall: {}% ({}/{}) | Elapsed: {} | Remaining: {}",
                progress.percent,
                progress.completed,
                progress.total,
                format_duration(progress.elapsed()),
                remaining
            );
        }
        BatchEvent::BatchStopping => println!("Stop requested"),
        BatchEvent::BatchFinished(summary) => println!("{}", summary.message()),
    }
    Ok(())
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "Queued",
        JobStatus::Running => "Running",
        JobStatus::Succeeded => "Done",
        JobStatus::Failed => "Failed",
        JobStatus::Cancelled => "Cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        let mut argv = vec!["anime-upscaler"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().run
    }

    #[test]
    fn test_flags_override_settings() {
        let args = parse(&[
            "in.mp4", "--preset", "general-4x", "--fps", "30", "--crf", "20", "--format", "png",
            "--tile-size", "0", "--no-gpu", "-j", "1", "-o", "/out",
        ]);
        let mut settings = AppSettings::default();
        args.apply(&mut settings);

        assert_eq!(settings.upscale.model_id, "realesrgan-x4plus");
        assert_eq!(settings.upscale.output_fps, 30);
        assert_eq!(settings.upscale.video_quality_crf, 20);
        assert_eq!(settings.upscale.image_format, ImageFormat::Png);
        assert_eq!(settings.upscale.tile_size, None);
        assert!(!settings.upscale.use_gpu);
        assert_eq!(settings.batch.max_concurrent_jobs, 1);
        assert_eq!(settings.batch.output_dir, Some(PathBuf::from("/out")));
    }

    #[test]
    fn test_untouched_settings_are_kept() {
        let args = parse(&["a.png", "b.png"]);
        let mut settings = AppSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings, AppSettings::default());
        assert_eq!(args.inputs.len(), 2);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(Harness::try_parse_from(["x", "a.mp4", "--crf", "60"]).is_err());
        assert!(Harness::try_parse_from(["x", "a.mp4", "--fps", "0"]).is_err());
        assert!(Harness::try_parse_from(["x", "a.mp4", "--format", "gif"]).is_err());
        assert!(Harness::try_parse_from(["x", "a.mp4", "-m", "m", "--preset", "general-4x"]).is_err());
    }
}
