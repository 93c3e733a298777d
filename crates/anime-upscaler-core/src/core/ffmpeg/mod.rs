//! FFmpeg Integration Module
//!
//! Builds the three FFmpeg invocations the video pipeline needs:
//! - Frame extraction into a lossless PNG sequence
//! - Audio track extraction (stream copy)
//! - Reassembly of upscaled frames plus optional audio into the final video

use std::path::{Path, PathBuf};

use super::process::ToolInvocation;

/// printf-style frame pattern shared by extraction and reassembly
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// File name prefix of extracted and upscaled frames
pub const FRAME_PREFIX: &str = "frame_";

/// Extension of extracted frame files
pub const FRAME_EXTENSION: &str = "png";

/// Output video codec
pub const VIDEO_CODEC: &str = "libx264";

/// Output audio codec
pub const AUDIO_CODEC: &str = "aac";

/// Output pixel format
pub const PIXEL_FORMAT: &str = "yuv420p";

/// File name for frame `index` (1-based, matching FFmpeg's `%06d` numbering)
pub fn frame_file_name(index: usize) -> String {
    format!("{}{:06}.{}", FRAME_PREFIX, index, FRAME_EXTENSION)
}

/// Encoder parameters for reassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub fps: u32,
    pub crf: u8,
}

/// FFmpeg command builder bound to one executable
#[derive(Debug, Clone)]
pub struct FFmpegCommands {
    ffmpeg_path: PathBuf,
}

impl FFmpegCommands {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// `-i <video> -q:v 1 -pix_fmt rgb24 <frames_dir>/frame_%06d.png`
    pub fn extract_frames(&self, input: &Path, frames_dir: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .args(["-q:v", "1", "-pix_fmt", "rgb24"])
            .arg(frames_dir.join(FRAME_PATTERN))
    }

    /// `-y -i <video> -vn -acodec copy <audio_path>`
    pub fn extract_audio(&self, input: &Path, audio_path: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-acodec", "copy"])
            .arg(audio_path)
    }

    /// `-y -framerate <fps> -i <frames>/frame_%06d.png [-i <audio>] -c:v libx264
    /// [-c:a aac] -pix_fmt yuv420p -crf <crf> <output>`
    pub fn reassemble(
        &self,
        frames_dir: &Path,
        audio: Option<&Path>,
        output: &Path,
        settings: EncodeSettings,
    ) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-framerate")
            .arg(settings.fps.to_string())
            .arg("-i")
            .arg(frames_dir.join(FRAME_PATTERN));

        if let Some(audio) = audio {
            invocation = invocation.arg("-i").arg(audio);
        }

        invocation = invocation.args(["-c:v", VIDEO_CODEC]);

        if audio.is_some() {
            invocation = invocation.args(["-c:a", AUDIO_CODEC]);
        }

        invocation
            .args(["-pix_fmt", PIXEL_FORMAT])
            .arg("-crf")
            .arg(settings.crf.to_string())
            .arg(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg() -> FFmpegCommands {
        FFmpegCommands::new("/usr/bin/ffmpeg")
    }

    #[test]
    fn test_frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(1), "frame_000001.png");
        assert_eq!(frame_file_name(123456), "frame_123456.png");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_frames_command() {
        let inv = ffmpeg().extract_frames(Path::new("/in/clip.mp4"), Path::new("/tmp/ws/frames"));
        assert_eq!(
            inv.display(),
            "/usr/bin/ffmpeg -i /in/clip.mp4 -q:v 1 -pix_fmt rgb24 /tmp/ws/frames/frame_%06d.png"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_audio_command() {
        let inv = ffmpeg().extract_audio(Path::new("/in/clip.mp4"), Path::new("/tmp/ws/audio.mka"));
        assert_eq!(
            inv.display(),
            "/usr/bin/ffmpeg -y -i /in/clip.mp4 -vn -acodec copy /tmp/ws/audio.mka"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_reassemble_with_audio() {
        let inv = ffmpeg().reassemble(
            Path::new("/tmp/ws/upscaled"),
            Some(Path::new("/tmp/ws/audio.mka")),
            Path::new("/out/clip_upscaled_x2.mp4"),
            EncodeSettings { fps: 30, crf: 20 },
        );
        assert_eq!(
            inv.display(),
            "/usr/bin/ffmpeg -y -framerate 30 -i /tmp/ws/upscaled/frame_%06d.png \
             -i /tmp/ws/audio.mka -c:v libx264 -c:a aac -pix_fmt yuv420p -crf 20 \
             /out/clip_upscaled_x2.mp4"
        );
    }

    #[test]
    fn test_reassemble_without_audio() {
        let inv = ffmpeg().reassemble(
            Path::new("/tmp/ws/upscaled"),
            None,
            Path::new("/out/clip.mp4"),
            EncodeSettings { fps: 24, crf: 18 },
        );
        assert!(!inv.has_arg("-c:a"));
        assert_eq!(inv.args.iter().filter(|a| *a == "-i").count(), 1);
        assert_eq!(inv.last_arg(), Some(Path::new("/out/clip.mp4")));
    }
}
