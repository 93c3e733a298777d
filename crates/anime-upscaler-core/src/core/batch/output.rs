//! Output path derivation.

use std::path::{Path, PathBuf};

use crate::core::{ImageFormat, MediaKind, ScaleFactor};

/// Marker inserted between the input stem and the scale factor
pub const OUTPUT_SUFFIX: &str = "_upscaled_";

/// Derives `{stem}_upscaled_{scale}{ext}`.
///
/// Videos keep their extension; images take the configured image format.
/// Without an output directory the file lands next to its input.
pub fn derive_output_path(
    input: &Path,
    output_dir: Option<&Path>,
    model_id: &str,
    image_format: ImageFormat,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let scale = ScaleFactor::from_model_id(model_id);

    let extension = match MediaKind::from_path(input) {
        MediaKind::Video => input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string()),
        MediaKind::Image => image_format.as_str().to_string(),
    };

    let file_name = format!("{stem}{OUTPUT_SUFFIX}{scale}.{extension}");
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    dir.join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_keeps_extension() {
        let path = derive_output_path(
            Path::new("/in/clip.mp4"),
            Some(Path::new("/out")),
            "realesr-animevideov3-x3",
            ImageFormat::Jpg,
        );
        assert_eq!(path, Path::new("/out").join("clip_upscaled_x3.mp4"));
    }

    #[test]
    fn test_image_takes_configured_format() {
        let path = derive_output_path(
            Path::new("/in/photo.png"),
            Some(Path::new("/out")),
            "realesrgan-x4plus-anime",
            ImageFormat::Webp,
        );
        assert_eq!(path, Path::new("/out").join("photo_upscaled_x4.webp"));
    }

    #[test]
    fn test_defaults_to_input_directory() {
        let path = derive_output_path(
            Path::new("/shows/ep01.MKV"),
            None,
            "realesr-animevideov3-x2",
            ImageFormat::Png,
        );
        assert_eq!(path, Path::new("/shows").join("ep01_upscaled_x2.MKV"));
    }

    #[test]
    fn test_dotted_stems_are_preserved() {
        let path = derive_output_path(
            Path::new("frame.v2.final.jpeg"),
            Some(Path::new("out")),
            "mystery",
            ImageFormat::Jpg,
        );
        assert_eq!(path, Path::new("out").join("frame.v2.final_upscaled_x4.jpg"));
    }
}
