//! Model asset resolution.
//!
//! A model is a `<id>.param` + `<id>.bin` pair inside the models directory.
//! Only complete pairs are usable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, ScaleFactor};

/// Extension of the network definition file
pub const PARAM_EXTENSION: &str = "param";

/// Extension of the weights file
pub const WEIGHT_EXTENSION: &str = "bin";

/// Model used when nothing is configured
pub const DEFAULT_MODEL_ID: &str = "realesr-animevideov3-x2";

/// A model id together with the scale it produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub id: String,
    pub scale: ScaleFactor,
}

impl ModelAsset {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let scale = ScaleFactor::from_model_id(&id);
        Self { id, scale }
    }

    pub fn param_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.{}", self.id, PARAM_EXTENSION))
    }

    pub fn weight_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.{}", self.id, WEIGHT_EXTENSION))
    }

    /// Both files of the pair exist side by side
    pub fn is_available_in(&self, models_dir: &Path) -> bool {
        self.param_path(models_dir).is_file() && self.weight_path(models_dir).is_file()
    }
}

/// Outcome of resolving a configured model id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResolution {
    pub asset: ModelAsset,
    /// Requested id that was replaced by `asset`, if a fallback happened
    pub substituted_for: Option<String>,
}

/// Lists ids of complete model pairs in `models_dir`, sorted by id.
///
/// Unreadable directories yield an empty list and a warning.
pub fn list_available_models(models_dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                "Could not list models in {}: {}",
                models_dir.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut models: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARAM_EXTENSION) {
                return None;
            }
            let id = path.file_stem()?.to_str()?.to_string();
            ModelAsset::new(id.clone())
                .is_available_in(models_dir)
                .then_some(id)
        })
        .collect();

    models.sort();
    models.dedup();
    models
}

/// Resolves `requested` against the models directory.
///
/// When the exact pair is missing, the first available model (by sorted id)
/// is substituted. Fails with `MissingModel` only if no model exists at all.
pub fn resolve_model(requested: &str, models_dir: &Path) -> CoreResult<ModelResolution> {
    let wanted = ModelAsset::new(requested);
    if wanted.is_available_in(models_dir) {
        return Ok(ModelResolution {
            asset: wanted,
            substituted_for: None,
        });
    }

    let available = list_available_models(models_dir);
    match available.into_iter().next() {
        Some(fallback) => Ok(ModelResolution {
            asset: ModelAsset::new(fallback),
            substituted_for: Some(requested.to_string()),
        }),
        None => Err(CoreError::MissingModel(format!(
            "No Real-ESRGAN models found in {}",
            models_dir.display()
        ))),
    }
}

// =============================================================================
// Presets
// =============================================================================

/// Named model choices offered to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelPreset {
    AnimeVideo2x,
    AnimeVideo3x,
    AnimeVideo4x,
    General4x,
    AnimePhotos4x,
}

impl ModelPreset {
    pub const ALL: [ModelPreset; 5] = [
        ModelPreset::AnimeVideo2x,
        ModelPreset::AnimeVideo3x,
        ModelPreset::AnimeVideo4x,
        ModelPreset::General4x,
        ModelPreset::AnimePhotos4x,
    ];

    pub fn model_id(&self) -> &'static str {
        match self {
            ModelPreset::AnimeVideo2x => "realesr-animevideov3-x2",
            ModelPreset::AnimeVideo3x => "realesr-animevideov3-x3",
            ModelPreset::AnimeVideo4x => "realesr-animevideov3-x4",
            ModelPreset::General4x => "realesrgan-x4plus",
            ModelPreset::AnimePhotos4x => "realesrgan-x4plus-anime",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelPreset::AnimeVideo2x => "Anime Image/Video 2x",
            ModelPreset::AnimeVideo3x => "Anime Image/Video 3x",
            ModelPreset::AnimeVideo4x => "Anime Image/Video 4x",
            ModelPreset::General4x => "General Image/Video 4x",
            ModelPreset::AnimePhotos4x => "Anime Photos 4x",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ModelPreset::AnimeVideo2x => "anime-video-2x",
            ModelPreset::AnimeVideo3x => "anime-video-3x",
            ModelPreset::AnimeVideo4x => "anime-video-4x",
            ModelPreset::General4x => "general-4x",
            ModelPreset::AnimePhotos4x => "anime-photos-4x",
        }
    }

    /// Preset whose model id matches, if any
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.model_id() == model_id)
    }
}

impl fmt::Display for ModelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelPreset {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(value) || p.label().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Unknown model preset '{value}' (expected one of: {})",
                    Self::ALL.map(|p| p.key()).join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn install(dir: &Path, id: &str, weights: bool) {
        fs::write(dir.join(format!("{id}.param")), b"").unwrap();
        if weights {
            fs::write(dir.join(format!("{id}.bin")), b"").unwrap();
        }
    }

    #[test]
    fn test_only_complete_pairs_are_listed() {
        let dir = tempdir().unwrap();
        install(dir.path(), "realesrgan-x4plus", true);
        install(dir.path(), "realesr-animevideov3-x2", true);
        install(dir.path(), "half-installed-x3", false);
        fs::write(dir.path().join("orphan.bin"), b"").unwrap();
        fs::write(dir.path().join("README.md"), b"").unwrap();

        assert_eq!(
            list_available_models(dir.path()),
            vec!["realesr-animevideov3-x2", "realesrgan-x4plus"]
        );
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(list_available_models(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn test_exact_model_resolves() {
        let dir = tempdir().unwrap();
        install(dir.path(), "realesr-animevideov3-x3", true);

        let resolution = resolve_model("realesr-animevideov3-x3", dir.path()).unwrap();
        assert_eq!(resolution.asset.id, "realesr-animevideov3-x3");
        assert_eq!(resolution.asset.scale, ScaleFactor::X3);
        assert!(resolution.substituted_for.is_none());
    }

    #[test]
    fn test_fallback_is_first_sorted_model() {
        let dir = tempdir().unwrap();
        install(dir.path(), "realesrgan-x4plus-anime", true);
        install(dir.path(), "realesrgan-x4plus", true);
        // param without weights is not the requested model
        install(dir.path(), "realesr-animevideov3-x2", false);

        let resolution = resolve_model("realesr-animevideov3-x2", dir.path()).unwrap();
        assert_eq!(resolution.asset.id, "realesrgan-x4plus");
        assert_eq!(
            resolution.substituted_for.as_deref(),
            Some("realesr-animevideov3-x2")
        );
    }

    #[test]
    fn test_no_models_is_missing_model() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            resolve_model("realesrgan-x4plus", dir.path()),
            Err(CoreError::MissingModel(_))
        ));
    }

    #[test]
    fn test_presets() {
        assert_eq!(
            "general-4x".parse::<ModelPreset>().unwrap(),
            ModelPreset::General4x
        );
        assert_eq!(
            "Anime Photos 4x".parse::<ModelPreset>().unwrap(),
            ModelPreset::AnimePhotos4x
        );
        assert!("turbo".parse::<ModelPreset>().is_err());
        assert_eq!(
            ModelPreset::from_model_id(DEFAULT_MODEL_ID),
            Some(ModelPreset::AnimeVideo2x)
        );
        assert_eq!(
            ModelAsset::new(ModelPreset::AnimeVideo3x.model_id()).scale,
            ScaleFactor::X3
        );
        assert_eq!(
            ModelAsset::new(ModelPreset::AnimePhotos4x.model_id()).scale,
            ScaleFactor::X4
        );
    }
}
