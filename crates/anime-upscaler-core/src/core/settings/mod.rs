//! Settings Persistence System
//!
//! Provides persistent application settings with:
//! - Atomic file writes (temp file + rename)
//! - Tolerant loading with defaults for missing or invalid values
//! - Migration support for schema changes
//!
//! Storage location: {config_dir}/settings.json
//!
//! A batch never reads this file directly. The CLI loads a snapshot, and the
//! batch copies [`JobSettings`] into every job when it is dispatched.

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::tools::{UpscaleOptions, DEFAULT_MODEL_ID};
use super::{CoreError, CoreResult, ImageFormat};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Directory name under the platform config dir
pub const APP_DIR_NAME: &str = "anime-upscaler";

/// Largest tile size accepted by the upscaler
pub const MAX_TILE_SIZE: u32 = 2048;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Per-job upscale parameters
    #[serde(default)]
    pub upscale: JobSettings,

    /// Batch scheduling
    #[serde(default)]
    pub batch: BatchSettings,

    /// External tool overrides
    #[serde(default)]
    pub tools: ToolSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            upscale: JobSettings::default(),
            batch: BatchSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl AppSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected, so an old or hand-edited
    /// file still loads.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;
        self.upscale.normalize();
        self.batch.normalize();
        self.tools.normalize();
    }
}

// ============================================================
// Job Settings
// ============================================================

/// Parameters copied into every job at dispatch time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    /// Upscaler model id
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Run the upscaler on GPU 0
    #[serde(default = "default_true")]
    pub use_gpu: bool,

    /// Tile size (None = automatic)
    #[serde(default = "default_tile_size")]
    pub tile_size: Option<u32>,

    /// Frame rate of reassembled videos
    #[serde(default = "default_fps")]
    pub output_fps: u32,

    /// x264 constant rate factor
    #[serde(default = "default_crf")]
    pub video_quality_crf: u8,

    /// Output format for image jobs
    #[serde(default)]
    pub image_format: ImageFormat,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            use_gpu: true,
            tile_size: default_tile_size(),
            output_fps: default_fps(),
            video_quality_crf: default_crf(),
            image_format: ImageFormat::default(),
        }
    }
}

impl JobSettings {
    pub fn normalize(&mut self) {
        self.model_id = self.model_id.trim().to_string();
        if self.model_id.is_empty() {
            self.model_id = default_model_id();
        }

        self.tile_size = match self.tile_size {
            Some(0) | None => None,
            Some(tile) => Some(tile.min(MAX_TILE_SIZE)),
        };

        self.output_fps = self.output_fps.clamp(1, 120);
        self.video_quality_crf = self.video_quality_crf.min(51);
    }

    /// Upscaler flags for this job with the model that was actually resolved.
    ///
    /// `format` differs between pipelines: image jobs use the configured
    /// image format, video frames are always PNG.
    pub fn upscale_options(&self, model_id: &str, format: &str) -> UpscaleOptions {
        UpscaleOptions {
            model_id: model_id.to_string(),
            format: format.to_string(),
            use_gpu: self.use_gpu,
            tile_size: self.tile_size,
        }
    }
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_true() -> bool {
    true
}

fn default_tile_size() -> Option<u32> {
    Some(400)
}

fn default_fps() -> u32 {
    24
}

fn default_crf() -> u8 {
    18
}

// ============================================================
// Batch Settings
// ============================================================

/// Batch scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSettings {
    /// Maximum jobs running at once
    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: u32,

    /// How long `stop()` waits for running jobs before aborting them
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Output directory (None = next to each input)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Base directory for video workspaces (None = OS temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_jobs(),
            stop_timeout_secs: default_stop_timeout(),
            output_dir: None,
            temp_dir: None,
        }
    }
}

impl BatchSettings {
    pub fn normalize(&mut self) {
        let ceiling = num_cpus::get().max(2) as u32;
        self.max_concurrent_jobs = self.max_concurrent_jobs.clamp(1, ceiling);
        self.stop_timeout_secs = self.stop_timeout_secs.clamp(1, 300);
        self.output_dir = self.output_dir.take().filter(|p| !p.as_os_str().is_empty());
        self.temp_dir = self.temp_dir.take().filter(|p| !p.as_os_str().is_empty());
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Workspace base, falling back to the OS temp dir
    pub fn workspace_base(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_max_jobs() -> u32 {
    2
}

fn default_stop_timeout() -> u64 {
    5
}

// ============================================================
// Tool Settings
// ============================================================

/// Explicit executable locations, tried before the default search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolSettings {
    #[serde(default)]
    pub upscaler_path: Option<PathBuf>,

    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

impl ToolSettings {
    pub fn normalize(&mut self) {
        self.upscaler_path = self.upscaler_path.take().filter(|p| !p.as_os_str().is_empty());
        self.ffmpeg_path = self.ffmpeg_path.take().filter(|p| !p.as_os_str().is_empty());
    }
}

// ============================================================
// Manager
// ============================================================

/// Default settings directory for the current user
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager with the given config directory
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::SettingsError(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| {
                CoreError::SettingsError(format!("Failed to open settings lock file: {}", e))
            })?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| CoreError::SettingsError(format!("Failed to lock settings file: {}", e)))?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or invalid
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AppSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
                settings = migrate(settings);
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);

            if cfg!(windows) {
                // rename does not overwrite on Windows: backup, swap, restore on failure
                let backup_path = self.settings_path.with_extension("json.bak");
                if backup_path.exists() {
                    let _ = fs::remove_file(&backup_path);
                }

                if self.settings_path.exists() {
                    fs::rename(&self.settings_path, &backup_path)?;
                }

                if let Err(e) = fs::rename(&temp_path, &self.settings_path) {
                    if backup_path.exists() {
                        let _ = fs::rename(&backup_path, &self.settings_path);
                    }
                    return Err(CoreError::SettingsError(format!(
                        "Failed to finalize settings file: {}",
                        e
                    )));
                }

                if backup_path.exists() {
                    let _ = fs::remove_file(&backup_path);
                }
            } else {
                fs::rename(&temp_path, &self.settings_path)?;
            }

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AppSettings::default())
        })
    }
}

/// Brings an older schema up to the current version
fn migrate(mut settings: AppSettings) -> AppSettings {
    settings.version = SETTINGS_VERSION;
    settings
}
