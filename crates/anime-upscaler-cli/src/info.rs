//! `models`, `doctor` and `config` commands.

use std::process::ExitCode;

use anime_upscaler_core::core::discovery::check_dependencies;
use anime_upscaler_core::core::settings::SettingsManager;
use anime_upscaler_core::core::tools::{ModelAsset, ModelPreset, ToolLocator};
use anyhow::Context;

pub fn models(locator: &ToolLocator) {
    let report = check_dependencies(locator);

    match &report.models_dir {
        Some(dir) => println!("Models directory: {}", dir.display()),
        None => println!("Models directory: not found"),
    }

    if report.models.is_empty() {
        println!("No models installed.");
    } else {
        println!("Installed models:");
        for id in &report.models {
            let scale = ModelAsset::new(id.as_str()).scale;
            match ModelPreset::from_model_id(id) {
                Some(preset) => println!("  {id:<32} {scale}  ({})", preset.key()),
                None => println!("  {id:<32} {scale}"),
            }
        }
    }

    println!();
    println!("Presets:");
    for preset in ModelPreset::ALL {
        let installed = if report.models.iter().any(|m| m == preset.model_id()) {
            "installed"
        } else {
            "missing"
        };
        println!(
            "  {:<16} {:<24} {:<28} {}",
            preset.key(),
            preset.label(),
            preset.model_id(),
            installed
        );
    }
}

pub fn doctor(locator: &ToolLocator) -> ExitCode {
    let report = check_dependencies(locator);

    let show = |label: &str, path: &Option<std::path::PathBuf>| match path {
        Some(path) => println!("  {label:<12} {}", path.display()),
        None => println!("  {label:<12} not found"),
    };
    println!("Dependencies:");
    show("Real-ESRGAN", &report.upscaler);
    show("Models", &report.models_dir);
    show("FFmpeg", &report.media_tool);
    println!("  {:<12} {}", "Installed", report.models.len());

    let missing = report.missing();
    if missing.is_empty() {
        println!();
        println!("All dependencies found.");
        return ExitCode::SUCCESS;
    }

    println!();
    for message in &missing {
        println!("Missing: {message}");
    }
    if report.can_upscale() {
        // FFmpeg only gates videos
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub fn config_show(manager: &SettingsManager) -> anyhow::Result<ExitCode> {
    let settings = manager.load();
    let json = serde_json::to_string_pretty(&settings).context("Failed to serialize settings")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

pub fn config_reset(manager: &SettingsManager) -> anyhow::Result<ExitCode> {
    manager.reset().context("Failed to reset settings")?;
    println!(
        "Settings reset to defaults ({} removed)",
        manager.settings_path().display()
    );
    Ok(ExitCode::SUCCESS)
}
