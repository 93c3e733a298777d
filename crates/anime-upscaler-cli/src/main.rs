//! anime-upscaler: batch AI upscaling of images and videos from the terminal.

mod info;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use anime_upscaler_core::core::settings::{default_config_dir, AppSettings, SettingsManager};
use anime_upscaler_core::core::tools::ToolLocator;
use anime_upscaler_core::logging::{init_logging, level_from_verbosity};
use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "anime-upscaler")]
#[command(version, about = "Batch AI upscaling for anime images and videos (Real-ESRGAN + FFmpeg)", long_about = None)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Also write daily-rotated log files into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale images, videos, or every media file in a directory
    Run(run::RunArgs),

    /// List installed models and presets
    Models,

    /// Check that Real-ESRGAN, its models and FFmpeg can be found
    Doctor,

    /// Inspect or reset persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file path
    Path,
    /// Delete the settings file and restore defaults
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(level_from_verbosity(cli.verbose), cli.log_dir.as_deref());

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let manager = SettingsManager::new(cli.config_dir.unwrap_or_else(default_config_dir));

    match cli.command {
        Commands::Run(args) => run::execute(args, &manager).await,
        Commands::Models => {
            let settings = manager.load();
            info::models(&locator_for(&settings));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => {
            let settings = manager.load();
            Ok(info::doctor(&locator_for(&settings)))
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => info::config_show(&manager),
            ConfigAction::Path => {
                println!("{}", manager.settings_path().display());
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Reset => info::config_reset(&manager),
        },
    }
}

/// Locator for this process, honouring configured tool paths
pub(crate) fn locator_for(settings: &AppSettings) -> ToolLocator {
    ToolLocator::from_env()
        .with_upscaler_override(settings.tools.upscaler_path.clone())
        .with_media_tool_override(settings.tools.ffmpeg_path.clone())
}
