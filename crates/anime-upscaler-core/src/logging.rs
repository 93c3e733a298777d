//! Tracing subscriber setup for binaries embedding the core.

use std::path::Path;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "anime-upscaler.log";

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Installs the global subscriber: stderr output plus, when `log_dir` is
/// given, a daily-rolling file. `RUST_LOG` directives are honoured on top of
/// `level`. Calling it again is a no-op.
///
/// Console output goes to stderr so JSON event lines on stdout stay clean.
pub fn init_logging(level: Level, log_dir: Option<&Path>) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.and_then(|dir| {
        // Best effort: without a writable directory we still log to the console.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Could not create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Already initialized (tests, repeated calls)
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Maps a `-v` count to a level: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
pub fn level_from_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
