//! Anime Upscaler Error Definitions
//!
//! Defines error types used throughout the project.

use thiserror::Error;

use super::ToolKind;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Resolution Errors
    // =========================================================================
    #[error("{tool} executable not found. Please install it or place it in the bin folder.")]
    MissingTool { tool: ToolKind },

    #[error("Model not available: {0}")]
    MissingModel(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    #[error("{tool} failed (exit code {}): {}", display_code(.exit_code), trimmed(.stderr))]
    ToolInvocationFailure {
        tool: ToolKind,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("No frames were extracted from the video: {0}")]
    NoFramesExtracted(String),

    #[error("Frame {frame} failed to upscale (exit code {})", display_code(.exit_code))]
    PartialFrameFailure {
        frame: String,
        exit_code: Option<i32>,
    },

    #[error("Video reassembly failed (exit code {}): {}", display_code(.exit_code), trimmed(.stderr))]
    ReassemblyFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Could not clean up temporary files at {path}: {reason}")]
    CleanupWarning { path: String, reason: String },

    #[error("Job cancelled")]
    Cancelled,

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Settings error: {0}")]
    SettingsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether the error terminates the job that raised it.
    ///
    /// Frame-level upscale failures and workspace cleanup problems are
    /// reported as warnings and never end a job.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CoreError::PartialFrameFailure { .. } | CoreError::CleanupWarning { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

fn trimmed(text: &str) -> &str {
    text.trim()
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_display_names_tool() {
        let err = CoreError::MissingTool {
            tool: ToolKind::Upscaler,
        };
        assert!(err.to_string().contains("Real-ESRGAN"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invocation_failure_carries_stderr() {
        let err = CoreError::ToolInvocationFailure {
            tool: ToolKind::MediaTool,
            exit_code: Some(1),
            stderr: "Invalid data found when processing input\n".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("FFmpeg"));
        assert!(message.contains("exit code 1"));
        assert!(message.ends_with("Invalid data found when processing input"));
    }

    #[test]
    fn test_signal_terminated_process_has_no_code() {
        let err = CoreError::ReassemblyFailure {
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("exit code none"));
    }

    #[test]
    fn test_non_fatal_variants() {
        let frame = CoreError::PartialFrameFailure {
            frame: "frame_000003.png".to_string(),
            exit_code: Some(255),
        };
        let cleanup = CoreError::CleanupWarning {
            path: "/tmp/x".to_string(),
            reason: "busy".to_string(),
        };
        assert!(!frame.is_fatal());
        assert!(!cleanup.is_fatal());
        assert!(CoreError::Cancelled.is_fatal());
        assert!(CoreError::Cancelled.is_cancelled());
    }
}
