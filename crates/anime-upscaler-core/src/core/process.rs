//! External process execution.
//!
//! Every external tool invocation goes through a [`ToolRunner`]. The system
//! implementation spawns the child with no console window on Windows, closes
//! stdin, captures stderr as the diagnostic payload, and cooperates with a
//! [`CancellationToken`]: once cancelled, the running child is asked to
//! terminate, given a grace period, then killed.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use super::{CoreError, CoreResult};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Default wait between the terminate request and a forced kill
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Apply platform-specific flags to a tokio process command.
pub fn configure_tokio_command(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

// =============================================================================
// Invocation
// =============================================================================

/// A fully-built external command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Value following `flag`, if the flag is present
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|a| a.as_os_str())
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Last positional argument (the output path for FFmpeg commands)
    pub fn last_arg(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Result of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured stderr
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Executes external tool invocations.
///
/// Implementations must return [`CoreError::Cancelled`] when `cancel` fires
/// before the process exits, after making sure the process is gone.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> CoreResult<ToolOutput>;
}

/// Shared runner handle passed to every job
pub type SharedToolRunner = Arc<dyn ToolRunner>;

/// Runs invocations as real OS processes
#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    terminate_grace: Duration,
}

impl SystemToolRunner {
    pub fn new() -> Self {
        Self {
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn shared() -> SharedToolRunner {
        Arc::new(Self::new())
    }
}

impl Default for SystemToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> CoreResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_tokio_command(&mut cmd);

        let mut child = cmd.spawn()?;
        tracing::debug!(
            "Spawned {} (PID: {:?})",
            invocation.program.display(),
            child.id()
        );

        // Drain stderr concurrently so a chatty tool never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match status {
            Some(status) => {
                let status = status?;
                let stderr = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                Ok(ToolOutput {
                    exit_code: status.code(),
                    stderr,
                })
            }
            None => {
                terminate_gracefully(&mut child, self.terminate_grace).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                Err(CoreError::Cancelled)
            }
        }
    }
}

/// Asks a child to exit, waits up to `grace`, then kills it.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    request_terminate(child).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {
            tracing::debug!("Process {:?} exited after terminate request", child.id());
        }
        Err(_) => {
            tracing::warn!(
                "Process {:?} still alive after {:?}, killing",
                child.id(),
                grace
            );
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill process: {}", e);
            }
        }
    }
}

async fn request_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let mut kill = tokio::process::Command::new("kill");
            kill.args(["-TERM", &pid.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            match kill.status().await {
                Ok(status) if status.success() => return,
                Ok(status) => tracing::debug!("kill -TERM {} exited with {}", pid, status),
                Err(e) => tracing::debug!("kill command unavailable: {}", e),
            }
        }
    }

    // No graceful signal available; fall back to an immediate kill request.
    if let Err(e) = child.start_kill() {
        tracing::debug!("Failed to kill child process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_builder_and_lookup() {
        let inv = ToolInvocation::new("/opt/bin/realesrgan-ncnn-vulkan")
            .args(["-i", "in.png", "-o", "out.png"])
            .arg("-g")
            .arg("0");

        assert_eq!(inv.flag_value("-o"), Some(OsStr::new("out.png")));
        assert_eq!(inv.flag_value("-t"), None);
        assert!(inv.has_arg("-g"));
        assert_eq!(inv.last_arg(), Some(Path::new("0")));
        assert_eq!(
            inv.display(),
            "/opt/bin/realesrgan-ncnn-vulkan -i in.png -o out.png -g 0"
        );
    }

    #[test]
    fn output_success_requires_zero_exit() {
        assert!(ToolOutput {
            exit_code: Some(0),
            stderr: String::new()
        }
        .success());
        assert!(!ToolOutput {
            exit_code: Some(1),
            stderr: String::new()
        }
        .success());
        assert!(!ToolOutput::default().success());
    }

    #[tokio::test]
    async fn tokio_command_can_be_configured() {
        #[cfg(target_os = "windows")]
        let mut cmd = tokio::process::Command::new("cmd");
        #[cfg(not(target_os = "windows"))]
        let mut cmd = tokio::process::Command::new("echo");
        configure_tokio_command(&mut cmd);
        configure_tokio_command(&mut cmd);
    }

    #[tokio::test]
    async fn pre_cancelled_token_spawns_nothing() {
        let runner = SystemToolRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let inv = ToolInvocation::new("/definitely/not/a/real/binary");
        let result = runner.run(&inv, &cancel).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let runner = SystemToolRunner::new();
        let inv = ToolInvocation::new("/definitely/not/a/real/binary");
        let result = runner.run(&inv, &CancellationToken::new()).await;
        assert!(matches!(result, Err(CoreError::IoError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_stderr() {
        let runner = SystemToolRunner::new();
        let inv = ToolInvocation::new("sh").args(["-c", "echo 'model not found' >&2; exit 3"]);

        let output = runner.run(&inv, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr.trim(), "model not found");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_process() {
        let runner = SystemToolRunner::new();
        let inv = ToolInvocation::new("sh").args(["-c", "exit 0"]);

        let output = runner.run(&inv, &CancellationToken::new()).await.unwrap();
        assert!(output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminating_a_reaped_child_returns_promptly() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        child.wait().await.unwrap();
        assert!(child.id().is_none());

        let started = std::time::Instant::now();
        terminate_gracefully(&mut child, Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_terminates_running_process() {
        let runner = SystemToolRunner::new().with_terminate_grace(Duration::from_secs(2));
        let inv = ToolInvocation::new("sleep").arg("30");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = runner.run(&inv, &cancel).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
