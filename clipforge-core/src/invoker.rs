use std::ffi::OsStr;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("tool not found: {tool}")]
    ToolMissing { tool: String },
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
}

pub type InvokeResult<T> = std::result::Result<T, InvokeError>;

/// Seam for external process execution so pipelines can run under test
/// without ffmpeg or yt-dlp installed.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Captured result of a finished tool run. A non-zero exit is data, not an
/// error; callers decide whether it aborts their stage.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Clone)]
pub struct ToolInvoker {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    pub fn system(timeout: Duration) -> Self {
        Self::new(Arc::new(SystemCommandExecutor), timeout)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            timeout,
        }
    }

    pub async fn run(&self, command: &mut Command) -> InvokeResult<ToolOutput> {
        let tool = program_name(command);
        command.kill_on_drop(true);
        match timeout(self.timeout, self.executor.run(command)).await {
            Ok(Ok(output)) => Ok(ToolOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(InvokeError::ToolMissing { tool })
            }
            Ok(Err(source)) => Err(InvokeError::Spawn { tool, source }),
            Err(_) => Err(InvokeError::Timeout {
                tool,
                timeout: self.timeout,
            }),
        }
    }
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn program_name(command: &Command) -> String {
    let program = command.as_std().get_program();
    std::path::Path::new(program)
        .file_name()
        .unwrap_or(OsStr::new("?"))
        .to_string_lossy()
        .into_owned()
}
