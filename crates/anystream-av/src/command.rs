//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anystream_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lines of stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// ```no_run
/// use anystream_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> anystream_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-print_format", "json", "-show_format"])
///     .arg("/media/movie.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if spawning fails, the process times out, or
    /// it exits with a non-zero status (the message carries the tail of
    /// stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        match self.execute_with_cancel(&CancellationToken::new()).await? {
            Some(output) => Ok(output),
            None => Err(Error::tool(self.program_name(), "cancelled")),
        }
    }

    /// Execute the command until it exits or `cancel` fires.
    ///
    /// On cancellation the child is killed and reaped before this returns,
    /// and the result is `Ok(None)`. Timeouts kill the child the same way
    /// and surface as [`Error::Tool`]. Both pipes are drained concurrently
    /// so a chatty process never blocks on a full pipe.
    pub async fn execute_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolOutput>> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = %program_name, args = ?self.args, "Spawning tool");

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let exit = tokio::select! {
            res = child.wait() => Exit::Status(res),
            _ = cancel.cancelled() => Exit::Cancelled,
            _ = tokio::time::sleep(self.timeout) => Exit::TimedOut,
        };

        let status = match exit {
            Exit::Status(res) => res.map_err(|e| {
                Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            Exit::Cancelled => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %program_name, error = %e, "Failed to kill cancelled process");
                }
                tracing::debug!(tool = %program_name, "Process cancelled");
                return Ok(None);
            }
            Exit::TimedOut => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %program_name, error = %e, "Failed to kill timed-out process");
                }
                return Err(Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let output = ToolOutput {
            status,
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        };

        if !status.success() {
            return Err(Error::tool(
                program_name,
                format!("exited with status {status}: {}", stderr_tail(&output.stderr)),
            ));
        }

        Ok(Some(output))
    }
}

enum Exit {
    Status(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
