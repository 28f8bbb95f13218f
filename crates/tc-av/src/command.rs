//! Builder for executing external tool commands with cancellation and
//! timeout support.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

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

impl ToolOutput {
    /// Standard output followed by standard error.
    ///
    /// The streams are read through separate pipes, so lines are grouped by
    /// stream rather than interleaved in the order the tool wrote them.
    /// ffmpeg writes its diagnostics to stderr only, so for encodes this is
    /// the stderr text as written.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is killed, not merely abandoned, when the cancellation token
/// fires or the timeout elapses.
///
/// # Example
///
/// ```no_run
/// use tc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> tc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-version")
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
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: None,
            cancel: None,
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
        self.timeout = Some(d);
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Short name of the program, used in error messages.
    pub fn program_name(&self) -> String {
        tool_name(&self.program)
    }

    /// Run the command to completion and capture its output, whatever the
    /// exit status.
    ///
    /// # Errors
    ///
    /// - [`tc_core::Error::Tool`] if spawning or waiting on the process fails.
    /// - [`tc_core::Error::Cancelled`] if the cancellation token fired first.
    /// - [`tc_core::Error::TimedOut`] if the timeout elapsed first.
    pub async fn run(&self) -> tc_core::Result<ToolOutput> {
        let program_name = self.program_name();

        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(tc_core::Error::Cancelled(format!(
                "{program_name} not started"
            )));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| tc_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe while we wait on it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = tokio::select! {
            res = child.wait() => res.map_err(|e| {
                tc_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            _ = cancelled(self.cancel.as_ref()) => {
                kill(&mut child, &program_name).await;
                abort_all([stdout, stderr]);
                return Err(tc_core::Error::Cancelled(format!("{program_name} killed")));
            }
            _ = elapsed(self.timeout) => {
                kill(&mut child, &program_name).await;
                abort_all([stdout, stderr]);
                return Err(tc_core::Error::TimedOut {
                    tool: program_name,
                    after: self.timeout.unwrap_or_default(),
                });
            }
        };

        Ok(ToolOutput {
            status,
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        })
    }

    /// Run the command and require a successful exit.
    ///
    /// # Errors
    ///
    /// Everything [`run`](Self::run) returns, plus [`tc_core::Error::Tool`]
    /// if the process exits with a non-zero status (message includes
    /// stderr).
    pub async fn execute(&self) -> tc_core::Result<ToolOutput> {
        let output = self.run().await?;
        if !output.status.success() {
            return Err(tc_core::Error::tool(
                self.program_name(),
                format!(
                    "exited with status {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }
}

pub(crate) fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

fn drain<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(h) => String::from_utf8_lossy(&h.await.unwrap_or_default()).to_string(),
        None => String::new(),
    }
}

fn abort_all<const N: usize>(handles: [Option<JoinHandle<Vec<u8>>>; N]) {
    for h in handles.into_iter().flatten() {
        h.abort();
    }
}

async fn kill(child: &mut tokio::process::Child, program_name: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool = program_name, "failed to kill child process: {e}");
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn elapsed(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
