//! External process invocation with cancellation.
//!
//! The renderer and the EPS converter are both driven through
//! [`ExternalTool`]: the child's pipes are drained on scoped threads while the
//! calling thread polls for exit, so a set [`CancelToken`] terminates the
//! process promptly instead of waiting for it to finish.

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::consts::POLL_INTERVAL;
use crate::error::ConfigError;

/// Shared flag to abort a running dispatch.
///
/// Clones share the same flag. Once cancelled, running child processes are
/// killed and nothing further is published to the cache.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured result of a finished child process.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvokeError {
    #[error("cannot start process: {0}")]
    Spawn(#[source] io::Error),
    #[error("I/O error while running process: {0}")]
    Io(#[from] io::Error),
    #[error("process was cancelled")]
    Cancelled,
}

/// A configured external command: program plus leading arguments.
#[derive(Debug)]
pub(crate) struct ExternalTool {
    tool: &'static str,
    program: PathBuf,
    args: Vec<String>,
    invocations: AtomicUsize,
}

impl ExternalTool {
    /// Build a tool from its command line (program first).
    ///
    /// `tool` names the role in diagnostics (`"renderer"`, `"converter"`).
    pub fn new(tool: &'static str, command: &[String]) -> Result<Self, ConfigError> {
        let (program, args) = command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or(ConfigError::EmptyCommand { tool })?;
        Ok(Self {
            tool,
            program: PathBuf::from(program),
            args: args.to_vec(),
            invocations: AtomicUsize::new(0),
        })
    }

    /// Check that the program can be found and executed.
    ///
    /// Returns the tool with its program resolved to an absolute path, so it
    /// runs the same executable from any working directory.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let missing = |reason: String| ConfigError::MissingExecutable {
            tool: self.tool,
            program: self.program.display().to_string(),
            reason,
        };
        let path = which::which(&self.program).map_err(|e| missing(e.to_string()))?;
        let path = std::path::absolute(&path).map_err(|e| missing(e.to_string()))?;
        tracing::debug!(tool = self.tool, path = %path.display(), "Found executable");
        self.program = path;
        Ok(self)
    }

    /// Number of times [`run`](Self::run) started a process.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Run the command with `extra_args` appended, in `cwd`.
    ///
    /// `stdin` is written to the child's standard input when given; otherwise
    /// the child reads from `/dev/null`. Blocks until the child exits or
    /// `cancel` is set, in which case the child is killed.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        extra_args: &[S],
        stdin: Option<&[u8]>,
        cwd: &Path,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.execute(extra_args, stdin, cwd, cancel)
    }

    /// Run the command through `sh`, for scripts that lack an interpreter line.
    pub fn run_via_shell<S: AsRef<OsStr>>(
        &self,
        extra_args: &[S],
        cwd: &Path,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let mut args: Vec<&OsStr> = vec![self.program.as_os_str()];
        args.extend(self.args.iter().map(OsStr::new));
        args.extend(extra_args.iter().map(AsRef::as_ref));
        Self::spawn_and_wait(Command::new("sh").args(args), None, cwd, cancel)
    }

    fn execute<S: AsRef<OsStr>>(
        &self,
        extra_args: &[S],
        stdin: Option<&[u8]>,
        cwd: &Path,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, InvokeError> {
        tracing::debug!(
            tool = self.tool,
            program = %self.program.display(),
            args = ?extra_args.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
            "Running external command"
        );
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(extra_args);
        Self::spawn_and_wait(&mut command, stdin, cwd, cancel)
    }

    fn spawn_and_wait(
        command: &mut Command,
        stdin: Option<&[u8]>,
        cwd: &Path,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, InvokeError> {
        let mut child = command
            .current_dir(cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(InvokeError::Spawn)?;

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        thread::scope(|scope| -> Result<ProcessOutput, InvokeError> {
            if let (Some(mut pipe), Some(input)) = (child_stdin, stdin) {
                scope.spawn(move || {
                    // The child may exit without consuming its input
                    let _ = pipe.write_all(input);
                });
            }
            let stdout = scope.spawn(move || drain(child_stdout));
            let stderr = scope.spawn(move || drain(child_stderr));

            let status = wait_or_kill(&mut child, cancel);

            let stdout = stdout.join().unwrap_or_else(|e| std::panic::resume_unwind(e))?;
            let stderr = stderr.join().unwrap_or_else(|e| std::panic::resume_unwind(e))?;

            match status? {
                Some(status) => Ok(ProcessOutput {
                    status,
                    stdout,
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                }),
                None => Err(InvokeError::Cancelled),
            }
        })
    }
}

fn drain(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// Wait for `child` to exit, killing it if `cancel` is set first.
///
/// Returns `None` when the child was killed.
fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> io::Result<Option<ExitStatus>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
        if cancel.is_cancelled() {
            tracing::debug!(pid = child.id(), "Killing cancelled process");
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
