//! Error types for the render engine.
//!
//! Errors fall into three layers:
//! - [`ConfigError`]: the engine cannot run as configured; stops a dispatch
//! - [`RenderError`]: one diagram could not be produced; isolated per request
//! - [`DispatchError`]: a whole dispatch was aborted

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::format::{OutputFormat, Target};

/// Configuration error. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown format '{0}'")]
    UnknownFormat(String),
    #[error("format '{format}' is not supported for {target} output (valid: {valid})")]
    UnsupportedFormat {
        format: OutputFormat,
        target: Target,
        valid: String,
    },
    #[error("{tool} command is empty")]
    EmptyCommand { tool: &'static str },
    #[error("{tool} command '{program}' cannot be run: {reason}")]
    MissingExecutable {
        tool: &'static str,
        program: String,
        reason: String,
    },
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("parallelism must be at least 1")]
    InvalidParallelism,
}

/// Failure to produce the artifact of one diagram.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot read diagram source {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("renderer could not be started: {0}")]
    Spawn(#[source] io::Error),
    #[error("error while running renderer ({status})\n\n{stderr}")]
    Renderer { status: String, stderr: String },
    #[error("renderer terminated abnormally ({status})")]
    Crashed { status: String },
    #[error("renderer produced no output")]
    EmptyOutput,
    #[error("renderer produced no output for this diagram{}", stderr_suffix(.stderr))]
    MissingOutput { stderr: String },
    #[error("error while running converter ({status})\n\n{stderr}")]
    Conversion { status: String, stderr: String },
    #[error("converter could not be started: {0}")]
    ConverterSpawn(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("rendering was cancelled")]
    Cancelled,
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n\n{stderr}")
    }
}

/// A dispatch that could not complete.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot prepare staging directory: {0}")]
    Staging(#[source] io::Error),
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("dispatch was cancelled")]
    Cancelled,
}

/// Failure record for one request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("diagram at position {position} ({excerpt:?}): {error}")]
pub struct RenderFailure {
    /// Caller-supplied position of the failed request.
    pub position: usize,
    /// First line of the diagram source, shortened.
    pub excerpt: String,
    /// What went wrong. Shared between requests with identical sources.
    pub error: Arc<RenderError>,
    /// Whether a placeholder artifact was delivered in its place.
    pub substituted: bool,
}
