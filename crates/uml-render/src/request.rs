//! Request and artifact types exchanged with the caller.

use std::path::{Path, PathBuf};

use crate::consts::EXCERPT_LEN;
use crate::format::{OutputFormat, Target};

/// Where the diagram source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramSource {
    /// Source embedded in the document.
    Inline(Vec<u8>),
    /// Source kept in a separate file, read by the engine.
    ///
    /// The file's directory is searched first when expanding `!include`.
    File(PathBuf),
}

impl DiagramSource {
    /// Directory used as the first `!include` search location.
    pub(crate) fn base_dir(&self) -> Option<&Path> {
        match self {
            Self::Inline(_) => None,
            Self::File(path) => path.parent(),
        }
    }
}

impl From<&str> for DiagramSource {
    fn from(source: &str) -> Self {
        Self::Inline(source.as_bytes().to_vec())
    }
}

impl From<String> for DiagramSource {
    fn from(source: String) -> Self {
        Self::Inline(source.into_bytes())
    }
}

/// Presentation sizing directives.
///
/// Applied by the caller after rendering. They never reach the renderer and
/// do not take part in the fingerprint, so resizing a diagram reuses its
/// cached artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sizing {
    /// Scale in percent.
    pub scale: Option<u32>,
    /// Target width, with optional unit (e.g. `"300px"`, `"50%"`).
    pub width: Option<String>,
    /// Target height, with optional unit.
    pub height: Option<String>,
}

/// One diagram to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: DiagramSource,
    /// Explicit format; `None` uses the engine default for `target`.
    pub format: Option<OutputFormat>,
    pub target: Target,
    pub sizing: Sizing,
    /// Caller-supplied sequence position, echoed on results and failures.
    pub position: usize,
}

impl RenderRequest {
    /// Create a request for `target` using the engine's default format.
    #[must_use]
    pub fn new(source: impl Into<DiagramSource>, target: Target, position: usize) -> Self {
        Self {
            source: source.into(),
            format: None,
            target,
            sizing: Sizing::default(),
            position,
        }
    }

    /// Request an explicit format instead of the target default.
    #[must_use]
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Attach presentation sizing directives.
    #[must_use]
    pub fn sizing(mut self, sizing: Sizing) -> Self {
        self.sizing = sizing;
        self
    }
}

/// What was actually delivered for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// A real render in the requested format.
    Format(OutputFormat),
    /// An error placeholder standing in for a failed render.
    Placeholder,
}

/// Files delivered for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    /// Position of the originating request.
    pub position: usize,
    /// Primary artifact.
    pub primary: PathBuf,
    /// Fallback artifact (raster fallback of a vector image).
    pub fallback: Option<PathBuf>,
    pub delivered: Delivered,
    /// Sizing directives of the request, to apply when embedding.
    pub sizing: Sizing,
    /// Whether the artifact was served from the cache without rendering.
    pub cached: bool,
}

/// First non-empty line of `source`, shortened for diagnostics.
pub(crate) fn excerpt(source: &[u8]) -> String {
    let text = String::from_utf8_lossy(source);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    if line.chars().count() <= EXCERPT_LEN {
        return line.to_owned();
    }
    let mut short: String = line.chars().take(EXCERPT_LEN).collect();
    short.push_str("...");
    short
}
