//! Batch rendering: many diagrams per renderer invocation.
//!
//! Members are written as numbered source files (`00000.puml`,
//! `00001.puml`, ...) into a private directory and passed to one renderer
//! invocation. The renderer writes `0000i.{ext}` next to each input, which
//! is how outputs are correlated back to members.
//!
//! `-noerror` makes the renderer skip diagrams it cannot render instead of
//! writing error images, so a missing output marks exactly the failed member.
//!
//! In file mode the renderer only reads text between `@start...` and
//! `@end...`, and a name after `@startuml` replaces the output file name.
//! Batch inputs are therefore wrapped and stripped of such names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::command::{CancelToken, ExternalTool, InvokeError};
use crate::error::RenderError;
use crate::format::FileFormat;
use crate::single;

/// One renderer pass of one deduplicated job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassTask {
    /// Index of the job the pass belongs to.
    pub job: usize,
    pub pass: FileFormat,
}

/// Unit of work for the worker pool: one renderer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unit {
    Single(PassTask),
    Batch {
        pass: FileFormat,
        tasks: Vec<PassTask>,
    },
}

impl Unit {
    /// Number of passes covered by the unit.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch { tasks, .. } => tasks.len(),
        }
    }
}

/// Group pass tasks into invocation units.
///
/// Batchable passes are grouped by raw file format and chunked into batches
/// of at most `batch_size`, keeping their relative order. Everything else,
/// including single-member remainders, goes through single dispatch. A
/// `batch_size` of 1 disables batching.
pub(crate) fn plan_units(tasks: Vec<PassTask>, batch_size: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut groups: BTreeMap<FileFormat, Vec<PassTask>> = BTreeMap::new();

    for task in tasks {
        if batch_size > 1 && task.pass.batchable() {
            groups.entry(task.pass).or_default().push(task);
        } else {
            units.push(Unit::Single(task));
        }
    }

    for (pass, tasks) in groups {
        for chunk in tasks.chunks(batch_size) {
            match chunk {
                [task] => units.push(Unit::Single(*task)),
                _ => units.push(Unit::Batch {
                    pass,
                    tasks: chunk.to_vec(),
                }),
            }
        }
    }

    units
}

/// Source and destination of one batch member.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchMember<'a> {
    pub source: &'a [u8],
    /// Job directory the member's output is moved into.
    pub workdir: &'a Path,
}

/// Result of a batch invocation.
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    /// The renderer ran; one result per member, in member order.
    Completed(Vec<Result<PathBuf, RenderError>>),
    /// The invocation itself failed; no member result can be trusted.
    Crashed(RenderError),
}

/// Render all `members` to `pass` format with a single invocation.
pub(crate) fn render(
    renderer: &ExternalTool,
    members: &[BatchMember<'_>],
    pass: FileFormat,
    staging: &Path,
    cancel: &CancelToken,
) -> BatchOutcome {
    let dir = match tempfile::Builder::new().prefix("batch-").tempdir_in(staging) {
        Ok(dir) => dir,
        Err(e) => return BatchOutcome::Crashed(e.into()),
    };

    let mut inputs = Vec::with_capacity(members.len());
    for (i, member) in members.iter().enumerate() {
        let name = format!("{i:05}.puml");
        if let Err(e) = std::fs::write(dir.path().join(&name), batch_source(member.source)) {
            return BatchOutcome::Crashed(e.into());
        }
        inputs.push(name);
    }

    let mut args: Vec<&str> = vec!["-charset", "utf-8", "-noerror"];
    args.extend_from_slice(pass.renderer_args());
    args.extend(inputs.iter().map(String::as_str));

    tracing::debug!(members = members.len(), format = pass.extension(), "Rendering batch");

    let output = match renderer.run(&args, None, dir.path(), cancel) {
        Ok(output) => output,
        Err(InvokeError::Spawn(e)) => return BatchOutcome::Crashed(RenderError::Spawn(e)),
        Err(InvokeError::Io(e)) => return BatchOutcome::Crashed(RenderError::Io(e)),
        Err(InvokeError::Cancelled) => return BatchOutcome::Crashed(RenderError::Cancelled),
    };

    let outputs: Vec<PathBuf> = (0..members.len())
        .map(|i| dir.path().join(format!("{i:05}.{}", pass.extension())))
        .collect();
    if output.status.code().is_none() {
        return BatchOutcome::Crashed(RenderError::Crashed {
            status: output.status.to_string(),
        });
    }
    if !output.status.success() && !outputs.iter().any(|p| is_present(p)) {
        return BatchOutcome::Crashed(RenderError::Renderer {
            status: output.status.to_string(),
            stderr: output.stderr,
        });
    }

    let results = members
        .iter()
        .zip(&outputs)
        .map(|(member, produced)| {
            if !is_present(produced) {
                return Err(RenderError::MissingOutput {
                    stderr: output.stderr.clone(),
                });
            }
            let dest = single::output_path(member.workdir, pass);
            std::fs::rename(produced, &dest)?;
            Ok(dest)
        })
        .collect();

    BatchOutcome::Completed(results)
}

/// Source as written to a batch input file.
///
/// Bare diagrams are wrapped in `@startuml`/`@enduml`. For sources that
/// already start with a `@start...` line, anything after the keyword is
/// dropped so output names follow the input file.
pub(crate) fn batch_source(source: &[u8]) -> Vec<u8> {
    let body = source.trim_ascii_start();
    if !body.starts_with(b"@start") {
        let mut wrapped = Vec::with_capacity(source.len() + 20);
        wrapped.extend_from_slice(b"@startuml\n");
        wrapped.extend_from_slice(source.trim_ascii_end());
        wrapped.extend_from_slice(b"\n@enduml\n");
        return wrapped;
    }

    let line_end = body.iter().position(|&b| b == b'\n').unwrap_or(body.len());
    let (first, rest) = body.split_at(line_end);
    let keyword_end = first
        .iter()
        .position(|&b| b.is_ascii_whitespace() || b == b'(')
        .unwrap_or(first.len());

    let mut out = Vec::with_capacity(body.len());
    out.extend_from_slice(&first[..keyword_end]);
    out.extend_from_slice(rest);
    out
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}
