//! Single dispatch: one renderer invocation per pass, in pipe mode.

use std::path::{Path, PathBuf};

use crate::command::{CancelToken, ExternalTool, InvokeError};
use crate::error::RenderError;
use crate::format::FileFormat;

/// Name of a rendered pass inside its job directory.
pub(crate) fn output_path(workdir: &Path, pass: FileFormat) -> PathBuf {
    workdir.join(format!("diagram.{}", pass.extension()))
}

/// Render `source` to `pass` format, writing the result into `workdir`.
///
/// The source is sent on stdin and the artifact read from stdout, so no
/// file name inside the diagram can redirect the output.
pub(crate) fn render(
    renderer: &ExternalTool,
    source: &[u8],
    pass: FileFormat,
    workdir: &Path,
    cancel: &CancelToken,
) -> Result<PathBuf, RenderError> {
    let mut args = vec!["-pipe", "-charset", "utf-8"];
    args.extend_from_slice(pass.renderer_args());

    let output = renderer
        .run(&args, Some(source), workdir, cancel)
        .map_err(|e| match e {
            InvokeError::Spawn(e) => RenderError::Spawn(e),
            InvokeError::Io(e) => RenderError::Io(e),
            InvokeError::Cancelled => RenderError::Cancelled,
        })?;

    if !output.status.success() {
        return Err(RenderError::Renderer {
            status: output.status.to_string(),
            stderr: output.stderr,
        });
    }
    if output.stdout.is_empty() {
        return Err(RenderError::EmptyOutput);
    }

    let path = output_path(workdir, pass);
    std::fs::write(&path, &output.stdout)?;
    Ok(path)
}
