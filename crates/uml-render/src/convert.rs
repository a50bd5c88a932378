//! Post-render format conversion.

use std::path::{Path, PathBuf};

use crate::command::{CancelToken, ExternalTool, InvokeError, ProcessOutput};
use crate::error::RenderError;
use crate::format::Conversion;

/// `ENOEXEC`: the file is not in an executable format (e.g. a script with no
/// interpreter line).
#[cfg(unix)]
const ENOEXEC: i32 = 8;

/// Apply `conversion` to the raw pass output at `raw`.
///
/// Returns the path of the final artifact. `converter` must be present for
/// every conversion other than [`Conversion::None`].
pub(crate) fn convert(
    conversion: Conversion,
    raw: PathBuf,
    converter: Option<&ExternalTool>,
    cancel: &CancelToken,
) -> Result<PathBuf, RenderError> {
    match conversion {
        Conversion::None => Ok(raw),
        Conversion::EpsToPdf => {
            let converter = converter.ok_or_else(|| {
                RenderError::ConverterSpawn(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no converter configured",
                ))
            })?;
            eps_to_pdf(converter, &raw, cancel)
        }
    }
}

/// Run `epstopdf file.eps` next to the file and expect `file.pdf`.
fn eps_to_pdf(
    converter: &ExternalTool,
    eps: &Path,
    cancel: &CancelToken,
) -> Result<PathBuf, RenderError> {
    let dir = eps.parent().unwrap_or_else(|| Path::new("."));
    let name = eps
        .file_name()
        .ok_or_else(|| RenderError::Io(std::io::Error::other("EPS path has no file name")))?;
    let args = [name];

    let output = match converter.run(&args, None, dir, cancel) {
        Err(InvokeError::Spawn(e)) if is_not_executable(&e) => {
            tracing::debug!("Converter is not directly executable, retrying through sh");
            converter.run_via_shell(&args, dir, cancel)
        }
        other => other,
    }
    .map_err(|e| match e {
        InvokeError::Spawn(e) => RenderError::ConverterSpawn(e),
        InvokeError::Io(e) => RenderError::Io(e),
        InvokeError::Cancelled => RenderError::Cancelled,
    })?;

    check_output(&output)?;

    let pdf = eps.with_extension("pdf");
    if !pdf.is_file() {
        return Err(RenderError::Conversion {
            status: output.status.to_string(),
            stderr: format!("converter did not produce {}", pdf.display()),
        });
    }
    Ok(pdf)
}

fn check_output(output: &ProcessOutput) -> Result<(), RenderError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(RenderError::Conversion {
            status: output.status.to_string(),
            stderr: output.stderr.clone(),
        })
    }
}

#[cfg(unix)]
fn is_not_executable(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(ENOEXEC)
}

#[cfg(not(unix))]
fn is_not_executable(_e: &std::io::Error) -> bool {
    false
}
