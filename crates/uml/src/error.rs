//! CLI error types.

use uml_config::ConfigError;
use uml_render::DispatchError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Validation(String),

    #[error("{failed} of {total} diagrams failed to render")]
    Incomplete { failed: usize, total: usize },
}
