//! Environment variable and home directory expansion for configuration strings.
//!
//! Supports:
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//! - leading `~` in paths - expands to the home directory

use crate::ConfigError;

/// Expand environment variable references in a string.
///
/// Returns the original string unchanged if no `${}` patterns are present.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |var| -> Result<Option<String>, LookupError> {
        match std::env::var(var) {
            Ok(val) => Ok(Some(val)),
            Err(_) => Err(LookupError {
                var_name: var.to_owned(),
            }),
        }
    })
    .map(std::borrow::Cow::into_owned)
    .map_err(|e| ConfigError::EnvVar {
        field: field.to_owned(),
        message: format!("${{{0}}} not set", e.cause.var_name),
    })
}

/// Expand environment variables, then a leading `~`, in a path string.
pub(crate) fn expand_path(value: &str, field: &str) -> Result<String, ConfigError> {
    let expanded = expand_env(value, field)?;
    Ok(shellexpand::tilde(&expanded).into_owned())
}

/// Error returned when environment variable lookup fails.
struct LookupError {
    var_name: String,
}
