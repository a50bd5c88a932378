//! Internal constants for diagram rendering.

use std::time::Duration;

/// Cache namespace version.
///
/// Pinned to the fingerprint algorithm and field order. Bumping it makes
/// existing stores wipe themselves on the next open.
pub const CACHE_VERSION: &str = "uml-render-1";

/// Default renderer executable.
pub const DEFAULT_COMMAND: &str = "plantuml";

/// Default EPS-to-PDF converter executable.
pub const DEFAULT_EPSTOPDF: &str = "epstopdf";

/// Default batch size (1 disables batching).
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// How often running child processes are checked for exit or cancellation.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum number of characters of diagram source quoted in diagnostics.
pub(crate) const EXCERPT_LEN: usize = 60;

/// Maximum nesting of `!include` directives.
pub(crate) const MAX_INCLUDE_DEPTH: usize = 10;
