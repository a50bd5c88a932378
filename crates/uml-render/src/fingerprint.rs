//! Diagram fingerprint computation.
//!
//! Provides [`DiagramKey`] for computing the content-based hash used as the
//! cache key of a rendered diagram.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::consts::CACHE_VERSION;

/// Hex-encoded SHA-256 identity of a render request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Diagram parameters for fingerprint computation.
///
/// Contains every parameter that affects the rendered artifact. Sizing
/// directives are deliberately absent: they are applied by the presentation
/// layer after rendering and never reach the renderer.
#[derive(Debug, Clone, Copy)]
pub struct DiagramKey<'a> {
    /// Diagram source (after include expansion).
    pub source: &'a [u8],
    /// Cache tag of the requested format (see [`FormatPlan::cache_tag`]).
    ///
    /// [`FormatPlan::cache_tag`]: crate::FormatPlan::cache_tag
    pub format: &'a str,
}

impl DiagramKey<'_> {
    /// Compute the fingerprint for this key.
    ///
    /// # Hash Format
    ///
    /// SHA-256 over `version`, `format` and `source`, each preceded by its
    /// length as a little-endian `u64`, so no two distinct field tuples
    /// encode to the same byte stream.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for field in [CACHE_VERSION.as_bytes(), self.format.as_bytes(), self.source] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}
