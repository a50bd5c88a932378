//! Content-addressed artifact store for rendered diagrams.
//!
//! This crate decouples the render engine from the on-disk layout of its
//! cache. Two types form the core API:
//!
//! - [`ArtifactStore`]: lookup and publish of artifact files under a key
//! - [`CacheEntry`]: an immutable, complete set of artifact files
//!
//! # Implementations
//!
//! - [`FileStore`]: directory-backed store with version validation and
//!   atomic publish
//!
//! Keys are opaque strings chosen by the caller (the render engine uses hex
//! fingerprints). Each artifact file is identified by its extension, so one
//! key may own several files, e.g. an SVG with a PNG fallback.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use uml_cache::{ArtifactFile, ArtifactStore, FileStore};
//!
//! let store = FileStore::new(".uml/cache".into(), "v1");
//! let entry = store
//!     .store("abc123", &[ArtifactFile::new("png", Path::new("/tmp/out.png"))])
//!     .unwrap();
//! assert_eq!(store.lookup("abc123", &["png"]).unwrap().paths, entry.paths);
//! ```

mod file;
mod manifest;

pub use file::FileStore;

/// Subdirectory of the store root for in-flight render output.
pub const STAGING_DIR: &str = "staging";

/// Subdirectory of the store root for error placeholders.
pub const PLACEHOLDER_DIR: &str = "placeholders";

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A published cache entry.
///
/// Entries are created complete and never mutated. `paths` follows the order
/// of the extensions the entry was stored with; by convention the first path
/// is the primary artifact and any further paths are fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub key: String,
    /// Artifact file paths, in stored order.
    pub paths: Vec<PathBuf>,
    /// When the entry was published. Diagnostics only.
    pub created: SystemTime,
}

impl CacheEntry {
    /// Primary artifact path.
    #[must_use]
    pub fn primary(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }

    /// Fallback artifact path, if the entry has one.
    #[must_use]
    pub fn fallback(&self) -> Option<&Path> {
        self.paths.get(1).map(PathBuf::as_path)
    }
}

/// A file to publish into the store.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactFile<'a> {
    /// File extension the artifact is stored with (e.g. `"png"`).
    pub extension: &'a str,
    /// Location of the freshly rendered file.
    pub source: &'a Path,
}

impl<'a> ArtifactFile<'a> {
    #[must_use]
    pub fn new(extension: &'a str, source: &'a Path) -> Self {
        Self { extension, source }
    }
}

/// Persistent mapping from key to artifact files.
///
/// Implementations must be safe to share between threads and between
/// processes writing to the same location: stores of different keys never
/// interfere, and repeated stores of the same key are idempotent.
pub trait ArtifactStore: Send + Sync {
    /// Look up a complete entry.
    ///
    /// Returns `None` when the key is unknown, when it was stored with a
    /// different set of extensions, or when any of its files has been
    /// removed from disk since it was published.
    fn lookup(&self, key: &str, extensions: &[&str]) -> Option<CacheEntry>;

    /// Publish artifact files under `key`.
    ///
    /// Files are copied into the store. The entry becomes visible to
    /// [`lookup`](Self::lookup) only after every file is in place.
    fn store(&self, key: &str, files: &[ArtifactFile<'_>]) -> io::Result<CacheEntry>;

    /// Root directory of the store.
    ///
    /// Callers keep scratch files under [`STAGING_DIR`] and placeholders
    /// under [`PLACEHOLDER_DIR`]; both are cleared with the artifacts when
    /// the store is invalidated.
    fn root(&self) -> &Path;
}
