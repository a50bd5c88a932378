//! Directory-backed artifact store.
//!
//! [`FileStore`] keeps every entry as plain files named by key:
//!
//! ```text
//! {root}/
//! +-- VERSION                  # contains the cache version string
//! +-- artifacts/
//!     +-- {key}.{ext}          # one file per artifact
//!     +-- {key}.json           # manifest, published last
//! ```
//!
//! Every file is written to a temporary name inside `artifacts/` and then
//! renamed into place, so readers never observe a partially written file.
//! The manifest goes last: an entry is visible only once it is complete.
//!
//! On construction, [`FileStore`] validates the `VERSION` file in the root.
//! If the version mismatches or is missing, the directories the store owns
//! (`artifacts/`, `staging/`, `placeholders/`) are removed, so entries
//! produced under a different key scheme are never served. Anything else in
//! the root is left alone, and the new `VERSION` is published by rename.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::manifest::Manifest;
use crate::{ArtifactFile, ArtifactStore, CacheEntry, PLACEHOLDER_DIR, STAGING_DIR};

const ARTIFACTS_DIR: &str = "artifacts";
const MANIFEST_EXTENSION: &str = "json";
const VERSION_FILE: &str = "VERSION";

/// Subdirectories cleared when the cache version changes.
const OWNED_DIRS: [&str; 3] = [ARTIFACTS_DIR, STAGING_DIR, PLACEHOLDER_DIR];

/// File-based [`ArtifactStore`] rooted at a directory on disk.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    artifacts: PathBuf,
}

impl FileStore {
    /// Open the store at `root`, validating the cache version.
    ///
    /// If the `VERSION` file inside `root` does not match `version`, the
    /// store's own subdirectories are removed and the new version is written.
    /// Errors during validation are logged but never fatal.
    #[must_use]
    pub fn new(root: PathBuf, version: &str) -> Self {
        validate_version(&root, version);
        let artifacts = root.join(ARTIFACTS_DIR);
        Self { root, artifacts }
    }

    fn artifact_path(&self, key: &str, extension: &str) -> PathBuf {
        self.artifacts.join(format!("{key}.{extension}"))
    }

    fn manifest_path(&self, key: &str) -> PathBuf {
        self.artifact_path(key, MANIFEST_EXTENSION)
    }
}

impl ArtifactStore for FileStore {
    fn lookup(&self, key: &str, extensions: &[&str]) -> Option<CacheEntry> {
        if !is_valid_key(key) {
            return None;
        }

        let bytes = fs::read(self.manifest_path(key)).ok()?;
        let manifest: Manifest = match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::debug!(key, "unreadable cache manifest, treating as miss: {e}");
                return None;
            }
        };
        if !manifest.matches(key, extensions) {
            return None;
        }

        let paths: Vec<PathBuf> = extensions
            .iter()
            .map(|ext| self.artifact_path(key, ext))
            .collect();
        if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
            tracing::debug!(
                key,
                "cache entry is dangling ({} is gone), treating as miss",
                missing.display()
            );
            return None;
        }

        Some(CacheEntry {
            key: key.to_owned(),
            paths,
            created: manifest.created_time(),
        })
    }

    fn store(&self, key: &str, files: &[ArtifactFile<'_>]) -> io::Result<CacheEntry> {
        if !is_valid_key(key) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache key: {key:?}"),
            ));
        }
        if files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cache entry needs at least one artifact file",
            ));
        }

        fs::create_dir_all(&self.artifacts)?;

        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            let dest = self.artifact_path(key, file.extension);
            let mut input = File::open(file.source)?;
            publish(&self.artifacts, &dest, |out| io::copy(&mut input, out).map(drop))?;
            paths.push(dest);
        }

        let extensions = files.iter().map(|f| f.extension.to_owned()).collect();
        let manifest = Manifest::new(key, extensions);
        let json = serde_json::to_vec(&manifest).map_err(io::Error::other)?;
        publish(&self.artifacts, &self.manifest_path(key), |out| {
            out.write_all(&json)
        })?;

        Ok(CacheEntry {
            key: key.to_owned(),
            paths,
            created: manifest.created_time(),
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Write a file through a temporary sibling and rename it over `dest`.
///
/// A concurrent publisher of the same destination simply wins or loses the
/// rename; the destination always holds one writer's complete content.
fn publish(
    dir: &Path,
    dest: &Path,
    write: impl FnOnce(&mut NamedTempFile) -> io::Result<()>,
) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    write(&mut tmp)?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Keys become file names, so they must stay a single path component.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
}

/// Validate the cache version, clearing the store's directories on mismatch.
fn validate_version(root: &Path, version: &str) {
    let version_file = root.join(VERSION_FILE);

    match fs::read_to_string(&version_file) {
        Ok(stored) if stored == version => {
            tracing::debug!("cache version matches: {version}");
            return;
        }
        Ok(stored) => {
            tracing::info!(
                "cache version mismatch (stored={stored}, current={version}), wiping cache"
            );
        }
        Err(_) => {
            tracing::info!("no cache VERSION file found, initializing cache");
        }
    }

    for name in OWNED_DIRS {
        let dir = root.join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::debug!(dir = %dir.display(), "removed stale cache directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove {}: {e}", dir.display()),
        }
    }
    if let Err(e) = fs::create_dir_all(root) {
        tracing::warn!("failed to create cache directory: {e}");
        return;
    }
    if let Err(e) = publish(root, &version_file, |out| out.write_all(version.as_bytes())) {
        tracing::warn!("failed to write cache VERSION file: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rendered(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Names of the visible (non-temporary) files in the artifacts directory.
    fn artifact_names(store: &FileStore) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&store.artifacts)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with(".tmp"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_store_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let png = rendered(tmp.path(), "out.png", b"png-bytes");

        let entry = store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();
        let found = store.lookup("abc", &["png"]).unwrap();

        assert_eq!(found.paths, entry.paths);
        assert_eq!(found.primary(), Some(store.artifacts.join("abc.png").as_path()));
        assert_eq!(found.fallback(), None);
        assert_eq!(fs::read(found.primary().unwrap()).unwrap(), b"png-bytes");
    }

    #[test]
    fn test_lookup_unknown_key_misses() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");

        assert_eq!(store.lookup("nope", &["png"]), None);
    }

    #[test]
    fn test_lookup_with_other_extensions_misses() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let svg = rendered(tmp.path(), "out.svg", b"<svg/>");

        store.store("abc", &[ArtifactFile::new("svg", &svg)]).unwrap();

        assert_eq!(store.lookup("abc", &["png"]), None);
        assert_eq!(store.lookup("abc", &["svg", "png"]), None);
        assert!(store.lookup("abc", &["svg"]).is_some());
    }

    #[test]
    fn test_primary_and_fallback_order() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let svg = rendered(tmp.path(), "out.svg", b"<svg/>");
        let png = rendered(tmp.path(), "out.png", b"png");

        store
            .store(
                "abc",
                &[ArtifactFile::new("svg", &svg), ArtifactFile::new("png", &png)],
            )
            .unwrap();
        let entry = store.lookup("abc", &["svg", "png"]).unwrap();

        assert_eq!(entry.primary(), Some(store.artifacts.join("abc.svg").as_path()));
        assert_eq!(entry.fallback(), Some(store.artifacts.join("abc.png").as_path()));
    }

    #[test]
    fn test_dangling_entry_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let svg = rendered(tmp.path(), "out.svg", b"<svg/>");
        let png = rendered(tmp.path(), "out.png", b"png");

        let entry = store
            .store(
                "abc",
                &[ArtifactFile::new("svg", &svg), ArtifactFile::new("png", &png)],
            )
            .unwrap();
        fs::remove_file(entry.fallback().unwrap()).unwrap();

        assert_eq!(store.lookup("abc", &["svg", "png"]), None);

        // Storing again heals the entry
        store
            .store(
                "abc",
                &[ArtifactFile::new("svg", &svg), ArtifactFile::new("png", &png)],
            )
            .unwrap();
        assert!(store.lookup("abc", &["svg", "png"]).is_some());
    }

    #[test]
    fn test_artifacts_without_manifest_are_invisible() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        fs::create_dir_all(&store.artifacts).unwrap();
        fs::write(store.artifacts.join("abc.png"), b"orphan").unwrap();

        assert_eq!(store.lookup("abc", &["png"]), None);
    }

    #[test]
    fn test_corrupt_manifest_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let png = rendered(tmp.path(), "out.png", b"png");

        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();
        fs::write(store.manifest_path("abc"), b"{not json").unwrap();

        assert_eq!(store.lookup("abc", &["png"]), None);
    }

    #[test]
    fn test_store_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let png = rendered(tmp.path(), "out.png", b"same");

        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();
        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();

        assert_eq!(artifact_names(&store), vec!["abc.json", "abc.png"]);
        let entry = store.lookup("abc", &["png"]).unwrap();
        assert_eq!(fs::read(entry.primary().unwrap()).unwrap(), b"same");
    }

    #[test]
    fn test_concurrent_stores_of_same_key() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(tmp.path().join("cache"), "v1"));
        let png = rendered(tmp.path(), "out.png", b"shared content");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let png = png.clone();
                std::thread::spawn(move || {
                    store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(artifact_names(&store), vec!["abc.json", "abc.png"]);
        let entry = store.lookup("abc", &["png"]).unwrap();
        assert_eq!(fs::read(entry.primary().unwrap()).unwrap(), b"shared content");
    }

    #[test]
    fn test_concurrent_stores_of_different_keys() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(tmp.path().join("cache"), "v1"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let src = rendered(tmp.path(), &format!("out{i}.png"), format!("{i}").as_bytes());
                std::thread::spawn(move || {
                    store
                        .store(&format!("key{i}"), &[ArtifactFile::new("png", &src)])
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            let entry = store.lookup(&format!("key{i}"), &["png"]).unwrap();
            assert_eq!(
                fs::read(entry.primary().unwrap()).unwrap(),
                format!("{i}").as_bytes()
            );
        }
    }

    #[test]
    fn test_store_rejects_path_like_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let png = rendered(tmp.path(), "out.png", b"png");

        for key in ["", "..", "a/b", "a\\b"] {
            let err = store
                .store(key, &[ArtifactFile::new("png", &png)])
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "key {key:?}");
            assert_eq!(store.lookup(key, &["png"]), None);
        }
    }

    #[test]
    fn test_store_requires_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");

        let err = store.store("abc", &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_store_missing_source_fails_without_entry() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("cache"), "v1");
        let missing = tmp.path().join("missing.png");

        assert!(store.store("abc", &[ArtifactFile::new("png", &missing)]).is_err());
        assert_eq!(store.lookup("abc", &["png"]), None);
    }

    #[test]
    fn test_version_match_keeps_cache() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let png = rendered(tmp.path(), "out.png", b"preserved");

        let store = FileStore::new(root.clone(), "v1");
        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();

        let reopened = FileStore::new(root, "v1");
        assert!(reopened.lookup("abc", &["png"]).is_some());
    }

    #[test]
    fn test_version_mismatch_wipes_cache() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let png = rendered(tmp.path(), "out.png", b"will-be-wiped");

        let store = FileStore::new(root.clone(), "v1");
        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();

        let reopened = FileStore::new(root.clone(), "v2");
        assert_eq!(reopened.lookup("abc", &["png"]), None);

        let version = fs::read_to_string(root.join("VERSION")).unwrap();
        assert_eq!(version, "v2");
    }

    #[test]
    fn test_missing_version_file_wipes_cache() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");

        fs::create_dir_all(root.join("artifacts")).unwrap();
        fs::write(root.join("artifacts/orphan.png"), b"stale data").unwrap();

        let _store = FileStore::new(root.clone(), "v1");

        assert!(!root.join("artifacts/orphan.png").exists());
        let version = fs::read_to_string(root.join("VERSION")).unwrap();
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_version_change_keeps_unrelated_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::write(root.join("uml.toml"), "[batch]\nsize = 4\n").unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/flow.puml"), "A -> B").unwrap();
        for dir in ["artifacts", "staging", "placeholders"] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("leftover"), "old").unwrap();
        }

        let _store = FileStore::new(root.clone(), "v1");

        assert_eq!(
            fs::read_to_string(root.join("uml.toml")).unwrap(),
            "[batch]\nsize = 4\n"
        );
        assert_eq!(fs::read_to_string(root.join("docs/flow.puml")).unwrap(), "A -> B");
        for dir in ["artifacts", "staging", "placeholders"] {
            assert!(!root.join(dir).exists(), "{dir} should be cleared");
        }
        assert_eq!(fs::read_to_string(root.join("VERSION")).unwrap(), "v1");
    }

    #[test]
    fn test_reopen_leaves_no_temporary_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let png = rendered(tmp.path(), "out.png", b"published");
        let store = FileStore::new(root.clone(), "v1");

        let reopened = FileStore::new(root.clone(), "v1");
        store.store("abc", &[ArtifactFile::new("png", &png)]).unwrap();

        assert!(reopened.lookup("abc", &["png"]).is_some());
        let leftovers: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
    }

    #[test]
    fn test_nonexistent_root_creates_version() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("deeply/nested/cache");
        assert!(!root.exists());

        let store = FileStore::new(root.clone(), "v1");

        assert!(root.exists());
        assert_eq!(store.root(), root.as_path());
        let version = fs::read_to_string(root.join("VERSION")).unwrap();
        assert_eq!(version, "v1");
    }
}
