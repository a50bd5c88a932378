//! Error placeholders delivered in place of failed renders.
//!
//! Placeholders live outside the artifact namespace of the store, so a failed
//! diagram is never served as a cache hit and the next build renders it again.
//!
//! Every artifact extension has its own placeholder, so a substitute can be
//! embedded wherever the real artifact could. Text output shows the diagram
//! source instead, which is still readable.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uml_cache::PLACEHOLDER_DIR;

const ERROR_SVG: &[u8] = include_bytes!("../assets/render-error.svg");
const ERROR_PNG: &[u8] = include_bytes!("../assets/render-error.png");
const ERROR_EPS: &[u8] = include_bytes!("../assets/render-error.eps");
const ERROR_PDF: &[u8] = include_bytes!("../assets/render-error.pdf");
const ERROR_LATEX: &[u8] = include_bytes!("../assets/render-error.latex");
const ERROR_TXT: &[u8] = include_bytes!("../assets/render-error.txt");

fn error_image(extension: &str) -> io::Result<&'static [u8]> {
    match extension {
        "svg" => Ok(ERROR_SVG),
        "png" => Ok(ERROR_PNG),
        "eps" => Ok(ERROR_EPS),
        "pdf" => Ok(ERROR_PDF),
        "latex" => Ok(ERROR_LATEX),
        "txt" => Ok(ERROR_TXT),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no placeholder for '.{other}' artifacts"),
        )),
    }
}

/// Write (or refresh) the error placeholders for `extensions` under `root`.
///
/// Returns one path per extension, in order.
pub(crate) fn placeholders(root: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let dir = root.join(PLACEHOLDER_DIR);
    std::fs::create_dir_all(&dir)?;

    extensions
        .iter()
        .map(|ext| {
            let path = dir.join(format!("render-error.{ext}"));
            write_if_changed(&dir, &path, error_image(ext)?)?;
            Ok(path)
        })
        .collect()
}

/// Write the diagram source as the text substitute of a failed diagram.
pub(crate) fn source_text(root: &Path, key: &str, source: &[u8]) -> io::Result<PathBuf> {
    let dir = root.join(PLACEHOLDER_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("source-{key}.txt"));
    write_if_changed(&dir, &path, source)?;
    Ok(path)
}

fn write_if_changed(dir: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    if std::fs::read(path).is_ok_and(|existing| existing == content) {
        return Ok(());
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_svg_with_png_fallback() {
        let root = tempfile::tempdir().unwrap();

        let paths = placeholders(root.path(), &["svg", "png"]).unwrap();

        let dir = root.path().join("placeholders");
        assert_eq!(
            paths,
            vec![dir.join("render-error.svg"), dir.join("render-error.png")]
        );
        let svg = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(svg.contains("<svg"));
        assert!(std::fs::read(&paths[1]).unwrap().starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn test_print_formats() {
        let root = tempfile::tempdir().unwrap();

        let paths = placeholders(root.path(), &["eps", "pdf", "latex"]).unwrap();

        assert!(std::fs::read(&paths[0]).unwrap().starts_with(b"%!PS-Adobe"));
        assert!(std::fs::read(&paths[1]).unwrap().starts_with(b"%PDF-"));
        let tikz = std::fs::read_to_string(&paths[2]).unwrap();
        assert!(tikz.starts_with("\\begin{tikzpicture}"));
    }

    #[test]
    fn test_unknown_extension() {
        let root = tempfile::tempdir().unwrap();

        let err = placeholders(root.path(), &["gif"]).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_placeholder_is_repaired() {
        let root = tempfile::tempdir().unwrap();
        let path = placeholders(root.path(), &["png"]).unwrap().remove(0);
        std::fs::write(&path, "tampered").unwrap();

        let again = placeholders(root.path(), &["png"]).unwrap().remove(0);

        assert_eq!(again, path);
        assert_eq!(std::fs::read(path).unwrap(), ERROR_PNG);
    }

    #[test]
    fn test_source_text() {
        let root = tempfile::tempdir().unwrap();

        let path = source_text(root.path(), "abc123", b"Alice -> Bob: hi\n").unwrap();

        assert_eq!(path, root.path().join("placeholders/source-abc123.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Alice -> Bob: hi\n");
    }
}
