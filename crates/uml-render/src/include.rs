//! `!include` expansion.
//!
//! Included files are inlined into the diagram source before it is
//! fingerprinted, so an edit to an included file changes the cache key and
//! the renderer never has to look outside its staging directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::consts::MAX_INCLUDE_DEPTH;

static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)!include[ \t]+(\S.*?)[ \t]*\r?\n?$").unwrap());

/// Diagram source after include expansion.
#[derive(Debug)]
pub struct Expanded {
    /// Source with every resolvable `!include` inlined.
    pub source: String,
    /// One message per directive left in place.
    pub warnings: Vec<String>,
}

/// Expand `!include` directives in diagram source.
///
/// `base_dir` (the directory of a file-backed diagram) is searched before
/// the configured `include_dirs`. Inlined lines take the indentation of the
/// directive. Standard library includes (`!include <name>`) and files that
/// cannot be found stay as written for the renderer to handle.
#[must_use]
pub fn expand_includes(
    source: &str,
    base_dir: Option<&Path>,
    include_dirs: &[PathBuf],
) -> Expanded {
    let mut expander = Expander {
        dirs: base_dir
            .into_iter()
            .chain(include_dirs.iter().map(PathBuf::as_path))
            .collect(),
        warnings: Vec::new(),
    };
    let mut out = String::with_capacity(source.len());
    expander.expand_into(source, "", 0, &mut out);
    Expanded {
        source: out,
        warnings: expander.warnings,
    }
}

struct Expander<'a> {
    dirs: Vec<&'a Path>,
    warnings: Vec<String>,
}

impl Expander<'_> {
    /// Append `source` to `out`, prefixing each non-empty line with `indent`.
    fn expand_into(&mut self, source: &str, indent: &str, depth: usize, out: &mut String) {
        for line in source.split_inclusive('\n') {
            let directive = DIRECTIVE
                .captures(line)
                .and_then(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())));
            let Some((own_indent, target)) = directive else {
                push_line(out, indent, line);
                continue;
            };
            if target.starts_with('<') {
                push_line(out, indent, line);
                continue;
            }
            if depth >= MAX_INCLUDE_DEPTH {
                self.warnings.push(format!(
                    "'{target}' not inlined: includes nested deeper than {MAX_INCLUDE_DEPTH} levels"
                ));
                push_line(out, indent, line);
                continue;
            }
            let Some(content) = self.read(target) else {
                push_line(out, indent, line);
                continue;
            };

            let nested_indent = format!("{indent}{own_indent}");
            self.expand_into(&content, &nested_indent, depth + 1, out);
            if line.ends_with('\n') && !out.ends_with('\n') {
                out.push('\n');
            }
        }
    }

    fn read(&mut self, target: &str) -> Option<String> {
        if let Some(content) = self
            .dirs
            .iter()
            .find_map(|dir| std::fs::read_to_string(dir.join(target)).ok())
        {
            return Some(content);
        }

        let warning = if self.dirs.is_empty() {
            format!("include '{target}' not found: no include directories configured")
        } else {
            let searched: Vec<String> = self
                .dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect();
            format!("include '{target}' not found in {}", searched.join(", "))
        };
        self.warnings.push(warning);
        None
    }
}

fn push_line(out: &mut String, indent: &str, line: &str) {
    if !line.trim_end_matches(['\r', '\n']).is_empty() {
        out.push_str(indent);
    }
    out.push_str(line);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn fixtures(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_plain_sequence_passes_through() {
        let source = "participant Client\nClient -> Server: GET /\n";

        let expanded = expand_includes(source, None, &[]);

        assert_eq!(expanded.source, source);
        assert_eq!(expanded.warnings, Vec::<String>::new());
    }

    #[test]
    fn test_shared_skin_inlined_from_diagram_directory() {
        let docs = fixtures(&[("skin.iuml", "skinparam shadowing false\n")]);

        let expanded = expand_includes(
            "!include skin.iuml\nClient -> Server\n",
            Some(docs.path()),
            &[],
        );

        assert_eq!(expanded.source, "skinparam shadowing false\nClient -> Server\n");
    }

    #[test]
    fn test_diagram_directory_wins_over_include_dirs() {
        let docs = fixtures(&[("actors.iuml", "actor Reader\n")]);
        let shared = fixtures(&[("actors.iuml", "actor Writer\n")]);

        let expanded = expand_includes(
            "!include actors.iuml\n",
            Some(docs.path()),
            &[shared.path().to_path_buf()],
        );

        assert_eq!(expanded.source, "actor Reader\n");
    }

    #[test]
    fn test_included_lines_follow_directive_indent() {
        let shared = fixtures(&[("box.iuml", "participant Cache\n\nparticipant Store")]);

        let expanded = expand_includes(
            "box Storage\n    !include box.iuml\nend box\n",
            None,
            &[shared.path().to_path_buf()],
        );

        assert_eq!(
            expanded.source,
            "box Storage\n    participant Cache\n\n    participant Store\nend box\n"
        );
    }

    #[test]
    fn test_indentation_accumulates_through_nesting() {
        let shared = fixtures(&[
            ("outer.iuml", "group retry\n  !include inner.iuml\nend\n"),
            ("inner.iuml", "Client -> Server\n"),
        ]);

        let expanded = expand_includes(
            "  !include outer.iuml\n",
            None,
            &[shared.path().to_path_buf()],
        );

        assert_eq!(
            expanded.source,
            "  group retry\n    Client -> Server\n  end\n"
        );
    }

    #[test]
    fn test_include_from_subdirectory() {
        let shared = fixtures(&[("common/colors.iuml", "!define PRIMARY #336699\n")]);

        let expanded = expand_includes(
            "!include common/colors.iuml\n",
            None,
            &[shared.path().to_path_buf()],
        );

        assert_eq!(expanded.source, "!define PRIMARY #336699\n");
    }

    #[test]
    fn test_missing_file_is_kept_with_warning() {
        let expanded = expand_includes("!include absent.iuml\nA -> B\n", None, &[]);

        assert_eq!(expanded.source, "!include absent.iuml\nA -> B\n");
        assert_eq!(
            expanded.warnings,
            vec!["include 'absent.iuml' not found: no include directories configured"]
        );
    }

    #[test]
    fn test_missing_file_warning_lists_search_path() {
        let expanded = expand_includes(
            "!include absent.iuml",
            Some(Path::new("/docs")),
            &[PathBuf::from("/shared")],
        );

        assert_eq!(
            expanded.warnings,
            vec!["include 'absent.iuml' not found in /docs, /shared"]
        );
    }

    #[test]
    fn test_stdlib_reference_left_to_renderer() {
        let source = "!include <C4/C4_Container>\nPerson(user, \"User\")\n";

        let expanded = expand_includes(source, None, &[]);

        assert_eq!(expanded.source, source);
        assert!(expanded.warnings.is_empty());
    }

    #[test]
    fn test_self_include_stops_at_depth_limit() {
        let shared = fixtures(&[("loop.iuml", "!include loop.iuml\n")]);

        let expanded = expand_includes(
            "!include loop.iuml\n",
            None,
            &[shared.path().to_path_buf()],
        );

        assert_eq!(expanded.source, "!include loop.iuml\n");
        assert_eq!(expanded.warnings.len(), 1);
        assert!(expanded.warnings[0].contains("nested deeper than 10 levels"));
    }

    #[test]
    fn test_crlf_directive_keeps_line_break() {
        let shared = fixtures(&[("note.iuml", "note left: cached")]);

        let expanded = expand_includes(
            "!include note.iuml\r\nA -> B\r\n",
            None,
            &[shared.path().to_path_buf()],
        );

        assert_eq!(expanded.source, "note left: cached\nA -> B\r\n");
    }
}
