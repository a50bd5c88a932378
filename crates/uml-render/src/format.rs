//! Output formats and the render plan behind each of them.
//!
//! [`OutputFormat`] is the closed set of formats a caller may request.
//! Each format maps through [`OutputFormat::plan`] to a fixed
//! [`FormatPlan`]: which raw files the renderer must produce
//! ([`FileFormat`] passes), how they are converted afterwards
//! ([`Conversion`]) and which files end up in the cache entry.

use std::fmt;

use crate::error::ConfigError;

/// Output layer a diagram is rendered for.
///
/// Each target has its own default format and its own set of valid formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// Presentation output (HTML-like builders).
    #[default]
    Html,
    /// Print output (LaTeX-like builders).
    Latex,
    /// Plain text output.
    Text,
}

impl Target {
    /// Parse target from its name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "latex" => Some(Self::Latex),
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Latex => "latex",
            Self::Text => "text",
        }
    }

    /// Formats that may be requested for this target.
    #[must_use]
    pub fn valid_formats(self) -> &'static [OutputFormat] {
        match self {
            Self::Html => &[
                OutputFormat::Png,
                OutputFormat::Svg,
                OutputFormat::SvgImg,
                OutputFormat::SvgObj,
                OutputFormat::Disabled,
            ],
            Self::Latex => &[
                OutputFormat::Eps,
                OutputFormat::Pdf,
                OutputFormat::Png,
                OutputFormat::Tikz,
                OutputFormat::Disabled,
            ],
            Self::Text => &[OutputFormat::Txt, OutputFormat::Disabled],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Raster image.
    Png,
    /// Vector image with a raster fallback (two artifacts).
    Svg,
    /// Vector image, embedded as `<img>` by the presentation layer.
    SvgImg,
    /// Vector image, embedded as `<object>` by the presentation layer.
    SvgObj,
    /// Encapsulated PostScript.
    Eps,
    /// PDF converted from EPS by a secondary tool.
    Pdf,
    /// TikZ picture markup, `\input` by the LaTeX document.
    Tikz,
    /// ASCII art.
    Txt,
    /// Diagrams are not rendered at all.
    Disabled,
}

impl OutputFormat {
    /// Parse format from its configuration name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "png" => Some(Self::Png),
            "svg" => Some(Self::Svg),
            "svg_img" => Some(Self::SvgImg),
            "svg_obj" => Some(Self::SvgObj),
            "eps" => Some(Self::Eps),
            "pdf" => Some(Self::Pdf),
            "tikz" => Some(Self::Tikz),
            "txt" => Some(Self::Txt),
            "none" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Parse a format name and check it is valid for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownFormat`] for an unrecognized name and
    /// [`ConfigError::UnsupportedFormat`] when the format exists but cannot
    /// be produced for `target`.
    pub fn parse_for(s: &str, target: Target) -> Result<Self, ConfigError> {
        let format = Self::parse(s).ok_or_else(|| ConfigError::UnknownFormat(s.to_owned()))?;
        format.check_target(target)?;
        Ok(format)
    }

    /// Check that this format can be produced for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedFormat`] listing the valid formats.
    pub fn check_target(self, target: Target) -> Result<(), ConfigError> {
        if target.valid_formats().contains(&self) {
            return Ok(());
        }
        let valid = target
            .valid_formats()
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::UnsupportedFormat {
            format: self,
            target,
            valid,
        })
    }

    /// Return format as its configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
            Self::SvgImg => "svg_img",
            Self::SvgObj => "svg_obj",
            Self::Eps => "eps",
            Self::Pdf => "pdf",
            Self::Tikz => "tikz",
            Self::Txt => "txt",
            Self::Disabled => "none",
        }
    }

    /// Render plan for this format, or `None` for [`OutputFormat::Disabled`].
    #[must_use]
    pub fn plan(self) -> Option<FormatPlan> {
        let plan = match self {
            Self::Png => FormatPlan {
                cache_tag: "png",
                passes: &[FileFormat::Png],
                conversion: Conversion::None,
                extensions: &["png"],
            },
            Self::Svg => FormatPlan {
                cache_tag: "svg+png",
                passes: &[FileFormat::Svg, FileFormat::Png],
                conversion: Conversion::None,
                extensions: &["svg", "png"],
            },
            // Presentation-only variants of the same single SVG pass
            Self::SvgImg | Self::SvgObj => FormatPlan {
                cache_tag: "svg",
                passes: &[FileFormat::Svg],
                conversion: Conversion::None,
                extensions: &["svg"],
            },
            Self::Eps => FormatPlan {
                cache_tag: "eps",
                passes: &[FileFormat::Eps],
                conversion: Conversion::None,
                extensions: &["eps"],
            },
            Self::Pdf => FormatPlan {
                cache_tag: "pdf",
                passes: &[FileFormat::Eps],
                conversion: Conversion::EpsToPdf,
                extensions: &["pdf"],
            },
            Self::Tikz => FormatPlan {
                cache_tag: "tikz",
                passes: &[FileFormat::Latex],
                conversion: Conversion::None,
                extensions: &["latex"],
            },
            Self::Txt => FormatPlan {
                cache_tag: "txt",
                passes: &[FileFormat::Txt],
                conversion: Conversion::None,
                extensions: &["txt"],
            },
            Self::Disabled => return None,
        };
        Some(plan)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an [`OutputFormat`] is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPlan {
    /// Tag mixed into the fingerprint. Formats producing identical artifacts
    /// share a tag.
    pub cache_tag: &'static str,
    /// Raw renderer passes, primary first.
    pub passes: &'static [FileFormat],
    /// Post-render conversion applied to the first pass.
    pub conversion: Conversion,
    /// Extensions of the final artifacts, primary first.
    pub extensions: &'static [&'static str],
}

/// Raw file format produced by one renderer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileFormat {
    Png,
    Svg,
    Eps,
    Latex,
    Txt,
}

impl FileFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
            Self::Eps => "eps",
            Self::Latex => "latex",
            Self::Txt => "txt",
        }
    }

    /// Renderer arguments selecting this format.
    #[must_use]
    pub fn renderer_args(self) -> &'static [&'static str] {
        match self {
            Self::Png => &[],
            Self::Svg => &["-tsvg"],
            Self::Eps => &["-teps"],
            Self::Latex => &["-tlatex:nopreamble"],
            Self::Txt => &["-ttxt"],
        }
    }

    /// Whether several diagrams can be rendered to this format in one
    /// invocation.
    ///
    /// EPS, LaTeX and text output always go through single dispatch.
    #[must_use]
    pub fn batchable(self) -> bool {
        matches!(self, Self::Png | Self::Svg)
    }
}

/// Post-render conversion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// The raw pass output is the final artifact.
    None,
    /// Convert EPS to PDF with the secondary conversion tool.
    EpsToPdf,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OutputFormat; 9] = [
        OutputFormat::Png,
        OutputFormat::Svg,
        OutputFormat::SvgImg,
        OutputFormat::SvgObj,
        OutputFormat::Eps,
        OutputFormat::Pdf,
        OutputFormat::Tikz,
        OutputFormat::Txt,
        OutputFormat::Disabled,
    ];

    #[test]
    fn test_parse_roundtrips_names() {
        for format in ALL {
            assert_eq!(OutputFormat::parse(format.as_str()), Some(format));
        }
        assert_eq!(OutputFormat::parse("jpeg"), None);
    }

    #[test]
    fn test_html_formats() {
        for name in ["png", "svg", "svg_img", "svg_obj", "none"] {
            assert!(OutputFormat::parse_for(name, Target::Html).is_ok(), "{name}");
        }
        let err = OutputFormat::parse_for("pdf", Target::Html).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
        assert!(err.to_string().contains("png, svg, svg_img, svg_obj, none"));
    }

    #[test]
    fn test_latex_formats() {
        for name in ["eps", "pdf", "png", "tikz", "none"] {
            assert!(OutputFormat::parse_for(name, Target::Latex).is_ok(), "{name}");
        }
        assert!(OutputFormat::parse_for("svg", Target::Latex).is_err());
        assert!(OutputFormat::parse_for("tikz", Target::Html).is_err());
    }

    #[test]
    fn test_unknown_format_name() {
        let err = OutputFormat::parse_for("gif", Target::Html).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat(ref s) if s == "gif"));
    }

    #[test]
    fn test_every_format_has_consistent_plan() {
        for format in ALL {
            let Some(plan) = format.plan() else {
                assert_eq!(format, OutputFormat::Disabled);
                continue;
            };
            assert!(!plan.passes.is_empty(), "{format}");
            match plan.conversion {
                // Without conversion every pass becomes one artifact
                Conversion::None => {
                    let exts: Vec<_> = plan.passes.iter().map(|p| p.extension()).collect();
                    assert_eq!(exts, plan.extensions, "{format}");
                }
                Conversion::EpsToPdf => {
                    assert_eq!(plan.passes, &[FileFormat::Eps]);
                    assert_eq!(plan.extensions, &["pdf"]);
                }
            }
        }
    }

    #[test]
    fn test_svg_has_png_fallback() {
        let plan = OutputFormat::Svg.plan().unwrap();
        assert_eq!(plan.passes, &[FileFormat::Svg, FileFormat::Png]);
        assert_eq!(plan.extensions, &["svg", "png"]);
    }

    #[test]
    fn test_presentation_variants_share_cache_tag() {
        let img = OutputFormat::SvgImg.plan().unwrap();
        let obj = OutputFormat::SvgObj.plan().unwrap();
        let svg = OutputFormat::Svg.plan().unwrap();

        assert_eq!(img.cache_tag, obj.cache_tag);
        assert_ne!(img.cache_tag, svg.cache_tag);
    }

    #[test]
    fn test_batchable_passes() {
        assert!(FileFormat::Png.batchable());
        assert!(FileFormat::Svg.batchable());
        assert!(!FileFormat::Eps.batchable());
        assert!(!FileFormat::Latex.batchable());
        assert!(!FileFormat::Txt.batchable());
    }

    #[test]
    fn test_renderer_args() {
        assert!(FileFormat::Png.renderer_args().is_empty());
        assert_eq!(FileFormat::Svg.renderer_args(), &["-tsvg"]);
        assert_eq!(FileFormat::Eps.renderer_args(), &["-teps"]);
        assert_eq!(FileFormat::Latex.renderer_args(), &["-tlatex:nopreamble"]);
        assert_eq!(FileFormat::Txt.renderer_args(), &["-ttxt"]);
    }

    #[test]
    fn test_tikz_plan() {
        let plan = OutputFormat::Tikz.plan().unwrap();

        assert_eq!(plan.passes, &[FileFormat::Latex]);
        assert_eq!(plan.extensions, &["latex"]);
        assert_eq!(plan.conversion, Conversion::None);
    }
}
