//! `uml render` command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use uml_cache::FileStore;
use uml_config::{CliSettings, Config};
use uml_render::{
    CACHE_VERSION, DiagramSource, OutputArtifact, OutputFormat, RenderEngine, RenderQueue,
    RenderRequest, Target,
};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the render command.
#[derive(Args)]
pub(crate) struct RenderArgs {
    /// Diagram source files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to configuration file (default: auto-discover uml.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output target the diagrams are rendered for.
    #[arg(short, long, default_value = "html", value_parser = parse_target)]
    target: Target,

    /// Output format (default: the configured format for the target).
    #[arg(short, long)]
    format: Option<String>,

    /// Maximum diagrams per renderer invocation (overrides config).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent renderer invocations (overrides config).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Cache directory (overrides config).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Deliver error placeholders for diagrams that fail to render.
    #[arg(long)]
    substitute_errors: bool,

    /// Renderer command line (overrides config).
    #[arg(long, env = "UML_COMMAND")]
    command: Option<String>,

    /// Enable verbose output (show cache and dispatch logs).
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_target(s: &str) -> Result<Target, String> {
    Target::parse(s).ok_or_else(|| format!("unknown target '{s}' (valid: html, latex, text)"))
}

impl RenderArgs {
    /// Execute the render command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the dispatch cannot run, or
    /// any diagram failed without a placeholder.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let format = self
            .format
            .as_deref()
            .map(|name| OutputFormat::parse_for(name, self.target))
            .transpose()
            .map_err(|e| CliError::Validation(e.to_string()))?;

        let cli_settings = CliSettings {
            cache_dir: self.cache_dir,
            batch_size: self.batch_size,
            parallelism: self.jobs,
            substitute_errors: self.substitute_errors.then_some(true),
            command: self
                .command
                .map(|line| line.split_whitespace().map(str::to_owned).collect()),
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        tracing::debug!(path = ?config.config_path, "Loaded configuration");

        output.info(&format!(
            "Cache directory: {}",
            config.cache_resolved.dir.display()
        ));

        let engine = build_engine(&config);
        let mut queue = RenderQueue::new();
        let tickets: Vec<_> = self
            .files
            .iter()
            .enumerate()
            .map(|(position, path)| {
                let mut request =
                    RenderRequest::new(DiagramSource::File(path.clone()), self.target, position);
                if let Some(format) = format {
                    request = request.format(format);
                }
                queue.push(request)
            })
            .collect();

        let report = queue.flush(&engine)?;

        for ticket in tickets {
            if let Some(artifact) = report.get(ticket) {
                output.line(&artifact_line(artifact));
            }
        }

        for failure in &report.failures {
            let file = self.files[failure.position].display();
            output.warning(&format!("{file}: {}", failure.error));
        }

        let stats = report.stats;
        let summary = format!(
            "{} diagrams: {} cached, {} rendered, {} failed ({} renderer invocations)",
            stats.requests, stats.cache_hits, stats.rendered, stats.failed, stats.invocations
        );
        if report.is_complete() {
            output.success(&summary);
            Ok(())
        } else {
            output.info(&summary);
            Err(CliError::Incomplete {
                failed: report.failures.iter().filter(|f| !f.substituted).count(),
                total: stats.requests,
            })
        }
    }
}

/// Build the render engine from loaded configuration.
fn build_engine(config: &Config) -> RenderEngine {
    let store = Arc::new(FileStore::new(
        config.cache_resolved.dir.clone(),
        CACHE_VERSION,
    ));
    let renderer = &config.renderer_resolved;
    let output = &config.output_resolved;

    let engine = RenderEngine::new(renderer.command.clone(), store)
        .epstopdf(renderer.epstopdf.clone())
        .include_dirs(&renderer.include_dirs)
        .html_format(output.html_format)
        .latex_format(output.latex_format)
        .substitute_errors(output.substitute_errors)
        .batch_size(config.batch.size);

    match config.batch.parallelism {
        Some(threads) => engine.parallelism(threads),
        None => engine,
    }
}

/// Format one artifact as `position<TAB>primary[<TAB>fallback]`.
fn artifact_line(artifact: &OutputArtifact) -> String {
    match &artifact.fallback {
        Some(fallback) => format!(
            "{}\t{}\t{}",
            artifact.position,
            artifact.primary.display(),
            fallback.display()
        ),
        None => format!("{}\t{}", artifact.position, artifact.primary.display()),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use uml_render::{Delivered, Sizing};

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RenderArgs,
    }

    fn artifact(fallback: Option<&str>) -> OutputArtifact {
        OutputArtifact {
            position: 3,
            primary: PathBuf::from("/cache/artifacts/abc.svg"),
            fallback: fallback.map(PathBuf::from),
            delivered: Delivered::Format(OutputFormat::Svg),
            sizing: Sizing::default(),
            cached: false,
        }
    }

    #[test]
    fn test_artifact_line_primary_only() {
        assert_eq!(artifact_line(&artifact(None)), "3\t/cache/artifacts/abc.svg");
    }

    #[test]
    fn test_artifact_line_with_fallback() {
        assert_eq!(
            artifact_line(&artifact(Some("/cache/artifacts/abc.png"))),
            "3\t/cache/artifacts/abc.svg\t/cache/artifacts/abc.png"
        );
    }

    #[test]
    fn test_parse_args() {
        let cli = TestCli::try_parse_from([
            "uml",
            "a.puml",
            "b.puml",
            "--target",
            "latex",
            "--format",
            "pdf",
            "--batch-size",
            "50",
            "-j",
            "2",
            "--substitute-errors",
        ])
        .unwrap();
        let args = cli.args;

        assert_eq!(
            args.files,
            vec![PathBuf::from("a.puml"), PathBuf::from("b.puml")]
        );
        assert_eq!(args.target, Target::Latex);
        assert_eq!(args.format.as_deref(), Some("pdf"));
        assert_eq!(args.batch_size, Some(50));
        assert_eq!(args.jobs, Some(2));
        assert!(args.substitute_errors);
        assert!(!args.verbose);
    }

    #[test]
    fn test_parse_args_unknown_target() {
        let err = TestCli::try_parse_from(["uml", "a.puml", "--target", "pdf"])
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown target 'pdf'"));
    }

    #[test]
    fn test_parse_args_requires_files() {
        assert!(TestCli::try_parse_from(["uml"]).is_err());
    }

    #[test]
    fn test_build_engine_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uml.toml");
        std::fs::write(&path, "[batch]\nsize = 10\nparallelism = 2\n").unwrap();
        let config = Config::load(Some(&path), None).unwrap();

        let engine = build_engine(&config);
        let report = engine.dispatch(&[]).unwrap();

        assert_eq!(report.stats.requests, 0);
        assert!(report.is_complete());
    }
}
