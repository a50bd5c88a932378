//! Configuration management for uml.
//!
//! Parses `uml.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! Command and path values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Paths additionally expand a leading `~` to the home directory.
//!
//! Expanded fields:
//! - `renderer.command`
//! - `renderer.epstopdf`
//! - `renderer.include_dirs`
//! - `cache.dir`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use uml_render::{DEFAULT_BATCH_SIZE, DEFAULT_COMMAND, DEFAULT_EPSTOPDF, OutputFormat, Target};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Override batch size.
    pub batch_size: Option<usize>,
    /// Override number of concurrent renderer invocations.
    pub parallelism: Option<usize>,
    /// Override placeholder substitution.
    pub substitute_errors: Option<bool>,
    /// Override renderer command line.
    pub command: Option<Vec<String>>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "uml.toml";

/// Default cache directory, relative to the config file.
const DEFAULT_CACHE_DIR: &str = ".uml/cache";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Renderer configuration (commands and paths as written in TOML).
    renderer: RendererConfigRaw,
    /// Output configuration (format names as written in TOML).
    output: OutputConfigRaw,
    /// Cache configuration (path as written in TOML).
    cache: CacheConfigRaw,
    /// Batching configuration.
    pub batch: BatchConfig,

    /// Resolved renderer configuration (set after loading).
    #[serde(skip)]
    pub renderer_resolved: RendererConfig,
    /// Resolved output configuration (set after loading).
    #[serde(skip)]
    pub output_resolved: OutputConfig,
    /// Resolved cache configuration (set after loading).
    #[serde(skip)]
    pub cache_resolved: CacheConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// A command line, written either as one string or as an argument list.
///
/// ```toml
/// command = "java -jar /opt/plantuml.jar"
/// command = ["java", "-jar", "/opt/plant uml/plantuml.jar"]
/// ```
///
/// The string form is split on whitespace; use the list form for arguments
/// containing spaces.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum CommandLine {
    Line(String),
    Args(Vec<String>),
}

impl CommandLine {
    /// Expand environment variables and split into arguments.
    fn resolve(&self, field: &str) -> Result<Vec<String>, ConfigError> {
        match self {
            Self::Line(line) => Ok(expand::expand_env(line, field)?
                .split_whitespace()
                .map(str::to_owned)
                .collect()),
            Self::Args(args) => args.iter().map(|arg| expand::expand_env(arg, field)).collect(),
        }
    }
}

/// Raw renderer configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RendererConfigRaw {
    command: Option<CommandLine>,
    epstopdf: Option<CommandLine>,
    include_dirs: Option<Vec<String>>,
}

/// Resolved renderer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Renderer command line, program first.
    pub command: Vec<String>,
    /// EPS-to-PDF converter command line, program first.
    pub epstopdf: Vec<String>,
    /// Directories to search for `!include` files.
    pub include_dirs: Vec<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_COMMAND.to_owned()],
            epstopdf: vec![DEFAULT_EPSTOPDF.to_owned()],
            include_dirs: Vec::new(),
        }
    }
}

/// Raw output configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OutputConfigRaw {
    html_format: Option<String>,
    latex_format: Option<String>,
    substitute_errors: Option<bool>,
}

/// Resolved output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// Default format for HTML output.
    pub html_format: OutputFormat,
    /// Default format for LaTeX output.
    pub latex_format: OutputFormat,
    /// Deliver error placeholders for failed diagrams.
    pub substitute_errors: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            html_format: OutputFormat::Png,
            latex_format: OutputFormat::Png,
            substitute_errors: false,
        }
    }
}

/// Raw cache configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CacheConfigRaw {
    dir: Option<String>,
}

/// Resolved cache configuration with absolute paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache directory.
    pub dir: PathBuf,
}

/// Batching configuration.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum diagrams per renderer invocation (1 disables batching).
    pub size: usize,
    /// Concurrent renderer invocations (default: available CPUs).
    pub parallelism: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            parallelism: None,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`renderer.command`").
        field: String,
        /// Error message (e.g., "${`PLANTUML`} not set").
        message: String,
    },
}

/// Resolve a relative program path (one with a directory part, such as
/// `./tools/plantuml`) against the config directory.
///
/// Bare names are left for `PATH` lookup.
fn anchor_program(mut command: Vec<String>, config_dir: &Path) -> Vec<String> {
    if let Some(program) = command.first_mut() {
        let path = Path::new(program.as_str());
        if path.is_relative() && path.components().count() > 1 {
            *program = config_dir.join(path).display().to_string();
        }
    }
    command
}

/// Require a command line to name a program.
fn require_command(command: &[String], field: &str) -> Result<(), ConfigError> {
    if command.first().is_none_or(|program| program.is_empty()) {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Parse a format name and check it against `target`.
fn parse_format(
    name: Option<&str>,
    target: Target,
    field: &str,
) -> Result<OutputFormat, ConfigError> {
    let Some(name) = name else {
        return Ok(OutputFormat::Png);
    };
    OutputFormat::parse_for(name, target)
        .map_err(|e| ConfigError::Validation(format!("{field}: {e}")))
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `uml.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values. The result is
    /// validated after the overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = std::env::current_dir()
            .ok()
            .and_then(|cwd| Self::discover_config(&cwd))
        {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(cache_dir) = &settings.cache_dir {
            self.cache_resolved.dir.clone_from(cache_dir);
        }
        if let Some(batch_size) = settings.batch_size {
            self.batch.size = batch_size;
        }
        if let Some(parallelism) = settings.parallelism {
            self.batch.parallelism = Some(parallelism);
        }
        if let Some(substitute_errors) = settings.substitute_errors {
            self.output_resolved.substitute_errors = substitute_errors;
        }
        if let Some(command) = &settings.command {
            self.renderer_resolved.command.clone_from(command);
        }
    }

    /// Search for config file in `start` and its parents.
    fn discover_config(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            renderer: RendererConfigRaw::default(),
            output: OutputConfigRaw::default(),
            cache: CacheConfigRaw::default(),
            batch: BatchConfig::default(),
            renderer_resolved: RendererConfig::default(),
            output_resolved: OutputConfig::default(),
            cache_resolved: CacheConfig {
                dir: base.join(DEFAULT_CACHE_DIR),
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve(config_dir)?;
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically by [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_command(&self.renderer_resolved.command, "renderer.command")?;
        require_command(&self.renderer_resolved.epstopdf, "renderer.epstopdf")?;

        if self.batch.size == 0 {
            return Err(ConfigError::Validation(
                "batch.size must be at least 1".to_owned(),
            ));
        }
        if self.batch.parallelism == Some(0) {
            return Err(ConfigError::Validation(
                "batch.parallelism must be at least 1".to_owned(),
            ));
        }

        Ok(())
    }

    /// Expand variables, resolve relative paths against the config directory
    /// and parse format names.
    fn resolve(&mut self, config_dir: &Path) -> Result<(), ConfigError> {
        let defaults = RendererConfig::default();
        let command = match &self.renderer.command {
            Some(command) => anchor_program(command.resolve("renderer.command")?, config_dir),
            None => defaults.command,
        };
        let epstopdf = match &self.renderer.epstopdf {
            Some(command) => anchor_program(command.resolve("renderer.epstopdf")?, config_dir),
            None => defaults.epstopdf,
        };
        let include_dirs = self
            .renderer
            .include_dirs
            .iter()
            .flatten()
            .map(|dir| {
                expand::expand_path(dir, "renderer.include_dirs").map(|dir| config_dir.join(dir))
            })
            .collect::<Result<_, _>>()?;
        self.renderer_resolved = RendererConfig {
            command,
            epstopdf,
            include_dirs,
        };

        self.output_resolved = OutputConfig {
            html_format: parse_format(
                self.output.html_format.as_deref(),
                Target::Html,
                "output.html_format",
            )?,
            latex_format: parse_format(
                self.output.latex_format.as_deref(),
                Target::Latex,
                "output.latex_format",
            )?,
            substitute_errors: self.output.substitute_errors.unwrap_or(false),
        };

        let cache_dir = match &self.cache.dir {
            Some(dir) => expand::expand_path(dir, "cache.dir")?,
            None => DEFAULT_CACHE_DIR.to_owned(),
        };
        self.cache_resolved = CacheConfig {
            dir: config_dir.join(cache_dir),
        };

        Ok(())
    }
}
