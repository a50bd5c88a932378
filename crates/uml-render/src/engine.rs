//! Render dispatcher.
//!
//! This module provides [`RenderEngine`], which turns a sequence of
//! [`RenderRequest`]s into artifacts: cache hits are served from the
//! [`ArtifactStore`], misses are deduplicated, grouped into batch or single
//! renderer invocations, run on a bounded worker pool, converted and
//! published, and failures are optionally replaced by placeholders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uml_cache::{ArtifactFile, ArtifactStore, CacheEntry, STAGING_DIR};

use crate::batch::{self, BatchMember, BatchOutcome, PassTask, Unit};
use crate::command::{CancelToken, ExternalTool};
use crate::consts::{DEFAULT_BATCH_SIZE, DEFAULT_COMMAND, DEFAULT_EPSTOPDF};
use crate::convert::convert;
use crate::error::{ConfigError, DispatchError, RenderError, RenderFailure};
use crate::fingerprint::{DiagramKey, Fingerprint};
use crate::format::{Conversion, FileFormat, FormatPlan, OutputFormat, Target};
use crate::include::expand_includes;
use crate::placeholder::{placeholders, source_text};
use crate::pool::WorkerPool;
use crate::queue::Ticket;
use crate::request::{DiagramSource, Delivered, OutputArtifact, RenderRequest, excerpt};
use crate::single;

/// Configuration for rendering (immutable after setup).
struct EngineConfig {
    /// Renderer command line, program first.
    command: Vec<String>,
    /// EPS-to-PDF converter command line.
    epstopdf: Vec<String>,
    /// Artifact store for rendered diagrams.
    store: Arc<dyn ArtifactStore>,
    /// Maximum diagrams per renderer invocation (1 disables batching).
    batch_size: usize,
    /// Worker threads (`None` = available CPUs).
    parallelism: Option<usize>,
    /// Deliver placeholders for failed renders.
    substitute_errors: bool,
    /// Directories to search for `!include` files.
    include_dirs: Vec<PathBuf>,
    /// Default format for [`Target::Html`].
    html_format: OutputFormat,
    /// Default format for [`Target::Latex`].
    latex_format: OutputFormat,
    cancel: CancelToken,
}

/// Batched diagram renderer with a persistent artifact cache.
///
/// # Configuration
///
/// Create the engine with the renderer command and a store, then configure
/// using builder methods:
/// - [`batch_size`](Self::batch_size): diagrams per invocation (default: 1)
/// - [`parallelism`](Self::parallelism): concurrent invocations (default: CPUs)
/// - [`substitute_errors`](Self::substitute_errors): placeholders for failures
/// - [`html_format`](Self::html_format) / [`latex_format`](Self::latex_format):
///   default formats per target (default: png)
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use uml_cache::FileStore;
/// use uml_render::{CACHE_VERSION, RenderEngine, RenderRequest, Target};
///
/// let store = Arc::new(FileStore::new(".uml/cache".into(), CACHE_VERSION));
/// let engine = RenderEngine::new(vec!["plantuml".to_owned()], store).batch_size(100);
///
/// let report = engine
///     .dispatch(&[RenderRequest::new("A -> B: hi", Target::Html, 0)])
///     .unwrap();
/// println!("{:?}", report.artifacts[0]);
/// ```
pub struct RenderEngine {
    config: EngineConfig,
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    /// One slot per request, in request order. `None` for failed requests
    /// without a placeholder and for disabled output.
    pub artifacts: Vec<Option<OutputArtifact>>,
    /// Failed requests, in request order.
    pub failures: Vec<RenderFailure>,
    pub stats: DispatchStats,
}

impl DispatchReport {
    /// Artifact for a queued request.
    #[must_use]
    pub fn get(&self, ticket: Ticket) -> Option<&OutputArtifact> {
        self.artifacts.get(ticket.index()).and_then(Option::as_ref)
    }

    /// Whether every failure was covered by a placeholder.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.iter().all(|f| f.substituted)
    }
}

/// Counters of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests received.
    pub requests: usize,
    /// Requests served from the store.
    pub cache_hits: usize,
    /// Distinct diagrams rendered and published.
    pub rendered: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Renderer processes started.
    pub invocations: usize,
}

/// A distinct diagram to render.
struct Job {
    fingerprint: Fingerprint,
    source: Vec<u8>,
    plan: FormatPlan,
    workdir: PathBuf,
}

/// Where a request's result comes from.
enum Slot {
    Disabled,
    Hit(CacheEntry, OutputFormat),
    Miss(usize, OutputFormat),
    Failed(Arc<RenderError>, OutputFormat),
}

impl RenderEngine {
    /// Create an engine with the given renderer command and store.
    ///
    /// # Arguments
    ///
    /// * `command` - Renderer command line, program first (e.g. `["plantuml"]`
    ///   or `["java", "-jar", "plantuml.jar"]`)
    /// * `store` - Artifact store; placeholders and scratch files are kept
    ///   under its root
    #[must_use]
    pub fn new(command: Vec<String>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config: EngineConfig {
                command,
                epstopdf: vec![DEFAULT_EPSTOPDF.to_owned()],
                store,
                batch_size: DEFAULT_BATCH_SIZE,
                parallelism: None,
                substitute_errors: false,
                include_dirs: Vec::new(),
                html_format: OutputFormat::Png,
                latex_format: OutputFormat::Png,
                cancel: CancelToken::new(),
            },
        }
    }

    /// Create an engine using the default `plantuml` command.
    #[must_use]
    pub fn with_store(store: Arc<dyn ArtifactStore>) -> Self {
        Self::new(vec![DEFAULT_COMMAND.to_owned()], store)
    }

    /// Set the maximum number of diagrams rendered per invocation.
    ///
    /// Default is 1, which disables batching.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the number of concurrent renderer invocations.
    #[must_use]
    pub fn parallelism(mut self, threads: usize) -> Self {
        self.config.parallelism = Some(threads);
        self
    }

    /// Deliver a placeholder artifact for every failed request.
    #[must_use]
    pub fn substitute_errors(mut self, enabled: bool) -> Self {
        self.config.substitute_errors = enabled;
        self
    }

    /// Set the EPS-to-PDF converter command line.
    #[must_use]
    pub fn epstopdf(mut self, command: Vec<String>) -> Self {
        self.config.epstopdf = command;
        self
    }

    /// Set directories to search for `!include` files.
    #[must_use]
    pub fn include_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.config.include_dirs = dirs.to_vec();
        self
    }

    /// Set the default format of [`Target::Html`] requests.
    #[must_use]
    pub fn html_format(mut self, format: OutputFormat) -> Self {
        self.config.html_format = format;
        self
    }

    /// Set the default format of [`Target::Latex`] requests.
    #[must_use]
    pub fn latex_format(mut self, format: OutputFormat) -> Self {
        self.config.latex_format = format;
        self
    }

    /// Use `token` to cancel running dispatches.
    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = token;
        self
    }

    /// Render `requests`, serving cached artifacts where possible.
    ///
    /// Failures of individual diagrams are reported in
    /// [`DispatchReport::failures`] and never affect other requests.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] when the engine cannot run as
    /// configured (invalid settings, unsupported format for a target, missing
    /// executable), [`DispatchError::Cancelled`] when the cancel token was
    /// set, and an error when the scratch directory or worker pool cannot be
    /// set up.
    pub fn dispatch(&self, requests: &[RenderRequest]) -> Result<DispatchReport, DispatchError> {
        let config = &self.config;
        self.validate()?;
        if config.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let formats = requests
            .iter()
            .map(|r| self.resolve_format(r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs: Vec<Job> = Vec::new();
        let mut job_index: HashMap<Fingerprint, usize> = HashMap::new();
        let mut excerpts = Vec::with_capacity(requests.len());
        let mut slots = Vec::with_capacity(requests.len());

        for (request, format) in requests.iter().zip(formats) {
            let Some(plan) = format.plan() else {
                excerpts.push(String::new());
                slots.push(Slot::Disabled);
                continue;
            };
            let source = match Self::read_source(config, &request.source) {
                Ok(source) => source,
                Err(e) => {
                    excerpts.push(String::new());
                    slots.push(Slot::Failed(Arc::new(e), format));
                    continue;
                }
            };
            excerpts.push(excerpt(&source));

            let fingerprint = DiagramKey {
                source: &source,
                format: plan.cache_tag,
            }
            .fingerprint();

            if let Some(entry) = config.store.lookup(fingerprint.as_str(), plan.extensions) {
                tracing::debug!(position = request.position, key = %fingerprint, "Cache hit");
                slots.push(Slot::Hit(entry, format));
                continue;
            }
            tracing::debug!(position = request.position, key = %fingerprint, "Cache miss");

            let job = *job_index.entry(fingerprint.clone()).or_insert_with(|| {
                jobs.push(Job {
                    fingerprint,
                    source,
                    plan,
                    workdir: PathBuf::new(),
                });
                jobs.len() - 1
            });
            slots.push(Slot::Miss(job, format));
        }

        let (results, invocations) = if jobs.is_empty() {
            (Vec::new(), 0)
        } else {
            self.render_jobs(&mut jobs)?
        };

        let report = self.assemble(requests, slots, excerpts, &jobs, &results, invocations);
        tracing::info!(
            requests = report.stats.requests,
            cache_hits = report.stats.cache_hits,
            rendered = report.stats.rendered,
            failed = report.stats.failed,
            invocations = report.stats.invocations,
            "Dispatch complete"
        );
        Ok(report)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;
        if config.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if config.parallelism == Some(0) {
            return Err(ConfigError::InvalidParallelism);
        }
        config.html_format.check_target(Target::Html)?;
        config.latex_format.check_target(Target::Latex)?;
        Ok(())
    }

    fn resolve_format(&self, request: &RenderRequest) -> Result<OutputFormat, ConfigError> {
        let format = request.format.unwrap_or(match request.target {
            Target::Html => self.config.html_format,
            Target::Latex => self.config.latex_format,
            Target::Text => OutputFormat::Txt,
        });
        format.check_target(request.target)?;
        Ok(format)
    }

    /// Read the source bytes and expand includes.
    ///
    /// Expansion only runs when there is somewhere to search; non-UTF-8
    /// sources are forwarded untouched.
    fn read_source(config: &EngineConfig, source: &DiagramSource) -> Result<Vec<u8>, RenderError> {
        let bytes = match source {
            DiagramSource::Inline(bytes) => bytes.clone(),
            DiagramSource::File(path) => {
                std::fs::read(path).map_err(|e| RenderError::Source {
                    path: path.clone(),
                    source: e,
                })?
            }
        };

        let base_dir = source.base_dir();
        if base_dir.is_none() && config.include_dirs.is_empty() {
            return Ok(bytes);
        }
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return Ok(bytes);
        };

        let prepared = expand_includes(text, base_dir, &config.include_dirs);
        for warning in &prepared.warnings {
            tracing::warn!("{warning}");
        }
        Ok(prepared.source.into_bytes())
    }

    /// Render, convert and publish every job.
    ///
    /// Returns one result per job plus the number of renderer invocations.
    fn render_jobs(
        &self,
        jobs: &mut [Job],
    ) -> Result<(Vec<Result<CacheEntry, Arc<RenderError>>>, usize), DispatchError> {
        let config = &self.config;

        let renderer = ExternalTool::new("renderer", &config.command)?.validate()?;
        let needs_converter = jobs.iter().any(|j| j.plan.conversion != Conversion::None);
        let converter = if needs_converter {
            Some(ExternalTool::new("converter", &config.epstopdf)?.validate()?)
        } else {
            None
        };

        let staging_root = config.store.root().join(STAGING_DIR);
        std::fs::create_dir_all(&staging_root).map_err(DispatchError::Staging)?;
        let staging = tempfile::Builder::new()
            .prefix("dispatch-")
            .tempdir_in(&staging_root)
            .map_err(DispatchError::Staging)?;
        for (i, job) in jobs.iter_mut().enumerate() {
            job.workdir = staging.path().join(format!("{i:05}"));
            std::fs::create_dir(&job.workdir).map_err(DispatchError::Staging)?;
        }
        let jobs: &[Job] = jobs;

        let tasks = jobs
            .iter()
            .enumerate()
            .flat_map(|(i, job)| job.plan.passes.iter().map(move |&pass| PassTask { job: i, pass }))
            .collect();
        let units = batch::plan_units(tasks, config.batch_size);
        tracing::debug!(
            jobs = jobs.len(),
            units = units.len(),
            batched = units.iter().filter(|u| matches!(u, Unit::Batch { .. })).map(Unit::len).sum::<usize>(),
            "Rendering cache misses"
        );

        let pool = WorkerPool::new(config.parallelism)?;
        let unit_results = pool.map(&units, |unit| {
            self.run_unit(unit, jobs, &renderer, staging.path())
        });
        if config.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let mut passes: Vec<HashMap<FileFormat, Result<PathBuf, RenderError>>> =
            jobs.iter().map(|_| HashMap::new()).collect();
        for (task, result) in unit_results.into_iter().flatten() {
            passes[task.job].insert(task.pass, result);
        }
        let rendered: Vec<Result<Vec<PathBuf>, Arc<RenderError>>> = jobs
            .iter()
            .zip(passes)
            .map(|(job, mut outputs)| {
                job.plan
                    .passes
                    .iter()
                    .map(|pass| match outputs.remove(pass) {
                        Some(Ok(path)) => Ok(path),
                        Some(Err(e)) => Err(Arc::new(e)),
                        None => Err(Arc::new(RenderError::EmptyOutput)),
                    })
                    .collect()
            })
            .collect();

        let indexed: Vec<_> = jobs.iter().zip(&rendered).collect();
        let results = pool.map(&indexed, |(job, outputs)| match outputs {
            Ok(paths) => self
                .finalize(job, paths, converter.as_ref())
                .map_err(Arc::new),
            Err(e) => Err(Arc::clone(e)),
        });
        if config.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        Ok((results, renderer.invocations()))
    }

    /// Run one invocation unit, falling back to single dispatch when a
    /// batch fails as a whole.
    fn run_unit(
        &self,
        unit: &Unit,
        jobs: &[Job],
        renderer: &ExternalTool,
        staging: &Path,
    ) -> Vec<(PassTask, Result<PathBuf, RenderError>)> {
        let cancel = &self.config.cancel;
        let render_single = |task: &PassTask| {
            let job = &jobs[task.job];
            let result = single::render(renderer, &job.source, task.pass, &job.workdir, cancel);
            (*task, result)
        };

        match unit {
            Unit::Single(task) => vec![render_single(task)],
            Unit::Batch { pass, tasks } => {
                let members: Vec<_> = tasks
                    .iter()
                    .map(|task| BatchMember {
                        source: &jobs[task.job].source,
                        workdir: &jobs[task.job].workdir,
                    })
                    .collect();
                match batch::render(renderer, &members, *pass, staging, cancel) {
                    BatchOutcome::Completed(results) => tasks.iter().copied().zip(results).collect(),
                    BatchOutcome::Crashed(e) => {
                        if !matches!(e, RenderError::Cancelled) {
                            tracing::warn!(
                                members = tasks.len(),
                                error = %e,
                                "Batch render failed, retrying diagrams individually"
                            );
                        }
                        tasks.iter().map(render_single).collect()
                    }
                }
            }
        }
    }

    /// Convert the rendered passes of `job` and publish them.
    fn finalize(
        &self,
        job: &Job,
        passes: &[PathBuf],
        converter: Option<&ExternalTool>,
    ) -> Result<CacheEntry, RenderError> {
        let config = &self.config;
        let (raw, rest) = passes.split_first().ok_or(RenderError::EmptyOutput)?;
        let primary = convert(job.plan.conversion, raw.clone(), converter, &config.cancel)?;

        let paths: Vec<&Path> = std::iter::once(primary.as_path())
            .chain(rest.iter().map(PathBuf::as_path))
            .collect();
        let files: Vec<ArtifactFile<'_>> = job
            .plan
            .extensions
            .iter()
            .zip(paths)
            .map(|(ext, path)| ArtifactFile::new(ext, path))
            .collect();

        if config.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        config
            .store
            .store(job.fingerprint.as_str(), &files)
            .map_err(|e| {
                tracing::warn!(key = %job.fingerprint, error = %e, "Failed to store artifact");
                RenderError::Io(e)
            })
    }

    /// Build the report in request order.
    fn assemble(
        &self,
        requests: &[RenderRequest],
        slots: Vec<Slot>,
        excerpts: Vec<String>,
        jobs: &[Job],
        results: &[Result<CacheEntry, Arc<RenderError>>],
        invocations: usize,
    ) -> DispatchReport {
        let mut stats = DispatchStats {
            requests: requests.len(),
            rendered: results.iter().filter(|r| r.is_ok()).count(),
            invocations,
            ..DispatchStats::default()
        };
        let mut failures = Vec::new();

        let artifacts = requests
            .iter()
            .zip(slots)
            .zip(excerpts)
            .map(|((request, slot), excerpt)| {
                let outcome = match slot {
                    Slot::Disabled => return None,
                    Slot::Hit(entry, format) => {
                        stats.cache_hits += 1;
                        Ok((entry, format, true))
                    }
                    Slot::Miss(job, format) => match &results[job] {
                        Ok(entry) => Ok((entry.clone(), format, false)),
                        Err(e) => Err((Arc::clone(e), format, Some(&jobs[job]))),
                    },
                    Slot::Failed(e, format) => Err((e, format, None)),
                };

                match outcome {
                    Ok((entry, format, cached)) => Some(artifact(request, &entry, format, cached)),
                    Err((error, format, job)) => {
                        let (substitute, failure) =
                            self.substitute(request, format, job, error, excerpt);
                        failures.push(failure);
                        substitute
                    }
                }
            })
            .collect();

        stats.failed = failures.len();
        DispatchReport {
            artifacts,
            failures,
            stats,
        }
    }

    /// Record a failure and, if enabled, deliver a placeholder instead.
    ///
    /// `job` is the rendered diagram, absent when its source could not be read.
    fn substitute(
        &self,
        request: &RenderRequest,
        format: OutputFormat,
        job: Option<&Job>,
        error: Arc<RenderError>,
        excerpt: String,
    ) -> (Option<OutputArtifact>, RenderFailure) {
        let config = &self.config;
        let mut failure = RenderFailure {
            position: request.position,
            excerpt,
            error,
            substituted: false,
        };

        let artifact = if config.substitute_errors {
            match self.write_substitute(request, format, job) {
                Ok((primary, fallback)) => {
                    failure.substituted = true;
                    Some(OutputArtifact {
                        position: request.position,
                        primary,
                        fallback,
                        delivered: Delivered::Placeholder,
                        sizing: request.sizing.clone(),
                        cached: false,
                    })
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to write error placeholder");
                    None
                }
            }
        } else {
            None
        };

        tracing::warn!(
            position = failure.position,
            substituted = failure.substituted,
            error = %failure.error,
            "Diagram render failed"
        );
        (artifact, failure)
    }

    /// Write the substitute files of a failed request.
    ///
    /// Text output shows the diagram source; everything else gets error
    /// images in the artifact formats of `format`.
    fn write_substitute(
        &self,
        request: &RenderRequest,
        format: OutputFormat,
        job: Option<&Job>,
    ) -> std::io::Result<(PathBuf, Option<PathBuf>)> {
        let root = self.config.store.root();
        if request.target == Target::Text
            && let Some(job) = job
        {
            let path = source_text(root, job.fingerprint.as_str(), &job.source)?;
            return Ok((path, None));
        }

        let extensions = format.plan().map_or(&[][..], |plan| plan.extensions);
        let mut paths = placeholders(root, extensions)?.into_iter();
        let primary = paths
            .next()
            .ok_or_else(|| std::io::Error::other(format!("no placeholder for {format} output")))?;
        Ok((primary, paths.next()))
    }
}

fn artifact(
    request: &RenderRequest,
    entry: &CacheEntry,
    format: OutputFormat,
    cached: bool,
) -> OutputArtifact {
    OutputArtifact {
        position: request.position,
        primary: entry.primary().map(Path::to_path_buf).unwrap_or_default(),
        fallback: entry.fallback().map(Path::to_path_buf),
        delivered: Delivered::Format(format),
        sizing: request.sizing.clone(),
        cached,
    }
}
