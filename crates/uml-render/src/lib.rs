//! Batched PlantUML rendering with a content-addressed artifact cache.
//!
//! This crate turns diagram sources into image artifacts by driving an
//! external renderer process:
//! - Content fingerprints decide whether a stored artifact can be reused
//! - Cache misses are deduplicated and grouped into batch invocations
//! - Invocations run on a bounded worker pool; results keep request order
//! - EPS output is converted to PDF with a secondary tool
//! - Failed diagrams can be replaced by error placeholders
//!
//! # Architecture
//!
//! The crate is organized into modules:
//! - `format`: output formats and their render plans
//! - `fingerprint`: cache keys of diagram requests
//! - `engine`: [`RenderEngine`], the dispatcher
//! - `queue`: [`RenderQueue`] for collecting requests across a build
//! - `batch` / `single`: the two renderer invocation modes
//! - `convert`: post-render conversion
//! - `placeholder`: error substitutes
//! - `include`: `!include` expansion before fingerprinting
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uml_cache::FileStore;
//! use uml_render::{CACHE_VERSION, RenderEngine, RenderQueue, RenderRequest, Target};
//!
//! let store = Arc::new(FileStore::new(".uml/cache".into(), CACHE_VERSION));
//! let engine = RenderEngine::with_store(store).batch_size(50);
//!
//! let mut queue = RenderQueue::new();
//! let ticket = queue.push(RenderRequest::new("Alice -> Bob: hi", Target::Html, 0));
//!
//! let report = queue.flush(&engine).unwrap();
//! if let Some(artifact) = report.get(ticket) {
//!     println!("{}", artifact.primary.display());
//! }
//! ```

mod batch;
mod command;
mod consts;
mod convert;
mod engine;
mod error;
mod fingerprint;
mod format;
mod include;
mod placeholder;
mod pool;
mod queue;
mod request;
mod single;

pub use command::CancelToken;
pub use consts::{CACHE_VERSION, DEFAULT_BATCH_SIZE, DEFAULT_COMMAND, DEFAULT_EPSTOPDF};
pub use engine::{DispatchReport, DispatchStats, RenderEngine};
pub use error::{ConfigError, DispatchError, RenderError, RenderFailure};
pub use fingerprint::{DiagramKey, Fingerprint};
pub use format::{Conversion, FileFormat, FormatPlan, OutputFormat, Target};
pub use include::{Expanded, expand_includes};
pub use queue::{RenderQueue, Ticket};
pub use request::{Delivered, DiagramSource, OutputArtifact, RenderRequest, Sizing};
