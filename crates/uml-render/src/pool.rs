//! Bounded worker pool with ordered result collection.

use rayon::prelude::*;

/// Fixed-size pool for renderer invocations.
///
/// [`map`](Self::map) runs items concurrently but returns results indexed
/// like the input, whatever order the work completes in.
pub(crate) struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Create a pool with `threads` workers (`None` = available CPUs).
    pub fn new(threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("uml-render-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        Ok(Self {
            pool: builder.build()?,
        })
    }

    /// Apply `f` to every item, returning results in input order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(f).collect())
    }
}
