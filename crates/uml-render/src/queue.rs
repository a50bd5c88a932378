//! Explicit accumulation of render requests across a build.

use crate::engine::{DispatchReport, RenderEngine};
use crate::error::DispatchError;
use crate::request::RenderRequest;

/// Handle to a queued request, valid for the report of the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(usize);

impl Ticket {
    /// Index of the request in the flushed batch.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Requests collected during a build, rendered together on [`flush`].
///
/// Collecting every diagram of a build before rendering lets the engine
/// batch and deduplicate across documents. Nothing is rendered until
/// [`flush`] is called; dropping a queue discards its requests.
///
/// [`flush`]: RenderQueue::flush
#[derive(Debug, Default)]
pub struct RenderQueue {
    requests: Vec<RenderRequest>,
}

impl RenderQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request and return its ticket.
    pub fn push(&mut self, request: RenderRequest) -> Ticket {
        self.requests.push(request);
        Ticket(self.requests.len() - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Render every queued request and empty the queue.
    ///
    /// Tickets issued since the previous flush index into the returned
    /// report. If the dispatch fails as a whole, the requests stay queued.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] of [`RenderEngine::dispatch`].
    pub fn flush(&mut self, engine: &RenderEngine) -> Result<DispatchReport, DispatchError> {
        let requests = std::mem::take(&mut self.requests);
        match engine.dispatch(&requests) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.requests = requests;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Target;

    #[test]
    fn test_tickets_are_sequential() {
        let mut queue = RenderQueue::new();

        let a = queue.push(RenderRequest::new("A->B", Target::Html, 10));
        let b = queue.push(RenderRequest::new("B->C", Target::Html, 20));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(queue.len(), 2);
    }
}
