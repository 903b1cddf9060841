//! Continuations passed between filters.
//!
//! A [`Closure`] is a named one-shot callback taking the completion error.
//! Running it consumes it, so a closure cannot fire twice. Dropping one that
//! never ran is a lost completion and gets logged.

use std::fmt;

use crate::error::CallError;

type Callback = Box<dyn FnOnce(Option<CallError>) + Send + 'static>;

pub struct Closure {
    name: &'static str,
    callback: Option<Callback>,
}

impl Closure {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(Option<CallError>) + Send + 'static,
    {
        Self {
            name,
            callback: Some(Box::new(f)),
        }
    }

    /// Closure that does nothing (used where a completion is required but unobserved).
    pub fn noop(name: &'static str) -> Self {
        Self::new(name, |_| {})
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke inline on the current stack.
    ///
    /// Filters chaining to a saved original use this: the original runs within
    /// the same combiner hold as the interceptor.
    pub fn run(mut self, error: Option<CallError>) {
        if let Some(cb) = self.callback.take() {
            tracing::trace!(closure = self.name, error = ?error, "run closure");
            cb(error);
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure").field("name", &self.name).finish()
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::warn!(closure = self.name, "closure dropped without running");
        }
    }
}

/// A saved closure that may be taken exactly once.
///
/// Interceptors store the caller's original continuation here while their own
/// substitute is in flight.
#[derive(Debug, Default)]
pub struct ClosureSlot {
    inner: Option<Closure>,
}

impl ClosureSlot {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Store `closure`, returning whatever was still waiting in the slot.
    pub fn set(&mut self, closure: Closure) -> Option<Closure> {
        self.inner.replace(closure)
    }

    pub fn take(&mut self) -> Option<Closure> {
        self.inner.take()
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }
}
