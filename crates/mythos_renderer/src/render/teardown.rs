//! Scoped release of partially-built resources
//!
//! Multi-step initialization registers a release action after each successful
//! step. If the routine exits early the stack unwinds in reverse order and
//! releases only what was actually created. On success the routine calls
//! [`TeardownStack::disarm`] and ownership moves into the finished object.

use crate::foundation::logging::Logger;

/// Reverse-order release actions local to one initialization routine
pub struct TeardownStack<'a> {
    actions: Vec<(&'static str, Box<dyn FnOnce() + 'a>)>,
    log: Logger,
}

impl<'a> TeardownStack<'a> {
    /// Create an empty stack
    pub fn new(log: &Logger) -> Self {
        Self {
            actions: Vec::new(),
            log: log.clone(),
        }
    }

    /// Register the release action for a resource that was just created
    pub fn push(&mut self, name: &'static str, release: impl FnOnce() + 'a) {
        self.actions.push((name, Box::new(release)));
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Keep everything: initialization succeeded
    pub fn disarm(mut self) {
        self.actions.clear();
    }
}

impl Drop for TeardownStack<'_> {
    fn drop(&mut self) {
        while let Some((name, release)) = self.actions.pop() {
            self.log.warn(format!("Releasing {name} after failed initialization"));
            release();
        }
    }
}
