//! Atomic insert-if-absent registry of identifiers.

use dashmap::DashSet;

/// Concurrency-safe set of claimed identifiers.
///
/// [`claim`](Self::claim) is a single atomic check-and-insert, so two workers
/// racing on the same identifier can never both win.
#[derive(Debug, Default)]
pub struct ClaimSet {
    inner: DashSet<String>,
}

impl ClaimSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id`. Returns `true` if it was not claimed before.
    pub fn claim(&self, id: &str) -> bool {
        self.inner.insert(id.to_string())
    }

    /// Releases `id` so a later attempt can claim it again.
    ///
    /// Returns `true` if it was claimed.
    pub fn release(&self, id: &str) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Returns `true` if `id` is currently claimed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains(id)
    }

    /// Number of claimed identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if nothing is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
