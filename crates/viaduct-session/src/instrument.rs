//! Storage round-trip instrumentation.
//!
//! The resolver and planner report every storage round trip to an
//! injectable counter, so call-count assertions are a first-class,
//! deterministic test facility instead of ambient global state.
//!
//! # Example
//!
//! ```ignore
//! let counter = Arc::new(RoundTripCounter::new());
//! session.instrument(Arc::clone(&counter));
//!
//! session.fetch_with::<Member, Club, _>(&cx, request, &CLUB, |m| &m.club).await?;
//! assert!(counter.total() <= 3);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts storage round trips per association.
///
/// Shareable via `Arc`; all methods take `&self`. Also watches for the
/// N+1 shape: an association resolved one owner at a time often enough to
/// suggest the caller wanted a batch load.
#[derive(Debug)]
pub struct RoundTripCounter {
    total: AtomicUsize,
    per_association: Mutex<HashMap<&'static str, usize>>,
    single_resolutions: Mutex<HashMap<&'static str, usize>>,
    /// One-at-a-time resolutions of one association before a warning.
    threshold: usize,
}

impl Default for RoundTripCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTripCounter {
    /// Create a counter with the default N+1 warning threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            per_association: Mutex::new(HashMap::new()),
            single_resolutions: Mutex::new(HashMap::new()),
            threshold: 3,
        }
    }

    /// Set the N+1 warning threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Record one storage round trip made on behalf of `association`.
    pub fn record(&self, association: &'static str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut counts = match self.per_association.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counts.entry(association).or_insert(0) += 1;
    }

    /// Record a one-owner-at-a-time resolution of `association`.
    ///
    /// Emits a warning when the count reaches the threshold.
    pub fn record_single_resolution(&self, owner_table: &'static str, association: &'static str) {
        let count = {
            let mut counts = match self.single_resolutions.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entry = counts.entry(association).or_insert(0);
            *entry += 1;
            *entry
        };

        if count == self.threshold {
            tracing::warn!(
                target: "viaduct::n1",
                owner = owner_table,
                association = association,
                resolutions = count,
                threshold = self.threshold,
                "N+1 QUERY PATTERN DETECTED! Consider load_through_many() or fetch_with() for batch loading."
            );
        }
    }

    /// Total round trips recorded.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Round trips recorded for one association.
    #[must_use]
    pub fn for_association(&self, association: &str) -> usize {
        match self.per_association.lock() {
            Ok(guard) => guard.get(association).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(association).copied().unwrap_or(0),
        }
    }

    /// Reset all counts. Call at the start of a new request scope.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        match self.per_association.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        match self.single_resolutions.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
