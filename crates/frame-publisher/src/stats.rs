//! Publish counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of publisher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Frames passed to `submit` while the publisher was open.
    pub submitted: u64,
    /// Frames delivered to observers.
    pub published: u64,
    /// Pending frames discarded because a newer frame arrived.
    pub coalesced: u64,
    /// Frames discarded for predating an already published or pending frame.
    pub stale: u64,
    /// Publishes performed by the flush timer rather than a submission.
    pub flushed: u64,
}

impl PublishStats {
    /// Fraction of submitted frames that reached observers, in `[0, 1]`.
    #[must_use]
    pub fn publish_ratio(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.published as f64 / self.submitted as f64
        }
    }
}

/// Live counters shared between the publisher and its flush task.
#[derive(Debug, Default)]
pub struct Counters {
    /// See [`PublishStats::submitted`].
    pub submitted: AtomicU64,
    /// See [`PublishStats::published`].
    pub published: AtomicU64,
    /// See [`PublishStats::coalesced`].
    pub coalesced: AtomicU64,
    /// See [`PublishStats::stale`].
    pub stale: AtomicU64,
    /// See [`PublishStats::flushed`].
    pub flushed: AtomicU64,
}

impl Counters {
    /// Increment a single counter.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> PublishStats {
        PublishStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
        }
    }
}
