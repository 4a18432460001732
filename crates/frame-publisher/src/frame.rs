//! Captured frames handed from a capture source to the publisher.

use std::{fmt, time::Duration};

use tokio::time::Instant;

/// An opaque image payload plus its capture timestamp.
///
/// Ownership moves into the publisher on [`submit`](crate::FramePublisher::submit).
/// Payloads are cloned once per observer, so large images should be shared
/// (`Arc<[u8]>`, `Arc<Image>`, ...).
#[derive(Clone)]
pub struct Frame<T> {
    /// Image payload, opaque to the publisher.
    pub payload: T,
    /// Capture sequence number assigned by the source.
    pub seq: u64,
    /// When the capture source produced the frame.
    pub captured_at: Instant,
}

impl<T> Frame<T> {
    /// Wrap `payload` as captured now.
    pub fn new(seq: u64, payload: T) -> Self {
        Self::at(seq, payload, Instant::now())
    }

    /// Wrap `payload` with an explicit capture timestamp.
    pub fn at(seq: u64, payload: T, captured_at: Instant) -> Self {
        Self {
            payload,
            seq,
            captured_at,
        }
    }

    /// Time elapsed since capture, measured against `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }

    /// Replace the payload while keeping sequence and timestamp.
    pub fn map<U, F>(self, f: F) -> Frame<U>
    where
        F: FnOnce(T) -> U,
    {
        Frame {
            payload: f(self.payload),
            seq: self.seq,
            captured_at: self.captured_at,
        }
    }
}

impl<T> fmt::Debug for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}
