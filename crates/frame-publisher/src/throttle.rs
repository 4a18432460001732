//! Throttle decisions for the publisher.
//!
//! [`PublishState`] is the pure core of [`FramePublisher`](crate::FramePublisher):
//! it decides whether a submitted frame is published now, held as the single
//! pending frame, or discarded as stale. Every method takes `now` explicitly
//! so the rules can be exercised without a clock.
//!
//! Rules:
//! - Two publishes are never closer than `min_interval` apart.
//! - At most one frame is pending; a newer submission overwrites it.
//! - Frames captured before the last published (or pending) frame are stale and
//!   dropped, so observers see non-decreasing capture timestamps.

use std::time::Duration;

use tokio::time::Instant;

use crate::frame::Frame;

/// Default minimum gap between publishes (~10 Hz).
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of offering a frame to [`PublishState::offer`].
#[derive(Debug)]
pub enum Offer<T> {
    /// Publish this frame now.
    Publish {
        /// The frame to publish.
        frame: Frame<T>,
        /// A pending frame was discarded in favour of this newer one.
        superseded: bool,
    },
    /// The frame is pending until the interval elapses.
    Held {
        /// An older pending frame was overwritten.
        replaced: bool,
    },
    /// The frame was captured before one already published or pending.
    Stale(Frame<T>),
}

/// Throttle bookkeeping: last publish, interval, and the single pending frame.
#[derive(Debug)]
pub struct PublishState<T> {
    /// Minimum gap between two publishes.
    min_interval: Duration,
    /// Clock reading at the most recent publish.
    last_publish: Option<Instant>,
    /// Capture timestamp of the most recently published frame.
    last_captured: Option<Instant>,
    /// Newest received frame not yet published.
    pending: Option<Frame<T>>,
}

impl<T> Default for PublishState<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl<T> PublishState<T> {
    /// Create an empty state with the given interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_publish: None,
            last_captured: None,
            pending: None,
        }
    }

    /// Current minimum interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Change the minimum interval. Applies to the next decision.
    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// True when a frame is waiting for the interval to elapse.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Clock reading of the most recent publish, if any.
    pub fn last_publish(&self) -> Option<Instant> {
        self.last_publish
    }

    /// Decide what to do with a newly captured frame.
    pub fn offer(&mut self, frame: Frame<T>, now: Instant) -> Offer<T> {
        if self.is_stale(&frame) {
            return Offer::Stale(frame);
        }
        if self.is_due(now) {
            let superseded = self.pending.take().is_some();
            self.record(&frame, now);
            return Offer::Publish { frame, superseded };
        }
        let replaced = self.pending.replace(frame).is_some();
        Offer::Held { replaced }
    }

    /// Take the pending frame if the interval has elapsed, recording the publish.
    pub fn take_due(&mut self, now: Instant) -> Option<Frame<T>> {
        if !self.is_due(now) {
            return None;
        }
        let frame = self.pending.take()?;
        self.record(&frame, now);
        Some(frame)
    }

    /// When the pending frame becomes publishable, or `None` if nothing is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        let last = self.last_publish?;
        Some(last.checked_add(self.min_interval).unwrap_or(last))
    }

    /// Drop the pending frame, returning it.
    pub fn clear(&mut self) -> Option<Frame<T>> {
        self.pending.take()
    }

    /// True when a publish at `now` keeps the minimum gap.
    fn is_due(&self, now: Instant) -> bool {
        match self.last_publish {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// True when `frame` predates something already published or pending.
    fn is_stale(&self, frame: &Frame<T>) -> bool {
        let behind_published = self
            .last_captured
            .is_some_and(|last| frame.captured_at < last);
        let behind_pending = self
            .pending
            .as_ref()
            .is_some_and(|p| frame.captured_at < p.captured_at);
        behind_published || behind_pending
    }

    /// Note that `frame` was published at `now`.
    fn record(&mut self, frame: &Frame<T>, now: Instant) {
        self.last_publish = Some(now);
        self.last_captured = Some(frame.captured_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn frame(base: Instant, at_ms: u64) -> Frame<u64> {
        Frame::at(at_ms, at_ms, base + ms(at_ms))
    }

    /// Offer frames captured (and submitted) at the given offsets; return the
    /// seqs of frames published by submissions, and the final state.
    fn offer_all(base: Instant, times: &[u64]) -> (Vec<u64>, PublishState<u64>) {
        let mut state = PublishState::new(ms(100));
        let mut published = Vec::new();
        for &t in times {
            if let Offer::Publish { frame, .. } = state.offer(frame(base, t), base + ms(t)) {
                published.push(frame.seq);
            }
        }
        (published, state)
    }

    #[test]
    fn first_frame_publishes_immediately() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        match state.offer(frame(base, 0), base) {
            Offer::Publish { frame, superseded } => {
                assert_eq!(frame.seq, 0);
                assert!(!superseded);
            }
            other => panic!("expected publish, got {other:?}"),
        }
        assert!(!state.has_pending());
        assert_eq!(state.next_deadline(), None);
    }

    #[test]
    fn frames_inside_interval_coalesce_to_latest() {
        let base = Instant::now();
        let (published, mut state) = offer_all(base, &[0, 10, 20, 30]);
        assert_eq!(published, vec![0]);
        assert_eq!(state.next_deadline(), Some(base + ms(100)));

        assert!(state.take_due(base + ms(99)).is_none());
        let flushed = state.take_due(base + ms(100)).expect("due at deadline");
        assert_eq!(flushed.seq, 30);
        assert!(!state.has_pending());
        assert_eq!(state.last_publish(), Some(base + ms(100)));
    }

    #[test]
    fn submission_crossing_threshold_supersedes_pending() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        assert!(matches!(
            state.offer(frame(base, 0), base),
            Offer::Publish { .. }
        ));
        assert!(matches!(
            state.offer(frame(base, 20), base + ms(20)),
            Offer::Held { replaced: false }
        ));
        match state.offer(frame(base, 110), base + ms(110)) {
            Offer::Publish { frame, superseded } => {
                assert_eq!(frame.seq, 110);
                assert!(superseded);
            }
            other => panic!("expected publish, got {other:?}"),
        }
        assert!(!state.has_pending());
    }

    #[test]
    fn overwrite_reports_replacement() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        let _ = state.offer(frame(base, 0), base);
        assert!(matches!(
            state.offer(frame(base, 10), base + ms(10)),
            Offer::Held { replaced: false }
        ));
        assert!(matches!(
            state.offer(frame(base, 20), base + ms(20)),
            Offer::Held { replaced: true }
        ));
    }

    #[test]
    fn out_of_order_frames_are_stale() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        let _ = state.offer(frame(base, 50), base + ms(50));
        // Captured before the published frame.
        assert!(matches!(
            state.offer(frame(base, 40), base + ms(200)),
            Offer::Stale(f) if f.seq == 40
        ));

        let _ = state.offer(frame(base, 80), base + ms(80));
        // Captured before the pending frame.
        assert!(matches!(
            state.offer(frame(base, 70), base + ms(90)),
            Offer::Stale(_)
        ));
        assert_eq!(state.take_due(base + ms(150)).map(|f| f.seq), Some(80));
    }

    #[test]
    fn no_pending_means_no_deadline_and_no_flush() {
        let base = Instant::now();
        let (_, mut state) = offer_all(base, &[0]);
        assert_eq!(state.next_deadline(), None);
        assert!(state.take_due(base + ms(10_000)).is_none());
    }

    #[test]
    fn interval_change_applies_to_next_decision() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        let _ = state.offer(frame(base, 0), base);
        state.set_min_interval(ms(10));
        assert!(matches!(
            state.offer(frame(base, 15), base + ms(15)),
            Offer::Publish { .. }
        ));
        state.set_min_interval(ms(500));
        let _ = state.offer(frame(base, 20), base + ms(20));
        assert_eq!(state.next_deadline(), Some(base + ms(515)));
    }

    #[test]
    fn zero_interval_publishes_everything() {
        let base = Instant::now();
        let mut state = PublishState::new(Duration::ZERO);
        for t in [0, 0, 1, 1, 2] {
            assert!(matches!(
                state.offer(frame(base, t), base + ms(t)),
                Offer::Publish { .. }
            ));
        }
    }

    #[test]
    fn clear_drops_pending() {
        let base = Instant::now();
        let (_, mut state) = offer_all(base, &[0, 5]);
        assert_eq!(state.clear().map(|f| f.seq), Some(5));
        assert!(state.take_due(base + ms(1_000)).is_none());
    }

    #[test]
    fn publish_gaps_never_undercut_interval() {
        let base = Instant::now();
        let mut state = PublishState::new(ms(100));
        let mut publishes: Vec<Instant> = Vec::new();
        // Deterministic pseudo-random submission gaps between 0 and 63ms.
        let mut seed: u64 = 0x2545_f491;
        let mut t = 0;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            t += seed >> 58;
            let now = base + ms(t);
            if let Some(deadline) = state.next_deadline()
                && deadline <= now
                && state.take_due(deadline).is_some()
            {
                publishes.push(deadline);
            }
            if let Offer::Publish { .. } = state.offer(frame(base, t), now) {
                publishes.push(now);
            }
        }
        assert!(publishes.len() > 1);
        for pair in publishes.windows(2) {
            assert!(pair[1] - pair[0] >= ms(100), "gap too small: {pair:?}");
        }
    }
}
