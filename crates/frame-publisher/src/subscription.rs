//! Observer-side handles: pull subscriptions and push sink attachments.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::frame::Frame;

/// Single-frame mailbox shared between the publisher and one subscription.
pub struct Slot<T> {
    /// Latest published frame not yet taken by the subscriber.
    frame: Mutex<Option<Frame<T>>>,
    /// Wakes the (single) waiting subscriber.
    notify: Notify,
    /// Set when the publisher shuts down or the subscriber goes away.
    closed: AtomicBool,
    /// Frames overwritten before the subscriber took them.
    lost: AtomicU64,
}

impl<T> Slot<T> {
    /// Create an open, empty slot.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            frame: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            lost: AtomicU64::new(0),
        })
    }

    /// Store `frame`, replacing any untaken one. No-op once closed.
    pub(crate) fn put(&self, frame: Frame<T>) {
        if self.is_closed() {
            return;
        }
        if self.frame.lock().replace(frame).is_some() {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Take the waiting frame, if any.
    fn take(&self) -> Option<Frame<T>> {
        self.frame.lock().take()
    }

    /// Terminate the sequence, discarding any untaken frame.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.frame.lock().take();
        self.notify.notify_one();
    }

    /// True once closed by either side.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Pull-style observation of published frames.
///
/// Holds at most one undelivered frame: if the consumer falls behind, older
/// published frames are replaced by newer ones (last write wins). The sequence
/// ends (`next` returns `None`) when the publisher shuts down. Dropping the
/// subscription unsubscribes.
pub struct Subscription<T> {
    /// Mailbox fed by the publisher.
    slot: Arc<Slot<T>>,
}

impl<T> Subscription<T> {
    /// Wrap a slot registered with a publisher.
    pub(crate) fn new(slot: Arc<Slot<T>>) -> Self {
        Self { slot }
    }

    /// A subscription that has already terminated.
    pub(crate) fn closed() -> Self {
        let slot = Slot::new();
        slot.close();
        Self { slot }
    }

    /// Wait for the next published frame; `None` once the publisher has shut down.
    pub async fn next(&mut self) -> Option<Frame<T>> {
        loop {
            if let Some(frame) = self.slot.take() {
                return Some(frame);
            }
            if self.slot.is_closed() {
                return None;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Take a published frame without waiting.
    pub fn try_next(&mut self) -> Option<Frame<T>> {
        self.slot.take()
    }

    /// True once the sequence has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Published frames this subscription never saw because a newer one replaced them.
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.slot.lost.load(Ordering::Relaxed)
    }

    /// Stop observing. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.slot.close();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .field("lost", &self.lost())
            .finish_non_exhaustive()
    }
}

/// Push-style consumer of published frames (a display layer).
pub trait FrameSink<T>: Send + Sync {
    /// Receive a published frame. Called on the attachment's dispatcher context.
    fn publish(&self, frame: Frame<T>);
}

impl<T, F> FrameSink<T> for F
where
    F: Fn(Frame<T>) + Send + Sync,
{
    fn publish(&self, frame: Frame<T>) {
        self(frame);
    }
}

/// Flags shared by an [`Attachment`] and the publisher.
#[derive(Debug)]
pub struct AttachState {
    /// Cleared on detach or publisher shutdown.
    active: AtomicBool,
    /// Frames overwritten before the sink ran.
    lost: AtomicU64,
}

impl AttachState {
    /// Create the shared flags.
    pub(crate) fn new(active: bool) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(active),
            lost: AtomicU64::new(0),
        })
    }

    /// True while the sink still receives frames.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop deliveries.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Mailbox contents guarded by one lock.
struct PushInner<T> {
    /// Newest published frame the sink has not seen.
    frame: Option<Frame<T>>,
    /// A delivery job is queued or running.
    in_flight: bool,
}

/// Single-frame mailbox in front of a push sink.
///
/// At most one delivery job per sink is queued or running at a time. The job
/// takes whatever frame is newest when it runs, so a dispatcher that is not
/// serviced for a while never builds a backlog, and sink calls never overlap.
pub struct PushSlot<T> {
    /// Pending frame and in-flight flag.
    inner: Mutex<PushInner<T>>,
    /// Consumer receiving frames.
    sink: Arc<dyn FrameSink<T>>,
    /// Shared with the [`Attachment`].
    state: Arc<AttachState>,
}

impl<T> PushSlot<T> {
    /// Create an empty mailbox for `sink`.
    pub(crate) fn new(sink: Arc<dyn FrameSink<T>>, state: Arc<AttachState>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PushInner {
                frame: None,
                in_flight: false,
            }),
            sink,
            state,
        })
    }

    /// Store `frame`, replacing any undelivered one.
    ///
    /// Returns true when the caller must dispatch a [`Delivery`], i.e. no job
    /// is already queued or running.
    pub(crate) fn put(&self, frame: Frame<T>) -> bool {
        let mut inner = self.inner.lock();
        if inner.frame.replace(frame).is_some() {
            self.state.lost.fetch_add(1, Ordering::Relaxed);
        }
        if inner.in_flight {
            return false;
        }
        inner.in_flight = true;
        true
    }

    /// Take the waiting frame, or mark the job finished when there is none.
    fn next(&self) -> Option<Frame<T>> {
        let mut inner = self.inner.lock();
        let frame = inner.frame.take();
        if frame.is_none() {
            inner.in_flight = false;
        }
        frame
    }

    /// A dispatched job was dropped without running to completion.
    fn abandon(&self) {
        self.inner.lock().in_flight = false;
    }

    /// True while the sink still receives frames.
    pub(crate) fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Stop deliveries and drop any undelivered frame.
    pub(crate) fn close(&self) {
        self.state.deactivate();
        self.inner.lock().frame.take();
    }
}

/// One dispatched job draining a [`PushSlot`] into its sink.
pub struct Delivery<T> {
    /// Mailbox to drain.
    slot: Arc<PushSlot<T>>,
    /// Set once `run` emptied the mailbox.
    finished: bool,
}

impl<T> Delivery<T> {
    /// Wrap a slot whose `put` just returned true.
    pub(crate) fn new(slot: Arc<PushSlot<T>>) -> Self {
        Self {
            slot,
            finished: false,
        }
    }

    /// Hand the newest frame to the sink, repeating while newer ones arrive.
    pub(crate) fn run(mut self) {
        while let Some(frame) = self.slot.next() {
            // Detached after dispatch but before running
            if self.slot.is_active() {
                self.slot.sink.publish(frame);
            }
        }
        self.finished = true;
    }
}

impl<T> Drop for Delivery<T> {
    fn drop(&mut self) {
        // Discarded by a closed queue, or the sink panicked
        if !self.finished {
            self.slot.abandon();
        }
    }
}

/// Handle keeping a sink attached to a publisher.
///
/// Dropping it (or calling [`detach`](Self::detach)) stops deliveries,
/// including jobs already dispatched but not yet run.
#[must_use = "dropping an Attachment detaches the sink"]
pub struct Attachment {
    /// Flags shared with the publisher.
    state: Arc<AttachState>,
}

impl Attachment {
    /// Wrap the flags shared with the publisher.
    pub(crate) fn new(state: Arc<AttachState>) -> Self {
        Self { state }
    }

    /// True while the sink still receives frames.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Published frames the sink never saw because a newer one replaced them
    /// before its dispatcher ran the delivery.
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.state.lost.load(Ordering::Relaxed)
    }

    /// Stop deliveries to the sink.
    pub fn detach(self) {}
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.state.deactivate();
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("active", &self.is_active())
            .field("lost", &self.lost())
            .finish()
    }
}
