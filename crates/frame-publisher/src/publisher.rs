//! The frame publisher: throttled, coalescing hand-off from a capture source
//! to a display layer.
//!
//! Submissions are decided by [`PublishState`]. Frames that arrive inside the
//! throttle window are held (latest wins) and a flush task publishes the
//! pending frame once the window elapses, unless a newer submission crosses
//! the threshold first.
//!
//! Observers either pull ([`FramePublisher::observe`]) or are pushed to on a
//! dispatcher of their choosing ([`FramePublisher::attach`]).

use std::{
    fmt,
    future::Future,
    mem,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::Notify,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::PublisherConfig,
    dispatch::Dispatch,
    frame::Frame,
    stats::{Counters, PublishStats},
    subscription::{AttachState, Attachment, Delivery, FrameSink, PushSlot, Slot, Subscription},
    throttle::{Offer, PublishState},
};

/// Registered observer.
enum Observer<T> {
    /// Pull subscription; dead once the `Subscription` is dropped.
    Pull(Weak<Slot<T>>),
    /// Push sink delivered through a dispatcher.
    Push(PushTarget<T>),
}

impl<T> Observer<T> {
    /// False once the subscription or attachment went away.
    fn is_live(&self) -> bool {
        match self {
            Self::Pull(weak) => weak.upgrade().is_some_and(|slot| !slot.is_closed()),
            Self::Push(target) => target.slot.is_active(),
        }
    }
}

/// A sink's mailbox with the dispatcher its deliveries run on.
struct PushTarget<T> {
    /// Newest undelivered frame and the sink itself.
    slot: Arc<PushSlot<T>>,
    /// Context the sink runs on.
    dispatch: Arc<dyn Dispatch>,
}

/// Mutable publisher state guarded by one lock.
struct Core<T> {
    /// Throttle bookkeeping.
    state: PublishState<T>,
    /// Current observers.
    observers: Vec<Observer<T>>,
    /// Set by shutdown; no publishes afterwards.
    closed: bool,
}

impl<T> Core<T> {
    /// Drop observers that went away.
    fn prune(&mut self) {
        self.observers.retain(Observer::is_live);
    }
}

/// State shared by publisher handles and the flush task.
struct Shared<T> {
    /// Throttle state and observers.
    core: Mutex<Core<T>>,
    /// Wakes the flush task when the deadline may have changed.
    wake: Notify,
    /// Lock-free mirror of `Core::closed` for fast checks. Set under the core
    /// lock, so callers that go on to mutate `Core` re-check there.
    closed: AtomicBool,
    /// Cancels the flush task and resolves `closed()` futures.
    token: CancellationToken,
    /// Publish counters.
    counters: Counters,
}

impl<T: Clone + Send + 'static> Shared<T> {
    /// Deliver `frame` to every live observer, pruning dead ones.
    ///
    /// Runs under the core lock so observers see publishes in decision order.
    fn deliver(&self, core: &mut Core<T>, frame: Frame<T>) {
        Counters::bump(&self.counters.published);
        trace!(seq = frame.seq, observers = core.observers.len(), "publish");
        core.observers.retain(|observer| match observer {
            Observer::Pull(weak) => match weak.upgrade() {
                Some(slot) if !slot.is_closed() => {
                    slot.put(frame.clone());
                    true
                }
                _ => false,
            },
            Observer::Push(target) => {
                if !target.slot.is_active() {
                    return false;
                }
                // A queued or running delivery picks the frame up
                if !target.slot.put(frame.clone()) {
                    return true;
                }
                let delivery = Delivery::new(target.slot.clone());
                match target.dispatch.dispatch(Box::new(move || delivery.run())) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "publish_dispatch_failed; detaching sink");
                        target.slot.close();
                        false
                    }
                }
            }
        });
    }

    /// Publish the pending frame if its interval has elapsed.
    fn flush_due(&self) {
        let mut core = self.core.lock();
        if core.closed {
            return;
        }
        if let Some(frame) = core.state.take_due(Instant::now()) {
            Counters::bump(&self.counters.flushed);
            self.deliver(&mut core, frame);
        }
    }

    /// Close the publisher and terminate every observer. Idempotent.
    fn close(&self) {
        let observers = {
            let mut core = self.core.lock();
            if core.closed {
                return;
            }
            core.closed = true;
            self.closed.store(true, Ordering::Release);
            if let Some(frame) = core.state.clear() {
                trace!(seq = frame.seq, "shutdown_discard_pending");
            }
            mem::take(&mut core.observers)
        };
        for observer in observers {
            match observer {
                Observer::Pull(weak) => {
                    if let Some(slot) = weak.upgrade() {
                        slot.close();
                    }
                }
                Observer::Push(target) => target.slot.close(),
            }
        }
        self.token.cancel();
        info!("publisher_shutdown");
    }
}

/// Closes the publisher when the last handle is dropped.
struct Owner<T: Clone + Send + 'static> {
    /// State shared with the flush task.
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Drop for Owner<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Throttled frame publisher.
///
/// Cheap to clone; every clone refers to the same publisher. The publisher
/// shuts down when [`shutdown`](Self::shutdown) is called or the last clone is
/// dropped.
///
/// Push sinks attached with [`Inline`](crate::Inline) run while the publisher's
/// internal lock is held and must not call back into the publisher.
pub struct FramePublisher<T: Clone + Send + 'static> {
    /// Shared owner; dropping the last one shuts down.
    owner: Arc<Owner<T>>,
}

impl<T: Clone + Send + 'static> Clone for FramePublisher<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for FramePublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePublisher")
            .field("min_interval", &self.min_interval())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Clone + Send + 'static> FramePublisher<T> {
    /// Create a publisher whose flush task runs on the current Tokio runtime.
    ///
    /// Panics when called outside a runtime.
    pub fn new(config: PublisherConfig) -> Self {
        Self::with_handle(config, &Handle::current())
    }

    /// Create a publisher whose flush task runs on the runtime behind `handle`.
    pub fn with_handle(config: PublisherConfig, handle: &Handle) -> Self {
        let min_interval = config.min_interval();
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                state: PublishState::new(min_interval),
                observers: Vec::new(),
                closed: false,
            }),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            token: CancellationToken::new(),
            counters: Counters::default(),
        });
        drop(handle.spawn(run_flush(shared.clone())));
        debug!(min_interval_ms = min_interval.as_millis(), "publisher_start");
        Self {
            owner: Arc::new(Owner { shared }),
        }
    }

    /// Access the shared state.
    fn shared(&self) -> &Shared<T> {
        &self.owner.shared
    }

    /// Hand a newly captured frame to the publisher. Never blocks.
    ///
    /// The frame is published now if the throttle interval has elapsed since
    /// the last publish; otherwise it replaces the pending frame. Frames
    /// submitted after shutdown are dropped.
    pub fn submit(&self, frame: Frame<T>) {
        let shared = self.shared();
        if shared.closed.load(Ordering::Acquire) {
            trace!(seq = frame.seq, "submit_after_shutdown");
            return;
        }
        let mut core = shared.core.lock();
        if core.closed {
            return;
        }
        Counters::bump(&shared.counters.submitted);
        match core.state.offer(frame, Instant::now()) {
            Offer::Publish { frame, superseded } => {
                if superseded {
                    Counters::bump(&shared.counters.coalesced);
                }
                shared.deliver(&mut core, frame);
            }
            Offer::Held { replaced } => {
                if replaced {
                    Counters::bump(&shared.counters.coalesced);
                }
                drop(core);
                shared.wake.notify_one();
            }
            Offer::Stale(frame) => {
                Counters::bump(&shared.counters.stale);
                trace!(seq = frame.seq, "submit_stale");
            }
        }
    }

    /// Set the minimum gap between publishes. Takes effect on the next decision.
    pub fn configure(&self, min_interval: Duration) {
        let min_interval = PublisherConfig::from_interval(min_interval).min_interval();
        self.shared().core.lock().state.set_min_interval(min_interval);
        self.shared().wake.notify_one();
        info!(min_interval_ms = min_interval.as_millis(), "publisher_configure");
    }

    /// Current minimum gap between publishes.
    pub fn min_interval(&self) -> Duration {
        self.shared().core.lock().state.min_interval()
    }

    /// Start a new pull subscription.
    ///
    /// The subscription sees frames published after this call. Each call is
    /// independent, so a consumer can resubscribe after dropping an earlier
    /// subscription. After shutdown the returned subscription is already
    /// terminated.
    pub fn observe(&self) -> Subscription<T> {
        let mut core = self.shared().core.lock();
        if core.closed {
            return Subscription::closed();
        }
        core.prune();
        let slot = Slot::new();
        core.observers.push(Observer::Pull(Arc::downgrade(&slot)));
        trace!(observers = core.observers.len(), "observe");
        Subscription::new(slot)
    }

    /// Attach a push sink whose deliveries are marshaled through `dispatch`.
    pub fn attach<S, D>(&self, sink: S, dispatch: D) -> Attachment
    where
        S: FrameSink<T> + 'static,
        D: Dispatch + 'static,
    {
        let mut core = self.shared().core.lock();
        let state = AttachState::new(!core.closed);
        if !core.closed {
            core.prune();
            core.observers.push(Observer::Push(PushTarget {
                slot: PushSlot::new(Arc::new(sink), state.clone()),
                dispatch: Arc::new(dispatch),
            }));
            trace!(observers = core.observers.len(), "attach");
        }
        Attachment::new(state)
    }

    /// Shut down: discard any pending frame, terminate every observer, stop the
    /// flush task. Idempotent.
    pub fn shutdown(&self) {
        self.shared().close();
    }

    /// True once shut down.
    pub fn is_closed(&self) -> bool {
        self.shared().closed.load(Ordering::Acquire)
    }

    /// Resolves once the publisher has shut down.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.shared().token.clone().cancelled_owned()
    }

    /// Number of registered observers, pruning ones that went away.
    pub fn observer_count(&self) -> usize {
        let mut core = self.shared().core.lock();
        core.prune();
        core.observers.len()
    }

    /// Snapshot of the publish counters.
    pub fn stats(&self) -> PublishStats {
        self.shared().counters.snapshot()
    }
}

/// Flush task: sleeps until the pending frame is due, then publishes it.
///
/// Idle (no timer armed) while nothing is pending.
async fn run_flush<T: Clone + Send + 'static>(shared: Arc<Shared<T>>) {
    let token = shared.token.clone();
    loop {
        let deadline = shared.core.lock().state.next_deadline();
        let woken = shared.wake.notified();
        match deadline {
            Some(at) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = time::sleep_until(at) => shared.flush_due(),
                    _ = woken => {}
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = woken => {}
                }
            }
        }
    }
    trace!("flush_task_exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Inline;

    fn registered(publisher: &FramePublisher<u64>) -> usize {
        publisher.shared().core.lock().observers.len()
    }

    #[tokio::test]
    async fn dropped_observers_do_not_accumulate_without_publishes() {
        let publisher = FramePublisher::<u64>::new(PublisherConfig::default());
        for _ in 0..100 {
            drop(publisher.observe());
        }
        assert_eq!(registered(&publisher), 1);
        for _ in 0..100 {
            drop(publisher.attach(|_: Frame<u64>| {}, Inline));
        }
        assert_eq!(registered(&publisher), 1);
        assert_eq!(publisher.observer_count(), 0);
    }
}
