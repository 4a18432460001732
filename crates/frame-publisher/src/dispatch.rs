//! Marshaling publishes onto the consumer's execution context.
//!
//! The capture source and the flush timer run on runtime worker threads, while
//! display layers usually insist on a specific thread (an AppKit or winit main
//! loop). A [`Dispatch`] implementation takes a boxed job and arranges for it
//! to run on the right context without blocking the publishing side.
//!
//! - [`Inline`] runs the job on the publishing context.
//! - [`MainQueue`] parks jobs in a FIFO and pings a waker; the owning thread
//!   runs them with [`MainQueue::drain`].
//! - [`RuntimeDispatch`] spawns the job on a chosen Tokio runtime.

use std::{
    collections::VecDeque,
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::trace;

use crate::error::{Error, Result};

/// Unit of work handed to a dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Callback used to wake the thread that owns a [`MainQueue`].
pub type Waker = Box<dyn Fn() + Send + Sync + 'static>;

/// Runs jobs on a particular execution context.
pub trait Dispatch: Send + Sync {
    /// Schedule `job`. Must not block the caller.
    fn dispatch(&self, job: Job) -> Result<()>;
}

/// Run jobs immediately on the calling context.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl Dispatch for Inline {
    fn dispatch(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}

/// Spawn jobs onto a specific Tokio runtime.
#[derive(Clone, Debug)]
pub struct RuntimeDispatch {
    /// Runtime receiving the jobs.
    handle: Handle,
}

impl RuntimeDispatch {
    /// Dispatch onto the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatch onto the runtime of the calling task.
    ///
    /// Panics when called outside a Tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Dispatch for RuntimeDispatch {
    fn dispatch(&self, job: Job) -> Result<()> {
        drop(self.handle.spawn(async move { job() }));
        Ok(())
    }
}

/// State shared by all clones of a [`MainQueue`].
struct QueueInner {
    /// Jobs waiting for the owning thread.
    jobs: Mutex<VecDeque<Job>>,
    /// Called after every enqueue.
    waker: Mutex<Option<Waker>>,
    /// Set once the owner stops draining.
    closed: AtomicBool,
}

/// FIFO of jobs that must run on one owning thread.
///
/// Producers call [`dispatch`](Dispatch::dispatch) from any thread; the owner
/// (typically a UI event loop) calls [`drain`](Self::drain) whenever its waker
/// fires.
#[derive(Clone)]
pub struct MainQueue {
    /// Shared queue state.
    inner: Arc<QueueInner>,
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainQueue {
    /// Create an empty queue with no waker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(VecDeque::new()),
                waker: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a queue that calls `waker` after each enqueue.
    pub fn with_waker<F>(waker: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let queue = Self::new();
        queue.set_waker(waker);
        queue
    }

    /// Install or replace the waker, e.g. an event-loop proxy post.
    pub fn set_waker<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.waker.lock() = Some(Box::new(waker));
    }

    /// Run every job queued so far on the calling thread. Returns how many ran.
    ///
    /// Jobs enqueued while draining are left for the next call.
    pub fn drain(&self) -> usize {
        let jobs = mem::take(&mut *self.inner.jobs.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }
        if count > 0 {
            trace!(count, "main_queue_drain");
        }
        count
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Stop accepting jobs and discard those not yet run.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.jobs.lock().clear();
        trace!("main_queue_close");
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Dispatch for MainQueue {
    fn dispatch(&self, job: Job) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.inner.jobs.lock().push_back(job);
        // Wake the owning loop so it drains
        if let Some(wake) = self.inner.waker.lock().as_ref() {
            wake();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        thread::{self, ThreadId},
    };

    use super::*;

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        Inline
            .dispatch(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn main_queue_defers_until_drain_in_fifo_order() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let w = wakes.clone();
        let queue = MainQueue::with_waker(move || {
            w.fetch_add(1, Ordering::SeqCst);
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            queue
                .dispatch(Box::new(move || order.lock().push(i)))
                .unwrap();
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending(), 3);
        assert!(order.lock().is_empty());

        assert_eq!(queue.drain(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn main_queue_runs_jobs_on_draining_thread() {
        let queue = MainQueue::new();
        let seen: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                queue
                    .dispatch(Box::new(move || {
                        *s.lock() = Some(thread::current().id());
                    }))
                    .unwrap();
            })
        };
        producer.join().unwrap();
        queue.drain();
        assert_eq!(*seen.lock(), Some(thread::current().id()));
    }

    #[test]
    fn closed_queue_rejects_and_discards() {
        let queue = MainQueue::new();
        queue.dispatch(Box::new(|| {})).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.pending(), 0);
        assert!(matches!(queue.dispatch(Box::new(|| {})), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn runtime_dispatch_spawns_job() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        RuntimeDispatch::current()
            .dispatch(Box::new(move || {
                tx.send(7).ok();
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }
}
