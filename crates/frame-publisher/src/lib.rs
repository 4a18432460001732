#![warn(missing_docs)]

//! Throttled, coalescing frame publishing for live capture previews.
//!
//! A capture source produces images at whatever rate the OS delivers them; a
//! display layer wants at most one image per throttle interval, on its own
//! thread. [`FramePublisher`] sits between the two:
//!
//! - [`FramePublisher::submit`] never blocks the capture source.
//! - Frames inside the throttle window coalesce; the newest one is published
//!   when the window elapses.
//! - Observers pull with [`FramePublisher::observe`] or are pushed to through a
//!   [`Dispatch`] implementation such as [`MainQueue`].
//! - Closing the capture feed ([`spawn_feed`]) or calling
//!   [`FramePublisher::shutdown`] terminates every observation sequence.
//!
//! [`retry`] and [`spawn_retry`] provide non-blocking scheduled retries for
//! the OS calls around the pipeline (window activation and friends).

mod config;
mod dispatch;
mod error;
mod feed;
mod frame;
mod publisher;
mod retry;
mod stats;
mod subscription;
mod throttle;

pub use config::{MAX_MIN_INTERVAL_MS, PublisherConfig};
pub use dispatch::{Dispatch, Inline, Job, MainQueue, RuntimeDispatch, Waker};
pub use error::{Error, Result};
pub use feed::spawn_feed;
pub use frame::Frame;
pub use publisher::FramePublisher;
pub use retry::{
    RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY_MS, RetryHandle, RetryPolicy, retry, spawn_retry,
};
pub use stats::PublishStats;
pub use subscription::{Attachment, FrameSink, Subscription};
pub use throttle::{DEFAULT_MIN_INTERVAL, Offer, PublishState};
