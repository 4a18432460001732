//! Adapter from a push-style capture source to [`FramePublisher::submit`].

use tokio::{sync::mpsc::Receiver, task::JoinHandle};
use tracing::debug;

use crate::{frame::Frame, publisher::FramePublisher};

/// Forward frames from `frames` into `publisher` until either side goes away.
///
/// When the capture source drops its sender the publisher is shut down, which
/// terminates every observation sequence. When the publisher shuts down first
/// the feed stops reading and drops the receiver, so the source sees its
/// channel close.
///
/// Capture sources should send with `try_send` and drop frames on a full
/// channel; the publisher only ever wants the newest frame.
pub fn spawn_feed<T>(publisher: FramePublisher<T>, mut frames: Receiver<Frame<T>>) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let closed = publisher.closed();
        tokio::pin!(closed);
        loop {
            tokio::select! {
                biased;
                _ = &mut closed => {
                    debug!("capture_feed_publisher_closed");
                    break;
                }
                next = frames.recv() => match next {
                    Some(frame) => publisher.submit(frame),
                    None => {
                        debug!("capture_feed_source_closed");
                        publisher.shutdown();
                        break;
                    }
                },
            }
        }
    })
}
