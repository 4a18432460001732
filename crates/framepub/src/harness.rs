//! Live-preview pipeline: a synthetic capture source feeding the publisher,
//! with a display sink marshaled onto the calling thread.
//!
//! The calling thread plays the UI main loop. It blocks on a wake channel,
//! drains the [`MainQueue`] whenever the publisher posts to it, and exits once
//! the publisher shuts down.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc as std_mpsc,
    },
    result::Result as StdResult,
    time::Duration,
};

use frame_publisher::{
    Attachment, Frame, FramePublisher, MainQueue, PublishStats, spawn_feed, spawn_retry,
};
use tokio::{
    runtime::{Builder, Runtime},
    sync::mpsc::{self, error::TrySendError},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::HarnessConfig,
    error::Result,
    format::{COUNT, HERTZ, MILLIS, PERCENT},
};

/// How long the main loop waits for a wake before re-checking shutdown.
const MAIN_LOOP_POLL: Duration = Duration::from_millis(50);

/// Synthetic image payload.
type Payload = Arc<[u8]>;

/// What the capture source managed to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Frames handed to the feed channel.
    pub captured: u64,
    /// Frames dropped because the feed channel was full.
    pub dropped: u64,
}

/// Counters kept by the display sink.
#[derive(Debug, Default)]
struct Preview {
    /// Set once the preview window is up.
    ready: AtomicBool,
    /// Frames drawn.
    shown: AtomicU64,
    /// Frames that arrived before the window was ready.
    hidden: AtomicU64,
    /// Sum of capture-to-display latencies, microseconds.
    latency_us: AtomicU64,
    /// Worst capture-to-display latency, microseconds.
    max_latency_us: AtomicU64,
}

impl Preview {
    /// Draw one frame.
    fn show(&self, frame: &Frame<Payload>) {
        if !self.ready.load(Ordering::Acquire) {
            self.hidden.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let age = frame.age(Instant::now()).as_micros() as u64;
        self.shown.fetch_add(1, Ordering::Relaxed);
        self.latency_us.fetch_add(age, Ordering::Relaxed);
        self.max_latency_us.fetch_max(age, Ordering::Relaxed);
    }
}

/// Outcome of one harness run.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// Capture source counters.
    pub source: SourceStats,
    /// Publisher counters at shutdown.
    pub publish: PublishStats,
    /// Frames drawn by the display.
    pub shown: u64,
    /// Frames published before the preview window came up.
    pub hidden: u64,
    /// Mean capture-to-display latency.
    pub mean_latency: Duration,
    /// Worst capture-to-display latency.
    pub max_latency: Duration,
    /// Attempt on which the preview window came up.
    pub activation_attempt: u32,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl Summary {
    /// Published frames per second over the run.
    pub fn publish_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.publish.published as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "captured   {} frames ({} dropped at source)",
            COUNT.count(self.source.captured),
            COUNT.count(self.source.dropped),
        )?;
        writeln!(
            f,
            "published  {} of {} ({}) at {}; coalesced {}, stale {}, flushed {}",
            COUNT.count(self.publish.published),
            COUNT.count(self.publish.submitted),
            PERCENT.format(self.publish.publish_ratio()),
            HERTZ.format(self.publish_rate()),
            COUNT.count(self.publish.coalesced),
            COUNT.count(self.publish.stale),
            COUNT.count(self.publish.flushed),
        )?;
        writeln!(
            f,
            "shown      {} ({} before activation); latency mean {}, max {}",
            COUNT.count(self.shown),
            COUNT.count(self.hidden),
            MILLIS.format(self.mean_latency.as_secs_f64() * 1_000.0),
            MILLIS.format(self.max_latency.as_secs_f64() * 1_000.0),
        )?;
        write!(f, "activated  on attempt {}", self.activation_attempt)
    }
}

/// Run the pipeline described by `config` to completion on the calling thread.
pub fn run(config: &HarnessConfig) -> Result<Summary> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("framepub-worker")
        .enable_all()
        .build()?;
    run_on(&runtime, config)
}

/// Run the pipeline with its background tasks on `runtime`.
pub fn run_on(runtime: &Runtime, config: &HarnessConfig) -> Result<Summary> {
    let started = Instant::now();
    let (wake_tx, wake_rx) = std_mpsc::channel::<()>();
    let queue = MainQueue::with_waker(move || {
        // The main loop may already be gone during teardown
        wake_tx.send(()).ok();
    });

    let display = Arc::new(Preview::default());
    let publisher: FramePublisher<Payload> =
        FramePublisher::with_handle(config.publisher, runtime.handle());
    let attachment: Attachment = {
        let display = display.clone();
        publisher.attach(move |frame: Frame<Payload>| display.show(&frame), queue.clone())
    };

    let (source, feed, activation) = {
        let _guard = runtime.enter();
        let activation = {
            let display = display.clone();
            let failures = config.activation_failures;
            spawn_retry(
                config.activation,
                "preview_activate".to_string(),
                move |attempt| {
                    let display = display.clone();
                    async move { activate_preview(&display, attempt, failures) }
                },
            )
        };
        let (tx, rx) = mpsc::channel(config.feed_capacity.max(1));
        let payload: Payload = Arc::from(vec![0u8; config.frame_bytes]);
        let source = runtime.spawn(capture_source(
            tx,
            payload,
            config.capture_period(),
            config.duration(),
        ));
        let feed = spawn_feed(publisher.clone(), rx);
        (source, feed, activation)
    };
    info!(
        min_interval_ms = publisher.min_interval().as_millis(),
        capture_fps = config.capture_fps,
        duration_ms = config.duration_ms,
        "harness_start"
    );

    while !publisher.is_closed() {
        match wake_rx.recv_timeout(MAIN_LOOP_POLL) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
        queue.drain();
    }
    // Jobs queued before shutdown; their sink is already detached
    queue.drain();
    queue.close();
    drop(attachment);

    let source = runtime.block_on(source)?;
    runtime.block_on(feed)?;
    let activation_attempt = runtime.block_on(activation.join())?;

    let shown = display.shown.load(Ordering::Relaxed);
    let mean_latency = if shown > 0 {
        Duration::from_micros(display.latency_us.load(Ordering::Relaxed) / shown)
    } else {
        Duration::ZERO
    };
    let summary = Summary {
        source,
        publish: publisher.stats(),
        shown,
        hidden: display.hidden.load(Ordering::Relaxed),
        mean_latency,
        max_latency: Duration::from_micros(display.max_latency_us.load(Ordering::Relaxed)),
        activation_attempt,
        elapsed: started.elapsed(),
    };
    info!(
        captured = summary.source.captured,
        published = summary.publish.published,
        shown = summary.shown,
        "harness_done"
    );
    Ok(summary)
}

/// Simulated window-server activation: refuses the first `failures` attempts.
fn activate_preview(display: &Preview, attempt: u32, failures: u32) -> StdResult<u32, String> {
    if attempt <= failures {
        return Err(format!("preview window not ready (attempt {attempt})"));
    }
    display.ready.store(true, Ordering::Release);
    debug!(attempt, "preview_active");
    Ok(attempt)
}

/// Emit frames every `period` for `duration`, then close the channel.
///
/// Uses `try_send` so a slow feed never stalls the capture cadence; frames that
/// find the channel full are dropped.
async fn capture_source(
    frames: mpsc::Sender<Frame<Payload>>,
    payload: Payload,
    period: Duration,
    duration: Duration,
) -> SourceStats {
    let mut stats = SourceStats::default();
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stop = time::sleep(duration);
    tokio::pin!(stop);
    let mut seq = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                match frames.try_send(Frame::new(seq, payload.clone())) {
                    Ok(()) => stats.captured += 1,
                    Err(TrySendError::Full(_)) => stats.dropped += 1,
                    Err(TrySendError::Closed(_)) => {
                        warn!(seq, "capture_feed_closed_early");
                        break;
                    }
                }
                seq += 1;
            }
        }
    }
    debug!(captured = stats.captured, dropped = stats.dropped, "capture_source_done");
    stats
}

#[cfg(test)]
mod tests {
    use frame_publisher::{PublisherConfig, RetryPolicy};

    use super::*;

    fn quick_config() -> HarnessConfig {
        HarnessConfig {
            publisher: PublisherConfig::from_interval(Duration::from_millis(50)),
            capture_fps: 200,
            duration_ms: 400,
            frame_bytes: 16,
            feed_capacity: 4,
            activation: RetryPolicy::fixed(3, Duration::from_millis(10)),
            activation_failures: 1,
        }
    }

    #[test]
    fn pipeline_throttles_and_terminates() {
        let summary = run(&quick_config()).unwrap();
        assert!(summary.source.captured > 0);
        assert_eq!(summary.publish.submitted, summary.source.captured);
        assert!(summary.publish.published >= 1);
        // Publishes are at least 50ms apart
        let bound = summary.elapsed.as_millis() as u64 / 50 + 1;
        assert!(summary.publish.published <= bound, "{summary:?}");
        assert!(summary.publish.published < summary.publish.submitted);
        // Deliveries still queued at shutdown are discarded
        assert!(summary.shown + summary.hidden <= summary.publish.published);
        assert!(summary.shown >= 1);
        assert_eq!(summary.activation_attempt, 2);
    }

    #[test]
    fn exhausted_activation_is_an_error() {
        let config = HarnessConfig {
            activation_failures: 10,
            ..quick_config()
        };
        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("preview_activate"), "{err}");
    }

    #[test]
    fn summary_renders_with_shared_formatters() {
        let summary = Summary {
            source: SourceStats {
                captured: 1_200,
                dropped: 3,
            },
            publish: PublishStats {
                submitted: 1_200,
                published: 200,
                coalesced: 990,
                stale: 0,
                flushed: 10,
            },
            shown: 199,
            hidden: 1,
            mean_latency: Duration::from_micros(2_500),
            max_latency: Duration::from_millis(12),
            activation_attempt: 2,
            elapsed: Duration::from_secs(20),
        };
        let text = summary.to_string();
        assert!(text.contains("captured   1,200 frames (3 dropped at source)"), "{text}");
        assert!(text.contains("(16.7%) at 10.0 Hz"), "{text}");
        assert!(text.contains("latency mean 2.5 ms, max 12.0 ms"), "{text}");
        assert!(text.ends_with("activated  on attempt 2"));
    }
}
