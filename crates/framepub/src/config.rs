//! Harness configuration, loaded from RON.

use std::{fs, path::Path, time::Duration};

use frame_publisher::{PublisherConfig, RetryPolicy};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

use crate::{
    cli::RunArgs,
    error::{Error, Result},
};

/// Highest accepted synthetic capture rate.
const MAX_CAPTURE_FPS: u32 = 1_000;

/// Settings for one harness run. Every field is optional in the file.
///
/// ```ron
/// (
///     publisher: (min_interval_ms: 100),
///     capture_fps: 60,
///     duration_ms: 3000,
/// )
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Throttle settings for the publisher.
    pub publisher: PublisherConfig,
    /// Synthetic capture rate, frames per second.
    pub capture_fps: u32,
    /// How long the capture source runs, in milliseconds.
    pub duration_ms: u64,
    /// Payload size of each synthetic frame.
    pub frame_bytes: usize,
    /// Capacity of the channel between capture source and publisher.
    pub feed_capacity: usize,
    /// Pacing for bringing up the preview window.
    pub activation: RetryPolicy,
    /// Number of activation attempts the simulated window server refuses.
    pub activation_failures: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            publisher: PublisherConfig::default(),
            capture_fps: 60,
            duration_ms: 3_000,
            frame_bytes: 64 * 1024,
            feed_capacity: 2,
            activation: RetryPolicy::default(),
            activation_failures: 1,
        }
    }
}

impl HarnessConfig {
    /// Parse from RON text.
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    /// Read and parse a RON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Render as pretty RON.
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|e| Error::config(e.to_string()))
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&mut self, args: &RunArgs) {
        if let Some(interval) = args.min_interval {
            self.publisher = PublisherConfig::from_interval(interval);
        }
        if let Some(fps) = args.fps {
            self.capture_fps = fps;
        }
        if let Some(duration) = args.duration {
            self.duration_ms = duration.as_millis() as u64;
        }
        if let Some(bytes) = args.frame_bytes {
            self.frame_bytes = bytes;
        }
    }

    /// Gap between two synthetic captures.
    pub fn capture_period(&self) -> Duration {
        let fps = self.capture_fps.clamp(1, MAX_CAPTURE_FPS);
        Duration::from_secs(1) / fps
    }

    /// How long the capture source runs.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
