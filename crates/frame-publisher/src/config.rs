//! Publisher settings.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    throttle::DEFAULT_MIN_INTERVAL,
};

/// Largest accepted throttle interval.
pub const MAX_MIN_INTERVAL_MS: u64 = 10_000;

/// Publisher settings, loadable from RON.
///
/// ```ron
/// (min_interval_ms: 100)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Minimum gap between two publishes, in milliseconds. Zero disables throttling.
    pub min_interval_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
        }
    }
}

impl PublisherConfig {
    /// Build a config from an interval, clamping to [`MAX_MIN_INTERVAL_MS`].
    pub fn from_interval(interval: Duration) -> Self {
        let ms = interval.as_millis().min(u128::from(MAX_MIN_INTERVAL_MS)) as u64;
        Self {
            min_interval_ms: ms,
        }
    }

    /// Effective throttle interval after clamping.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms.min(MAX_MIN_INTERVAL_MS))
    }

    /// Parse from RON text.
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a RON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ten_hertz() {
        assert_eq!(
            PublisherConfig::default().min_interval(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn parses_ron_and_fills_defaults() {
        let cfg = PublisherConfig::from_ron("(min_interval_ms: 33)").unwrap();
        assert_eq!(cfg.min_interval(), Duration::from_millis(33));
        let empty = PublisherConfig::from_ron("()").unwrap();
        assert_eq!(empty, PublisherConfig::default());
    }

    #[test]
    fn rejects_malformed_ron() {
        let err = PublisherConfig::from_ron("(min_interval_ms: \"fast\")").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn clamps_large_intervals() {
        let cfg = PublisherConfig {
            min_interval_ms: 60_000,
        };
        assert_eq!(cfg.min_interval(), Duration::from_millis(MAX_MIN_INTERVAL_MS));
        assert_eq!(
            PublisherConfig::from_interval(Duration::from_secs(3600)).min_interval_ms,
            MAX_MIN_INTERVAL_MS
        );
        assert_eq!(
            PublisherConfig::from_interval(Duration::ZERO).min_interval(),
            Duration::ZERO
        );
    }
}
