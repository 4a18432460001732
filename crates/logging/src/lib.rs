#![warn(missing_docs)]

//! Shared logging helpers and CLI argument definitions for the framepub workspace.
//!
//! - [`LogArgs`]: clap flags for log level configuration
//! - [`compute_spec`]: resolve those flags (and `RUST_LOG`) into a filter directive
//! - [`init`]: install a `fmt` subscriber for a binary

use std::env;

use clap::Args;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

/// Logging controls for CLI apps.
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Set global log level to trace (our crates only)
    #[arg(long, conflicts_with_all = ["debug", "log_level", "log_filter"])]
    pub trace: bool,

    /// Set global log level to debug (our crates only)
    #[arg(long, conflicts_with_all = ["trace", "log_level", "log_filter"])]
    pub debug: bool,

    /// Set a single global log level for our crates (error|warn|info|debug|trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Set an explicit tracing filter directive (overrides other flags)
    /// e.g. "frame_publisher=trace,framepub=debug"
    #[arg(long)]
    pub log_filter: Option<String>,
}

impl LogArgs {
    /// Resolve these flags into a filter directive string.
    pub fn spec(&self) -> String {
        compute_spec(
            self.trace,
            self.debug,
            self.log_level.as_deref(),
            self.log_filter.as_deref(),
        )
    }
}

/// List of crate targets that constitute "our" logs.
pub fn our_crates() -> &'static [&'static str] {
    &["framepub", "frame_publisher", "logging"]
}

/// Build a filter directive string that sets the same `level` for all of our crates.
pub fn level_spec_for(level: &str) -> String {
    let lvl = level.to_ascii_lowercase();
    our_crates()
        .iter()
        .map(|t| format!("{}={}", t, lvl))
        .collect::<Vec<_>>()
        .join(",")
}

/// Compute the final filter spec string with precedence:
/// - `log_filter`
/// - `trace`/`debug`/`log_level` (crate-scoped)
/// - `RUST_LOG` env
/// - default to crate-scoped `info`
pub fn compute_spec(
    trace: bool,
    debug: bool,
    log_level: Option<&str>,
    log_filter: Option<&str>,
) -> String {
    if let Some(spec) = log_filter {
        return spec.to_string();
    }
    if trace {
        return level_spec_for("trace");
    }
    if debug {
        return level_spec_for("debug");
    }
    if let Some(lvl) = log_level {
        return level_spec_for(lvl);
    }
    env::var("RUST_LOG").unwrap_or_else(|_| level_spec_for("info"))
}

/// Create an `EnvFilter` from a spec string.
pub fn env_filter_from_spec(spec: &str) -> EnvFilter {
    EnvFilter::new(spec)
}

/// Install a global `fmt` subscriber filtered by `spec`.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(spec: &str) {
    registry()
        .with(env_filter_from_spec(spec))
        .with(fmt::layer().with_target(true))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let spec = compute_spec(true, false, Some("warn"), Some("frame_publisher=trace"));
        assert_eq!(spec, "frame_publisher=trace");
    }

    #[test]
    fn flags_scope_to_our_crates() {
        assert_eq!(
            compute_spec(false, true, None, None),
            "framepub=debug,frame_publisher=debug,logging=debug"
        );
        assert_eq!(
            compute_spec(false, false, Some("WARN"), None),
            "framepub=warn,frame_publisher=warn,logging=warn"
        );
    }

    #[test]
    fn log_args_resolve_like_compute_spec() {
        let args = LogArgs {
            trace: true,
            ..LogArgs::default()
        };
        assert_eq!(args.spec(), level_spec_for("trace"));
    }
}
