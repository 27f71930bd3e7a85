//! Tracing setup for the server, the in-process job runner and the client CLI.
//!
//! Everything goes to stderr so that `bkpanel list` and friends can print JSON
//! on stdout. `RUST_LOG` replaces the built-in filter entirely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// One JSON object per event, with the enclosing job span attached
    pub json: bool,
    /// Include backup tool output and per-step progress writes
    pub verbose: bool,
}

impl LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "bkpanel=debug"
        } else {
            "bkpanel=info"
        }
    }
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.log_json,
            verbose: config.verbose,
        }
    }
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call loses to the first.
pub fn init(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    // Exactly one of the two layers is present
    let json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let console = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(console)
        .try_init()
        .ok();
}

/// Lets one backup tool output line through per interval and counts the rest.
///
/// Shared by the stdout and stderr readers of a single child process.
pub struct LogThrottle {
    interval_ms: u64,
    started: Instant,
    /// Milliseconds since `started` before which lines are dropped
    next_allowed_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            started: Instant::now(),
            next_allowed_ms: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn should_log(&self) -> bool {
        let now_ms = self.started.elapsed().as_millis() as u64;
        let next = self.next_allowed_ms.load(Ordering::Relaxed);

        let admitted = now_ms >= next
            && self
                .next_allowed_ms
                .compare_exchange(
                    next,
                    now_ms + self.interval_ms,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok();

        if !admitted {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Lines dropped so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line_is_logged_and_burst_is_counted() {
        let throttle = LogThrottle::new(Duration::from_secs(60));

        assert!(throttle.should_log());
        assert!(!throttle.should_log());
        assert!(!throttle.should_log());
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn test_next_line_logged_after_interval() {
        let throttle = LogThrottle::new(Duration::from_millis(10));
        assert!(throttle.should_log());

        std::thread::sleep(Duration::from_millis(20));

        assert!(throttle.should_log());
        assert_eq!(throttle.suppressed(), 0);
    }

    #[test]
    fn test_verbose_flag_picks_debug_filter() {
        let mut config = AppConfig::default();
        assert_eq!(LogConfig::from(&config).default_directive(), "bkpanel=info");

        config.verbose = true;
        config.log_json = true;
        let log = LogConfig::from(&config);
        assert!(log.json);
        assert_eq!(log.default_directive(), "bkpanel=debug");
    }
}
