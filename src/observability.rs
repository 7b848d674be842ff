//! Tracing setup and in-process conversion counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

/// Install the global subscriber. `RUST_LOG` wins over the default `info`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(telemetry: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = match telemetry.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
    conversions_succeeded: AtomicU64,
    conversions_failed: AtomicU64,
    downloads_served: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload passed validation and was handed to the dispatcher
    pub fn upload_accepted(&self) {
        self.bump(&self.uploads_accepted, "uploads_accepted");
    }

    /// Upload rejected before any handler ran
    pub fn upload_rejected(&self) {
        self.bump(&self.uploads_rejected, "uploads_rejected");
    }

    pub fn conversion_succeeded(&self) {
        self.bump(&self.conversions_succeeded, "conversions_succeeded");
    }

    pub fn conversion_failed(&self) {
        self.bump(&self.conversions_failed, "conversions_failed");
    }

    pub fn download_served(&self) {
        self.bump(&self.downloads_served, "downloads_served");
    }

    fn bump(&self, counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = name, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            downloads_served: self.downloads_served.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads_accepted: u64,
    pub uploads_rejected: u64,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
    pub downloads_served: u64,
}
