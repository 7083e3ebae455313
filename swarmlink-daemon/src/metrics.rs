//! Prometheus text-exposition metrics (system specification §6.2), hand
//! rolled the way the teacher's `nyx-daemon` exposes its own `/metrics`
//! endpoint: a handful of atomic counters rendered into the exposition
//! format on demand rather than pulled in through a metrics crate, since the
//! daemon only ever needs a handful of monotonic counters and one gauge.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct MetricsCollector {
    chunks_served: AtomicU64,
    bytes_served: AtomicU64,
    downloads_started: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    active_downloads: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk_served(&self, bytes: u64) {
        self.chunks_served.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
        self.active_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_completed(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
        self.active_downloads.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        self.active_downloads.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        push_counter(
            &mut out,
            "swarmlink_chunks_served_total",
            "Chunks served to peers",
            self.chunks_served.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "swarmlink_bytes_served_total",
            "Bytes served to peers",
            self.bytes_served.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "swarmlink_downloads_started_total",
            "Downloads started",
            self.downloads_started.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "swarmlink_downloads_completed_total",
            "Downloads completed successfully",
            self.downloads_completed.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "swarmlink_downloads_failed_total",
            "Downloads that ended in failure",
            self.downloads_failed.load(Ordering::Relaxed),
        );
        push_gauge(
            &mut out,
            "swarmlink_active_downloads",
            "Downloads currently in flight",
            self.active_downloads.load(Ordering::Relaxed),
        );
        out
    }
}

fn push_counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}

fn push_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n"));
}
