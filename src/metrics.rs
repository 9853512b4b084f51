#![forbid(unsafe_code)]

// Mesh metrics - lock-free AtomicU64 counters and a Prometheus-compatible histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Fixed histogram bucket boundaries (in microseconds for internal storage).
const BUCKET_BOUNDS_US: [u64; 10] = [
    10_000,     // 10ms
    50_000,     // 50ms
    100_000,    // 100ms
    250_000,    // 250ms
    500_000,    // 500ms
    1_000_000,  // 1s
    2_500_000,  // 2.5s
    5_000_000,  // 5s
    10_000_000, // 10s
    30_000_000, // 30s
];

const BUCKET_LABELS: [&str; 10] = [
    "0.01", "0.05", "0.1", "0.25", "0.5",
    "1", "2.5", "5", "10", "30",
];

/// Prometheus-compatible cumulative histogram with fixed buckets.
pub struct Histogram {
    /// Cumulative bucket counters: bucket[i] counts observations <= BUCKET_BOUNDS_US[i]
    buckets: [AtomicU64; 10],
    /// +Inf bucket (total count)
    count: AtomicU64,
    /// Sum of all observations in microseconds
    sum_us: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    /// Record a duration observation.
    pub fn observe(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.sum_us.fetch_add(us, Relaxed);
        self.count.fetch_add(1, Relaxed);
        for (i, &bound) in BUCKET_BOUNDS_US.iter().enumerate() {
            if us <= bound {
                self.buckets[i].fetch_add(1, Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");

        for (i, label) in BUCKET_LABELS.iter().enumerate() {
            let val = self.buckets[i].load(Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{label}\"}} {val}");
        }
        let count = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let sum_us = self.sum_us.load(Relaxed);
        let _ = writeln!(out, "{name}_sum {}.{:06}", sum_us / 1_000_000, sum_us % 1_000_000);
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Client-side mesh metrics using lock-free atomics.
#[derive(Clone)]
pub struct MeshMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    // Monotonic counters
    sessions_started_total: AtomicU64,
    sessions_ended_total: AtomicU64,
    offers_sent_total: AtomicU64,
    answers_sent_total: AtomicU64,
    candidates_sent_total: AtomicU64,
    candidates_dropped_total: AtomicU64,
    negotiation_races_total: AtomicU64,
    peers_lost_total: AtomicU64,
    signals_received_total: AtomicU64,
    signals_sent_total: AtomicU64,
    errors_total: AtomicU64,

    // Gauge
    peers_active: AtomicU64,

    // Histogram
    negotiation: Histogram,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub offers_sent: u64,
    pub answers_sent: u64,
    pub candidates_sent: u64,
    pub candidates_dropped: u64,
    pub negotiation_races: u64,
    pub peers_lost: u64,
    pub signals_received: u64,
    pub signals_sent: u64,
    pub errors: u64,
    pub peers_active: u64,
    pub negotiations_completed: u64,
}

impl Default for MeshMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions_started_total: AtomicU64::new(0),
                sessions_ended_total: AtomicU64::new(0),
                offers_sent_total: AtomicU64::new(0),
                answers_sent_total: AtomicU64::new(0),
                candidates_sent_total: AtomicU64::new(0),
                candidates_dropped_total: AtomicU64::new(0),
                negotiation_races_total: AtomicU64::new(0),
                peers_lost_total: AtomicU64::new(0),
                signals_received_total: AtomicU64::new(0),
                signals_sent_total: AtomicU64::new(0),
                errors_total: AtomicU64::new(0),
                peers_active: AtomicU64::new(0),
                negotiation: Histogram::new(),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_sessions_started(&self) {
        self.inner.sessions_started_total.fetch_add(1, Relaxed);
    }

    pub fn inc_sessions_ended(&self) {
        self.inner.sessions_ended_total.fetch_add(1, Relaxed);
    }

    pub fn inc_offers_sent(&self) {
        self.inner.offers_sent_total.fetch_add(1, Relaxed);
    }

    pub fn inc_answers_sent(&self) {
        self.inner.answers_sent_total.fetch_add(1, Relaxed);
    }

    pub fn inc_candidates_sent(&self) {
        self.inner.candidates_sent_total.fetch_add(1, Relaxed);
    }

    pub fn inc_candidates_dropped(&self) {
        self.inner.candidates_dropped_total.fetch_add(1, Relaxed);
    }

    pub fn inc_negotiation_races(&self) {
        self.inner.negotiation_races_total.fetch_add(1, Relaxed);
    }

    pub fn inc_peers_lost(&self) {
        self.inner.peers_lost_total.fetch_add(1, Relaxed);
    }

    pub fn inc_signals_received(&self) {
        self.inner.signals_received_total.fetch_add(1, Relaxed);
    }

    pub fn inc_signals_sent(&self) {
        self.inner.signals_sent_total.fetch_add(1, Relaxed);
    }

    pub fn inc_errors(&self) {
        self.inner.errors_total.fetch_add(1, Relaxed);
    }

    // --- Gauge ---

    /// Increments peers_active and returns an RAII guard that decrements on drop.
    /// Held by each peer entry, so the gauge follows the entry map exactly.
    pub fn peer_active_guard(&self) -> PeerGuard {
        self.inner.peers_active.fetch_add(1, Relaxed);
        PeerGuard { inner: self.inner.clone() }
    }

    // --- Histogram ---

    /// Time from peer entry creation to `connected`.
    pub fn observe_negotiation(&self, duration: Duration) {
        self.inner.negotiation.observe(duration);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let i = &self.inner;
        MetricsSnapshot {
            sessions_started: i.sessions_started_total.load(Relaxed),
            sessions_ended: i.sessions_ended_total.load(Relaxed),
            offers_sent: i.offers_sent_total.load(Relaxed),
            answers_sent: i.answers_sent_total.load(Relaxed),
            candidates_sent: i.candidates_sent_total.load(Relaxed),
            candidates_dropped: i.candidates_dropped_total.load(Relaxed),
            negotiation_races: i.negotiation_races_total.load(Relaxed),
            peers_lost: i.peers_lost_total.load(Relaxed),
            signals_received: i.signals_received_total.load(Relaxed),
            signals_sent: i.signals_sent_total.load(Relaxed),
            errors: i.errors_total.load(Relaxed),
            peers_active: i.peers_active.load(Relaxed),
            negotiations_completed: i.negotiation.count(),
        }
    }

    // --- Prometheus rendering ---

    /// Render all metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);
        let s = self.snapshot();

        // Counters
        render_counter(&mut out, "hanghive_sessions_started_total", "Call sessions started", s.sessions_started);
        render_counter(&mut out, "hanghive_sessions_ended_total", "Call sessions ended", s.sessions_ended);
        render_counter(&mut out, "hanghive_offers_sent_total", "SDP offers sent", s.offers_sent);
        render_counter(&mut out, "hanghive_answers_sent_total", "SDP answers sent", s.answers_sent);
        render_counter(&mut out, "hanghive_candidates_sent_total", "ICE candidates sent", s.candidates_sent);
        render_counter(&mut out, "hanghive_candidates_dropped_total", "Inbound ICE candidates dropped", s.candidates_dropped);
        render_counter(&mut out, "hanghive_negotiation_races_total", "Answers or candidates with no matching peer", s.negotiation_races);
        render_counter(&mut out, "hanghive_peers_lost_total", "Peers disposed after a terminal state", s.peers_lost);
        render_counter(&mut out, "hanghive_signals_received_total", "Signaling frames received", s.signals_received);
        render_counter(&mut out, "hanghive_signals_sent_total", "Signaling frames sent", s.signals_sent);
        render_counter(&mut out, "hanghive_errors_total", "Errors absorbed by the mesh", s.errors);

        // Gauge
        render_gauge(&mut out, "hanghive_peers_active", "Peer connection entries alive", s.peers_active);

        // Histogram
        self.inner.negotiation.render(
            "hanghive_negotiation_seconds",
            "Time from peer creation to connected",
            &mut out,
        );

        out
    }
}

/// RAII guard that decrements `peers_active` on drop.
pub struct PeerGuard {
    inner: Arc<Inner>,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        self.inner.peers_active.fetch_sub(1, Relaxed);
    }
}

fn render_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
