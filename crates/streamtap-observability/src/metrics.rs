use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Subscription Metrics
    // ============================================================================

    /// Subscriptions currently registered with a pull task (evicted lazily)
    pub static ref SUBSCRIPTIONS_ACTIVE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("streamtap_subscriptions_active", "Registered, not yet evicted subscriptions"),
        &["strategy"]
    ).expect("metric can be created");

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Entries returned by the stream operator
    pub static ref ENTRIES_FETCHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("streamtap_entries_fetched_total", "Total entries fetched from the log store"),
        &["stream"]
    ).expect("metric can be created");

    /// Entries handed to subscribers
    pub static ref ENTRIES_DELIVERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("streamtap_entries_delivered_total", "Total entries delivered to subscribers"),
        &["stream"]
    ).expect("metric can be created");

    /// Fetched entries a sink had no credit for (re-read on a later pull)
    pub static ref ENTRIES_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("streamtap_entries_rejected_total", "Total fetched entries refused by a full sink"),
        &["stream"]
    ).expect("metric can be created");

    /// Flushes that stopped early because the subscriber was not keeping up
    pub static ref FLUSH_STALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("streamtap_flush_stalls_total", "Total flushes stopped by subscriber backpressure"),
        &["stream"]
    ).expect("metric can be created");

    // ============================================================================
    // Read Metrics
    // ============================================================================

    /// Failed read calls
    pub static ref READ_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("streamtap_read_errors_total", "Total failed read calls"),
        &["strategy"]
    ).expect("metric can be created");

    /// Duration of one pull execution, including blocking reads
    pub static ref PULL_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("streamtap_pull_latency_seconds", "Pull execution latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["strategy"]
    ).expect("metric can be created");
}

/// Register every metric with [`REGISTRY`].
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(SUBSCRIPTIONS_ACTIVE.clone()))
            .expect("subscriptions_active can be registered");
        REGISTRY
            .register(Box::new(ENTRIES_FETCHED_TOTAL.clone()))
            .expect("entries_fetched_total can be registered");
        REGISTRY
            .register(Box::new(ENTRIES_DELIVERED_TOTAL.clone()))
            .expect("entries_delivered_total can be registered");
        REGISTRY
            .register(Box::new(ENTRIES_REJECTED_TOTAL.clone()))
            .expect("entries_rejected_total can be registered");
        REGISTRY
            .register(Box::new(FLUSH_STALLS_TOTAL.clone()))
            .expect("flush_stalls_total can be registered");
        REGISTRY
            .register(Box::new(READ_ERRORS_TOTAL.clone()))
            .expect("read_errors_total can be registered");
        REGISTRY
            .register(Box::new(PULL_LATENCY.clone()))
            .expect("pull_latency can be registered");
    });
}
