//! StreamTap Observability
//!
//! Prometheus metrics for the consumption engine.
//!
//! # Features
//!
//! - Subscription, fetch, delivery and backpressure counters
//! - Pull latency histogram
//! - `/metrics` endpoint for scraping
//!
//! # Usage
//!
//! ```no_run
//! use streamtap_observability::{exporter, metrics};
//!
//! // Register metrics
//! metrics::init();
//!
//! // Serve them next to the application's routes
//! let metrics_router = exporter::create_metrics_router();
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
