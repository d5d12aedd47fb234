//! Per-request latency instrumentation for FaaS load tests.
//!
//! A load-generation engine calls the lifecycle hooks around every request it
//! issues. On completion the request's timing and the function's self-reported
//! metrics are joined with cluster telemetry fetched at that moment, and one
//! row per request is streamed to a CSV file for offline analysis.

use std::sync::Arc;

use tokio::sync::Notify;

pub mod cluster_client;
pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod telemetry;
pub mod tracer;

pub use lifecycle::{Emitted, Instrumentation};
pub use metrics::{Correlator, FieldValue, MetricsRecord, ResponseEnvelope, SinkHandle, SinkWriter};
pub use tracer::{PendingRequests, RequestContext, RequestTracer};

/// Shared application state available to every hook handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Tracer + correlator + sink handle.
    pub instrumentation: Instrumentation,

    /// Contexts of requests whose "before" hook arrived over HTTP.
    pub pending: Arc<PendingRequests>,

    /// Signalled when the sink fails; the process must stop.
    pub fatal: Arc<Notify>,
}

impl AppState {
    pub fn new(instrumentation: Instrumentation) -> Self {
        Self {
            instrumentation,
            pending: Arc::new(PendingRequests::new()),
            fatal: Arc::new(Notify::new()),
        }
    }
}
