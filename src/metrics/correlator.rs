use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use super::{
    FieldValue, MetricsRecord, ResponseEnvelope, EXECUTION_START_TIME, IDENTIFYING_FIELDS,
    REQUEST_ID, REQUEST_RESPONSE_LATENCY, REQUEST_TIME, RESPONSE_TIME, SCHEDULING_LATENCY,
    STATUS_CODE,
};
use crate::telemetry::{FetchError, PartialFields, TelemetrySource};
use crate::tracer::{epoch_seconds, RequestContext, Timing};

// ─── Public types ────────────────────────────────────────────────

/// Joins a finished request with the function's own metrics and a fresh
/// sample of every telemetry source.
pub struct Correlator {
    /// In merge order; later sources overwrite earlier ones on collision.
    sources: Vec<Arc<dyn TelemetrySource>>,
    timeout: Duration,
}

/// Request-scoped stamps going into a record.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    request_id: Uuid,
    response_time: f64,
    /// Absent when the completion had no matching start.
    traced: Option<Timing>,
}

// ─── Correlator impl ─────────────────────────────────────────────

impl Correlator {
    pub fn new(sources: Vec<Arc<dyn TelemetrySource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Build the record for a completed request.
    ///
    /// Never fails: telemetry problems drop that source's fields, an
    /// unreadable body drops the function's metrics. The identifying and
    /// timing fields are always there.
    pub async fn correlate(&self, ctx: &RequestContext, response: &ResponseEnvelope) -> MetricsRecord {
        let timing = ctx.finish();
        let stamp = Stamp {
            request_id: ctx.request_id,
            response_time: timing.response_time,
            traced: Some(timing),
        };
        let telemetry = self.sample().await;
        assemble(&stamp, response, telemetry)
    }

    /// Record for a completion whose start was never seen.
    ///
    /// Carries only what can be known without a start: id, status,
    /// response time, the body's metrics and telemetry.
    pub async fn correlate_unmatched(
        &self,
        request_id: Uuid,
        response: &ResponseEnvelope,
    ) -> MetricsRecord {
        let stamp = Stamp {
            request_id,
            response_time: epoch_seconds(),
            traced: None,
        };
        let telemetry = self.sample().await;
        assemble(&stamp, response, telemetry)
    }

    /// Fetch every source concurrently, one task each, each bounded by the
    /// timeout. Returns one entry per source in merge order; a source that
    /// failed, timed out or panicked yields an empty set.
    pub async fn sample(&self) -> Vec<PartialFields> {
        let tasks = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let timeout = self.timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                }
            })
        });

        join_all(tasks)
            .await
            .into_iter()
            .zip(&self.sources)
            .map(|(joined, source)| match joined {
                Ok(Ok(fields)) => fields,
                Ok(Err(e)) => {
                    tracing::debug!(source = source.name(), error = %e, "telemetry source contributed no fields");
                    PartialFields::new()
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "telemetry task aborted");
                    PartialFields::new()
                }
            })
            .collect()
    }
}

// ─── Assembly ────────────────────────────────────────────────────

/// The `metrics` object of a successful response body.
fn body_metrics(response: &ResponseEnvelope) -> Option<serde_json::Map<String, Value>> {
    if !response.is_success() {
        return None;
    }
    let mut body: Value = match serde_json::from_slice(&response.body) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(status = response.status_code, error = %e, "response body is not JSON");
            return None;
        }
    };
    match body.get_mut("metrics").map(Value::take) {
        Some(Value::Object(metrics)) => Some(metrics),
        Some(other) => {
            tracing::warn!(found = %other, "response `metrics` is not an object");
            None
        }
        None => {
            tracing::debug!(status = response.status_code, "response has no `metrics` object");
            None
        }
    }
}

fn assemble(stamp: &Stamp, response: &ResponseEnvelope, telemetry: Vec<PartialFields>) -> MetricsRecord {
    let mut record = MetricsRecord::new();

    // identifying fields come first and are never replaced
    record.insert(REQUEST_ID, stamp.request_id.to_string());
    if let Some(timing) = &stamp.traced {
        record.insert(REQUEST_TIME, timing.request_time);
    }
    record.insert(RESPONSE_TIME, stamp.response_time);
    if let Some(timing) = &stamp.traced {
        record.insert(REQUEST_RESPONSE_LATENCY, timing.latency);
    }
    record.insert(STATUS_CODE, response.status_code);

    let metrics = body_metrics(response);
    if let Some(metrics) = &metrics {
        for (name, value) in metrics {
            if IDENTIFYING_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = FieldValue::from_json(value) {
                record.insert(name.as_str(), value);
            }
        }
    }

    for fields in telemetry {
        for (name, value) in fields {
            if IDENTIFYING_FIELDS.contains(&name.as_str()) {
                tracing::debug!(field = %name, "telemetry field shadows an identifying field, ignored");
                continue;
            }
            record.insert(name, value);
        }
    }

    let execution_start = metrics
        .as_ref()
        .and_then(|m| m.get(EXECUTION_START_TIME))
        .and_then(Value::as_f64);
    if let (Some(start), Some(timing)) = (execution_start, &stamp.traced) {
        record.insert(SCHEDULING_LATENCY, start - timing.request_time);
    }

    record
}
