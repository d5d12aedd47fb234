use uuid::Uuid;

use crate::metrics::{Correlator, MetricsRecord, ResponseEnvelope, SinkError, SinkHandle};
use crate::tracer::{RequestContext, RequestTracer};

/// The two lifecycle hooks a load engine calls around each request.
///
/// Both always return control to the caller; the only error that can come
/// out of completion is a broken sink, which should end the run.
pub struct Instrumentation {
    tracer: RequestTracer,
    correlator: Correlator,
    sink: SinkHandle,
}

/// What completion wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub request_id: Uuid,
    pub fields: usize,
}

impl Instrumentation {
    pub fn new(correlator: Correlator, sink: SinkHandle) -> Self {
        Self {
            tracer: RequestTracer::new(),
            correlator,
            sink,
        }
    }

    /// "Before" hook.
    pub fn on_request_start(&self) -> RequestContext {
        self.tracer.on_request_start()
    }

    /// "After" hook: correlate, then append to the sink.
    pub async fn on_request_complete(
        &self,
        ctx: &RequestContext,
        response: &ResponseEnvelope,
    ) -> Result<Emitted, SinkError> {
        let record = self.correlator.correlate(ctx, response).await;
        self.emit(ctx.request_id, record).await
    }

    /// "After" hook without a matching "before". A fresh id is minted when
    /// the caller has none.
    pub async fn on_unmatched_complete(
        &self,
        request_id: Option<Uuid>,
        response: &ResponseEnvelope,
    ) -> Result<Emitted, SinkError> {
        let request_id = request_id.unwrap_or_else(Uuid::new_v4);
        let record = self.correlator.correlate_unmatched(request_id, response).await;
        self.emit(request_id, record).await
    }

    pub fn records_written(&self) -> u64 {
        self.sink.records_written()
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    async fn emit(&self, request_id: Uuid, record: MetricsRecord) -> Result<Emitted, SinkError> {
        let fields = record.len();
        self.sink.emit(record).await?;
        tracing::debug!(%request_id, fields, "record emitted");
        Ok(Emitted { request_id, fields })
    }
}
