use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::ResponseEnvelope;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeResponse {
    pub request_id: Uuid,
    pub request_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterRequest {
    /// Id handed out by `/hooks/before`. Missing or unknown ids still
    /// produce a record, just without request timing.
    #[serde(default)]
    pub request_id: Option<String>,

    pub status_code: u16,

    /// Response body exactly as the function returned it.
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterResponse {
    pub request_id: Uuid,
    /// Number of fields in the emitted record.
    pub fields: usize,
    /// false when no matching `/hooks/before` was found.
    pub matched: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub pending: usize,
    pub records_written: u64,
    pub sources: Vec<String>,
}

// ─── POST /hooks/before ──────────────────────────────────────────

pub async fn before_request(State(state): State<Arc<AppState>>) -> Json<BeforeResponse> {
    let ctx = state.instrumentation.on_request_start();
    let body = BeforeResponse {
        request_id: ctx.request_id,
        request_time: ctx.request_time,
    };
    state.pending.insert(ctx);
    Json(body)
}

// ─── POST /hooks/after ───────────────────────────────────────────

pub async fn after_response(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AfterRequest>,
) -> Result<Json<AfterResponse>, AppError> {
    if !(100..=999).contains(&req.status_code) {
        return Err(AppError::BadRequest(format!(
            "statusCode {} is not an HTTP status",
            req.status_code
        )));
    }

    let response = ResponseEnvelope::new(req.status_code, req.body);
    let request_id = req.request_id.as_deref().and_then(|raw| {
        raw.parse::<Uuid>()
            .map_err(|e| tracing::warn!(request_id = raw, error = %e, "unparsable request id"))
            .ok()
    });
    let ctx = request_id.and_then(|id| state.pending.take(&id));

    let outcome = match &ctx {
        Some(ctx) => state.instrumentation.on_request_complete(ctx, &response).await,
        None => {
            tracing::warn!(
                request_id = ?request_id,
                status = req.status_code,
                "completion without a matching start"
            );
            state
                .instrumentation
                .on_unmatched_complete(request_id, &response)
                .await
        }
    };

    let emitted = outcome.map_err(|e| {
        tracing::error!(error = %e, "sink failed, shutting down");
        state.fatal.notify_one();
        AppError::from(e)
    })?;

    Ok(Json(AfterResponse {
        request_id: emitted.request_id,
        fields: emitted.fields,
        matched: ctx.is_some(),
    }))
}

// ─── GET /healthz ────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        pending: state.pending.len(),
        records_written: state.instrumentation.records_written(),
        sources: state
            .instrumentation
            .correlator()
            .source_names()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}
