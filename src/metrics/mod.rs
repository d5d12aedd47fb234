pub mod correlator;
pub mod sink;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;

pub use correlator::Correlator;
pub use sink::{CsvSink, SinkError, SinkHandle, SinkWriter};

// ─── Field names ─────────────────────────────────────────────────

pub const REQUEST_ID: &str = "requestId";
pub const REQUEST_TIME: &str = "requestTime";
pub const RESPONSE_TIME: &str = "responseTime";
pub const REQUEST_RESPONSE_LATENCY: &str = "requestResponseLatency";
pub const STATUS_CODE: &str = "statusCode";
pub const SCHEDULING_LATENCY: &str = "schedulingLatency";
/// Self-reported by the function inside `metrics`.
pub const EXECUTION_START_TIME: &str = "executionStartTime";

/// Fields the correlator owns; neither the body nor telemetry may replace them.
pub const IDENTIFYING_FIELDS: [&str; 5] = [
    REQUEST_ID,
    REQUEST_TIME,
    RESPONSE_TIME,
    REQUEST_RESPONSE_LATENCY,
    STATUS_CODE,
];

// ─── Response envelope ───────────────────────────────────────────

/// What the instrumented function sent back. Read-only here.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    /// Raw body; only parsed as JSON when the status is a success.
    pub body: Bytes,
}

impl ResponseEnvelope {
    pub fn new(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    /// `status < 300`, matching what the harness treats as a served request.
    pub fn is_success(&self) -> bool {
        self.status_code < 300
    }
}

// ─── Field values ────────────────────────────────────────────────

/// One scalar cell of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON value. `null` has no cell; arrays and objects are kept
    /// as their compact JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(Self::Text(value.to_string())),
        }
    }

    /// Whole floats become integers (replica counts and the like).
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            Self::Int(value as i64)
        } else {
            Self::Float(value)
        }
    }

    /// Text written into the CSV cell.
    pub fn to_cell(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

// ─── Record ──────────────────────────────────────────────────────

/// The unit written to the sink: field name → scalar, in insertion order.
///
/// The field set is open-ended (per-node telemetry keys, whatever the
/// function reports), so this is a map rather than a struct. A field that
/// could not be computed is simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsRecord {
    fields: IndexMap<String, FieldValue>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
