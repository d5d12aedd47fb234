//! Cluster telemetry sampled at the moment a request completes.
//!
//! Each source is an independent failure domain: whatever goes wrong inside
//! one (transport, HTTP status, payload shape, empty result, timeout) ends as
//! a [`FetchError`] that the correlator logs and turns into "no fields".

pub mod autoscaler;
pub mod invocation_rate;
pub mod nodes;
pub mod quantity;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cluster_client::{ClusterClient, ClusterError};
use crate::config::ClusterConfig;
use crate::metrics::FieldValue;

pub use autoscaler::AutoscalerQuery;
pub use invocation_rate::InvocationRateQuery;
pub use nodes::NodeResourceQuery;

/// Fields contributed by one source, in the order the source produced them.
pub type PartialFields = IndexMap<String, FieldValue>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("empty result at `{0}`")]
    Empty(&'static str),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// One kind of cluster telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Short stable name, used in logs.
    fn name(&self) -> &'static str;

    /// Sample the source once. Stateless between calls.
    async fn fetch(&self) -> Result<PartialFields, FetchError>;
}

// ─── Source selection ────────────────────────────────────────────

/// The configured set of sources.
///
/// Declaration order is also the merge order: when two sources produce the
/// same field name, the later one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Autoscaler,
    Nodes,
    InvocationRate,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [Self::Autoscaler, Self::Nodes, Self::InvocationRate];
}

/// Instantiate the enabled sources, in merge order, sharing one client.
pub fn build_sources(
    enabled: &[SourceKind],
    client: Arc<dyn ClusterClient>,
    cluster: &ClusterConfig,
) -> Vec<Arc<dyn TelemetrySource>> {
    let mut kinds = enabled.to_vec();
    kinds.sort();
    kinds.dedup();

    kinds
        .into_iter()
        .map(|kind| -> Arc<dyn TelemetrySource> {
            match kind {
                SourceKind::Autoscaler => Arc::new(AutoscalerQuery::new(
                    client.clone(),
                    cluster.replica_query(),
                )),
                SourceKind::Nodes => Arc::new(NodeResourceQuery::new(client.clone())),
                SourceKind::InvocationRate => Arc::new(InvocationRateQuery::new(
                    client.clone(),
                    cluster.namespace.clone(),
                    cluster.invocation_metric.clone(),
                    Some(cluster.invocation_selector()),
                )),
            }
        })
        .collect()
}

// ─── Payload helpers ─────────────────────────────────────────────

/// A number that may arrive as a JSON number or as a numeric string
/// (Prometheus encodes sample values as strings).
pub(crate) fn numeric(value: &Value, at: &str) -> Result<f64, FetchError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(FetchError::Malformed(format!("`{at}` is not a finite number: {value}"))),
    }
}

/// The array at `pointer`, required to be non-empty.
pub(crate) fn non_empty_array<'a>(
    doc: &'a Value,
    pointer: &str,
    label: &'static str,
) -> Result<&'a Vec<Value>, FetchError> {
    let items = doc
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed(format!("missing array `{label}`")))?;
    if items.is_empty() {
        return Err(FetchError::Empty(label));
    }
    Ok(items)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned cluster client shared by the source tests.

    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct CannedCluster {
        pub query: Option<Value>,
        pub nodes: Option<Value>,
        pub external: Option<Value>,
        pub seen_promql: Mutex<Vec<String>>,
        pub seen_external: Mutex<Vec<(String, String, Option<String>)>>,
    }

    fn answer(value: &Option<Value>) -> Result<Value, ClusterError> {
        value.clone().ok_or_else(|| ClusterError::Status {
            url: "http://cluster.test".into(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    #[async_trait]
    impl ClusterClient for CannedCluster {
        async fn instant_query(&self, promql: &str) -> Result<Value, ClusterError> {
            self.seen_promql.lock().push(promql.to_owned());
            answer(&self.query)
        }

        async fn node_metrics(&self) -> Result<Value, ClusterError> {
            answer(&self.nodes)
        }

        async fn external_metric(
            &self,
            namespace: &str,
            metric: &str,
            label_selector: Option<&str>,
        ) -> Result<Value, ClusterError> {
            self.seen_external.lock().push((
                namespace.to_owned(),
                metric.to_owned(),
                label_selector.map(str::to_owned),
            ));
            answer(&self.external)
        }
    }
}
