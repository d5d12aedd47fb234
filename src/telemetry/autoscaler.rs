use std::sync::Arc;

use async_trait::async_trait;

use super::{non_empty_array, numeric, FetchError, PartialFields, TelemetrySource};
use crate::cluster_client::ClusterClient;
use crate::metrics::FieldValue;

pub const REPLICAS: &str = "replicas";

/// Number of live replicas of the function, via a Prometheus instant query.
pub struct AutoscalerQuery {
    client: Arc<dyn ClusterClient>,
    query: String,
}

impl AutoscalerQuery {
    pub fn new(client: Arc<dyn ClusterClient>, query: impl Into<String>) -> Self {
        Self {
            client,
            query: query.into(),
        }
    }

    /// Count ready pods whose name starts with the function name.
    pub fn replica_query(namespace: &str, function: &str) -> String {
        format!(
            r#"count(count by (pod) (kube_pod_status_ready{{namespace="{namespace}", pod=~"{function}-.*", condition="true"}} == 1))"#
        )
    }
}

#[async_trait]
impl TelemetrySource for AutoscalerQuery {
    fn name(&self) -> &'static str {
        "autoscaler"
    }

    async fn fetch(&self) -> Result<PartialFields, FetchError> {
        let doc = self.client.instant_query(&self.query).await?;

        let result = non_empty_array(&doc, "/data/result", "data.result")?;
        let sample = result[0]
            .pointer("/value/1")
            .ok_or_else(|| FetchError::Malformed("missing `data.result[0].value[1]`".into()))?;
        let replicas = numeric(sample, "data.result[0].value[1]")?;

        let mut fields = PartialFields::new();
        fields.insert(REPLICAS.into(), FieldValue::number(replicas));
        Ok(fields)
    }
}
