use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::quantity::parse_quantity;
use super::{non_empty_array, numeric, FetchError, PartialFields, TelemetrySource};
use crate::cluster_client::ClusterClient;
use crate::metrics::FieldValue;

pub const FUNCTION_INVOCATION_RATE: &str = "functionInvocationRate";

/// Latest value of the function's invocation-rate external metric.
pub struct InvocationRateQuery {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    metric: String,
    selector: Option<String>,
}

impl InvocationRateQuery {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        metric: impl Into<String>,
        selector: Option<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            metric: metric.into(),
            selector,
        }
    }
}

#[async_trait]
impl TelemetrySource for InvocationRateQuery {
    fn name(&self) -> &'static str {
        "invocation-rate"
    }

    async fn fetch(&self) -> Result<PartialFields, FetchError> {
        let doc = self
            .client
            .external_metric(&self.namespace, &self.metric, self.selector.as_deref())
            .await?;

        let items = non_empty_array(&doc, "/items", "items")?;
        let raw = items[0]
            .get("value")
            .ok_or_else(|| FetchError::Malformed("missing `items[0].value`".into()))?;

        // External metrics carry quantities ("1500m"); tolerate plain numbers too.
        let rate = match raw {
            Value::String(s) => parse_quantity(s).ok_or_else(|| {
                FetchError::Malformed(format!("`items[0].value` is not a quantity: {s}"))
            })?,
            other => numeric(other, "items[0].value")?,
        };

        let mut fields = PartialFields::new();
        fields.insert(FUNCTION_INVOCATION_RATE.into(), FieldValue::Float(rate));
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::CannedCluster;
    use serde_json::json;

    fn source(external: Option<Value>) -> (Arc<CannedCluster>, InvocationRateQuery) {
        let cluster = Arc::new(CannedCluster {
            external,
            ..Default::default()
        });
        let source = InvocationRateQuery::new(
            cluster.clone(),
            "openfaas-fn",
            "gateway_function_invocation_per_second",
            Some("function_name=pycon".into()),
        );
        (cluster, source)
    }

    #[tokio::test]
    async fn reads_first_item_value() {
        let (cluster, source) = source(Some(json!({
            "kind": "ExternalMetricValueList",
            "items": [
                {"metricName": "gateway_function_invocation_per_second", "value": "1500m"},
                {"metricName": "gateway_function_invocation_per_second", "value": "9"}
            ]
        })));

        let fields = source.fetch().await.unwrap();
        assert_eq!(fields.get(FUNCTION_INVOCATION_RATE), Some(&FieldValue::Float(1.5)));

        let seen = cluster.seen_external.lock();
        assert_eq!(
            seen[0],
            (
                "openfaas-fn".to_string(),
                "gateway_function_invocation_per_second".to_string(),
                Some("function_name=pycon".to_string())
            )
        );
    }

    #[tokio::test]
    async fn numeric_value_is_accepted() {
        let (_, source) = source(Some(json!({"items": [{"value": 12}]})));
        let fields = source.fetch().await.unwrap();
        assert_eq!(fields[FUNCTION_INVOCATION_RATE], FieldValue::Float(12.0));
    }

    #[tokio::test]
    async fn empty_items_is_a_failure() {
        let (_, source) = source(Some(json!({"items": []})));
        assert!(matches!(source.fetch().await, Err(FetchError::Empty("items"))));
    }

    #[tokio::test]
    async fn unparsable_value_is_malformed() {
        let (_, source) = source(Some(json!({"items": [{"value": "fast"}]})));
        assert!(matches!(source.fetch().await, Err(FetchError::Malformed(_))));
    }
}
