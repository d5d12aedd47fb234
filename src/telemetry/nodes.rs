use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::quantity::parse_quantity;
use super::{non_empty_array, FetchError, PartialFields, TelemetrySource};
use crate::cluster_client::ClusterClient;
use crate::metrics::FieldValue;

/// Per-node CPU (cores) and memory (bytes) from the metrics API.
///
/// Emits `<node>CpuUsage` and `<node>MemoryUsage` for every node listed, so
/// the field set follows whatever nodes exist at fetch time.
pub struct NodeResourceQuery {
    client: Arc<dyn ClusterClient>,
}

impl NodeResourceQuery {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

pub fn cpu_field(node: &str) -> String {
    format!("{node}CpuUsage")
}

pub fn memory_field(node: &str) -> String {
    format!("{node}MemoryUsage")
}

fn string_at<'a>(item: &'a Value, pointer: &str, index: usize) -> Result<&'a str, FetchError> {
    item.pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Malformed(format!("items[{index}] has no `{pointer}`")))
}

fn quantity_at(item: &Value, pointer: &str, index: usize) -> Result<f64, FetchError> {
    let raw = string_at(item, pointer, index)?;
    parse_quantity(raw).ok_or_else(|| {
        FetchError::Malformed(format!("items[{index}] `{pointer}` is not a quantity: {raw}"))
    })
}

#[async_trait]
impl TelemetrySource for NodeResourceQuery {
    fn name(&self) -> &'static str {
        "nodes"
    }

    async fn fetch(&self) -> Result<PartialFields, FetchError> {
        let doc = self.client.node_metrics().await?;
        let items = non_empty_array(&doc, "/items", "items")?;

        let mut fields = PartialFields::with_capacity(items.len() * 2);
        for (index, item) in items.iter().enumerate() {
            let name = string_at(item, "/metadata/name", index)?;
            let cpu = quantity_at(item, "/usage/cpu", index)?;
            let memory = quantity_at(item, "/usage/memory", index)?;

            fields.insert(cpu_field(name), FieldValue::Float(cpu));
            fields.insert(memory_field(name), FieldValue::number(memory));
        }
        Ok(fields)
    }
}
