//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use faas_latency_probe::telemetry::{FetchError, PartialFields, TelemetrySource};
use faas_latency_probe::FieldValue;

/// Telemetry source with scripted behaviour.
pub enum Script {
    Fields(Vec<(String, FieldValue)>),
    Fail,
    Sleep(Duration),
}

pub struct ScriptedSource {
    pub name: &'static str,
    pub script: Script,
}

#[async_trait]
impl TelemetrySource for ScriptedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self) -> Result<PartialFields, FetchError> {
        match &self.script {
            Script::Fields(fields) => Ok(fields.iter().cloned().collect()),
            Script::Fail => Err(FetchError::Empty("items")),
            Script::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(PartialFields::new())
            }
        }
    }
}

pub fn source(name: &'static str, script: Script) -> Arc<dyn TelemetrySource> {
    Arc::new(ScriptedSource { name, script })
}

/// The usual three: autoscaler hangs, two nodes answer, invocation rate fails.
pub fn degraded_cluster() -> Vec<Arc<dyn TelemetrySource>> {
    vec![
        source("autoscaler", Script::Sleep(Duration::from_secs(30))),
        source(
            "nodes",
            Script::Fields(vec![
                ("node0CpuUsage".into(), FieldValue::Float(0.5)),
                ("node0MemoryUsage".into(), FieldValue::Int(1 << 20)),
                ("node1CpuUsage".into(), FieldValue::Float(0.75)),
                ("node1MemoryUsage".into(), FieldValue::Int(1 << 21)),
            ]),
        ),
        source("invocation-rate", Script::Fail),
    ]
}

/// Read a sink file back as (header, rows keyed by column).
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<HashMap<String, String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|row| {
            let row = row.unwrap();
            headers
                .iter()
                .cloned()
                .zip(row.iter().map(String::from))
                .collect()
        })
        .collect();
    (headers, rows)
}
