//! End-to-end runs of the in-process hooks: start → complete → CSV.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use faas_latency_probe::{Correlator, FieldValue, Instrumentation, ResponseEnvelope, SinkWriter};

mod common;
use common::{read_csv, source, Script};

fn parse(row: &HashMap<String, String>, column: &str) -> f64 {
    row[column].parse().unwrap()
}

#[tokio::test]
async fn degraded_cluster_still_produces_full_request_rows() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkWriter::open(dir.path(), "result", 16).unwrap();
    let path = sink.path().to_path_buf();
    let timeout = Duration::from_millis(150);
    let hooks = Instrumentation::new(
        Correlator::new(common::degraded_cluster(), timeout),
        sink.handle(),
    );

    let ctx = hooks.on_request_start();
    let started = Instant::now();
    let response = ResponseEnvelope::new(
        200,
        format!(
            r#"{{"metrics":{{"executionStartTime":{},"executionLatency":0.01,"containerId":"abc"}}}}"#,
            ctx.request_time + 0.002
        ),
    );
    let emitted = hooks.on_request_complete(&ctx, &response).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(emitted.request_id, ctx.request_id);

    sink.close().await.unwrap();
    let (headers, rows) = read_csv(&path);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];

    for column in ["node0CpuUsage", "node0MemoryUsage", "node1CpuUsage", "node1MemoryUsage"] {
        assert!(headers.iter().any(|h| h == column), "missing column {column}");
    }
    assert!(!headers.iter().any(|h| h == "replicas"));
    assert!(!headers.iter().any(|h| h == "functionInvocationRate"));

    assert_eq!(row["requestId"], ctx.request_id.to_string());
    assert_eq!(row["statusCode"], "200");
    assert_eq!(row["containerId"], "abc");

    let request_time = parse(row, "requestTime");
    let response_time = parse(row, "responseTime");
    let latency = parse(row, "requestResponseLatency");
    assert!((response_time - request_time - latency).abs() < 1e-6);
    assert!((parse(row, "schedulingLatency") - 0.002).abs() < 1e-6);
}

#[tokio::test]
async fn varying_field_sets_round_trip_by_request_id() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkWriter::open_at(dir.path().join("run.csv"), 4).unwrap();
    let path = sink.path().to_path_buf();
    let timeout = Duration::from_millis(100);

    let mut expected: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for i in 0..6 {
        // every request sees a different cluster
        let fields: Vec<(String, FieldValue)> = (0..=i)
            .map(|n| (format!("node{n}CpuUsage"), FieldValue::Int(n * 10 + i)))
            .collect();
        let sources = if i % 2 == 0 {
            vec![source("nodes", Script::Fields(fields.clone()))]
        } else {
            vec![
                source("nodes", Script::Fields(fields.clone())),
                source("autoscaler", Script::Fail),
            ]
        };
        let hooks = Instrumentation::new(Correlator::new(sources, timeout), sink.handle());

        let ctx = hooks.on_request_start();
        let status = if i == 3 { 500 } else { 200 };
        let body = format!(r#"{{"metrics":{{"step{i}":{i}}}}}"#);
        hooks
            .on_request_complete(&ctx, &ResponseEnvelope::new(status, body))
            .await
            .unwrap();

        let mut cells: Vec<(String, String)> =
            fields.iter().map(|(k, v)| (k.clone(), v.to_cell())).collect();
        if status == 200 {
            cells.push((format!("step{i}"), i.to_string()));
        }
        cells.push(("statusCode".into(), status.to_string()));
        expected.insert(ctx.request_id.to_string(), cells);
    }

    assert_eq!(sink.close().await.unwrap(), 6);
    let (headers, rows) = read_csv(&path);
    assert_eq!(rows.len(), 6);
    assert_eq!(&headers[..5], [
        "requestId",
        "requestTime",
        "responseTime",
        "requestResponseLatency",
        "statusCode"
    ]);
    assert!(!headers.iter().any(|h| h == "step3"), "failed response leaked body metrics");

    for row in &rows {
        let cells = &expected[&row["requestId"]];
        for (column, value) in cells {
            assert_eq!(&row[column], value, "column {column}");
        }
        let written: HashSet<&String> = cells.iter().map(|(k, _)| k).collect();
        for column in headers.iter().filter(|h| h.starts_with("node")) {
            if !written.contains(column) {
                assert_eq!(row[column], "", "column {column} should be empty");
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_completions_do_not_bleed_into_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkWriter::open_at(dir.path().join("run.csv"), 8).unwrap();
    let path = sink.path().to_path_buf();
    let hooks = Arc::new(Instrumentation::new(
        Correlator::new(
            vec![source(
                "nodes",
                Script::Fields(vec![("node0CpuUsage".into(), FieldValue::Float(0.1))]),
            )],
            Duration::from_millis(200),
        ),
        sink.handle(),
    ));

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let hooks = hooks.clone();
            tokio::spawn(async move {
                let ctx = hooks.on_request_start();
                tokio::time::sleep(Duration::from_millis((i % 7) * 3)).await;
                let body = format!(r#"{{"metrics":{{"worker":{i},"tag":"w{i}"}}}}"#);
                hooks
                    .on_request_complete(&ctx, &ResponseEnvelope::new(200, body))
                    .await
                    .unwrap();
                (ctx.request_id.to_string(), i)
            })
        })
        .collect();

    let mut sent = HashMap::new();
    for task in tasks {
        let (id, i) = task.await.unwrap();
        sent.insert(id, i);
    }
    drop(hooks);
    assert_eq!(sink.close().await.unwrap(), 64);

    let (_, rows) = read_csv(&path);
    assert_eq!(rows.len(), 64);
    let mut seen = HashSet::new();
    for row in &rows {
        let i = sent[&row["requestId"]];
        assert_eq!(row["worker"], i.to_string());
        assert_eq!(row["tag"], format!("w{i}"));
        assert!(seen.insert(row["requestId"].clone()), "duplicate row");
    }
}

#[tokio::test]
async fn unmatched_completion_emits_what_it_can() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkWriter::open_at(dir.path().join("run.csv"), 4).unwrap();
    let path = sink.path().to_path_buf();
    let hooks = Instrumentation::new(
        Correlator::new(
            vec![source("autoscaler", Script::Fields(vec![("replicas".into(), FieldValue::Int(2))]))],
            Duration::from_millis(100),
        ),
        sink.handle(),
    );

    let emitted = hooks
        .on_unmatched_complete(None, &ResponseEnvelope::new(200, r#"{"metrics":{"executionStartTime":1.0}}"#))
        .await
        .unwrap();

    sink.close().await.unwrap();
    let (headers, rows) = read_csv(&path);
    assert_eq!(rows[0]["requestId"], emitted.request_id.to_string());
    assert_eq!(rows[0]["replicas"], "2");
    assert_eq!(rows[0]["statusCode"], "200");
    assert!(!headers.iter().any(|h| h == "requestTime" || h == "schedulingLatency"));
}
