//! Gateway HTTP surface tests: tool calls, status reads, progress ingest,
//! SSE streaming, and the full gateway -> actors -> bucket round trip.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use asya_core::gateway::{router, AppState, EnvelopeService, ProgressRegistry};
use asya_core::progress::HttpProgressSink;
use asya_core::storage::MemoryStore;
use asya_core::transport::MemoryTransport;
use asya_core::types::{GatewayConfig, ToolRoute};
use common::*;

struct TestGateway {
    base_url: String,
}

async fn start_gateway(transport: &MemoryTransport, tools: Vec<ToolRoute>) -> TestGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let config = GatewayConfig {
        public_url: base_url.clone(),
        tools,
        ..GatewayConfig::default()
    };
    let registry = Arc::new(ProgressRegistry::new(
        Duration::from_secs(60),
        Duration::from_secs(600),
    ));
    let service = EnvelopeService::new(config, Arc::new(transport.clone()), registry);
    let state = Arc::new(AppState { service });

    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });

    TestGateway { base_url }
}

fn echo_tool() -> Vec<ToolRoute> {
    vec![ToolRoute {
        name: "echo".to_string(),
        description: "echo a message".to_string(),
        actors: vec!["echo".to_string()],
    }]
}

#[tokio::test]
async fn health_endpoint_responds() {
    let gateway = start_gateway(&MemoryTransport::new(), vec![]).await;
    let response = reqwest::get(format!("{}/health", gateway.base_url)).await.unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn tool_call_creates_envelope_and_returns_uris() {
    let transport = MemoryTransport::new();
    let gateway = start_gateway(&transport, echo_tool()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/tools/call", gateway.base_url))
        .json(&json!({"name": "echo", "arguments": {"message": "hi"}}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();

    let envelope_id = body["envelope_id"].as_str().unwrap();
    assert!(body["status_url"].as_str().unwrap().ends_with(&format!("/envelopes/{}", envelope_id)));
    assert!(body["stream_url"].as_str().unwrap().ends_with("/stream"));

    // Envelope landed on the first actor's queue with current=0.
    let published = transport.try_pop(&queue_for("echo")).unwrap();
    let envelope: Value = serde_json::from_slice(&published).unwrap();
    assert_eq!(envelope["id"].as_str().unwrap(), envelope_id);
    assert_eq!(envelope["route"], json!({"actors": ["echo"], "current": 0}));
    assert_eq!(envelope["payload"], json!({"message": "hi"}));

    // Status reads pending until a sidecar reports.
    let status: Value = client
        .get(format!("{}/envelopes/{}", gateway.base_url, envelope_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], json!("pending"));
}

#[tokio::test]
async fn unknown_tool_is_404() {
    let gateway = start_gateway(&MemoryTransport::new(), echo_tool()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/tools/call", gateway.base_url))
        .json(&json!({"name": "missing", "arguments": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unobserved_envelope_reads_unknown() {
    let gateway = start_gateway(&MemoryTransport::new(), vec![]).await;
    let status: Value = reqwest::get(format!("{}/envelopes/no-such-id", gateway.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], json!("unknown"));
}

#[tokio::test]
async fn progress_ingest_updates_status() {
    let gateway = start_gateway(&MemoryTransport::new(), vec![]).await;
    let client = reqwest::Client::new();

    let update = json!({
        "envelope_id": "P1",
        "current_actor_name": "echo",
        "index": 1,
        "route_len": 2,
        "progress_percent": 50,
        "status": "running",
        "message": "processing",
        "timestamp": chrono::Utc::now(),
    });
    let response = client
        .post(format!("{}/progress", gateway.base_url))
        .json(&update)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let status: Value = client
        .get(format!("{}/envelopes/P1", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], json!("running"));
    assert_eq!(status["progress_percent"], json!(50));
    assert_eq!(status["current_actor_name"], json!("echo"));
}

/// Collect SSE body chunks until a terminal event or the deadline.
async fn collect_sse(url: &str, deadline: Duration) -> String {
    let mut response = reqwest::Client::new().get(url).send().await.unwrap();
    assert!(response.status().is_success());
    let mut collected = String::new();
    let result = tokio::time::timeout(deadline, async {
        while let Some(chunk) = response.chunk().await.unwrap() {
            collected.push_str(&String::from_utf8_lossy(&chunk));
            if collected.contains("succeeded") || collected.contains("failed") {
                break;
            }
        }
        collected
    })
    .await;
    result.unwrap_or_default()
}

#[tokio::test]
async fn sse_stream_terminates_on_terminal_state() {
    let gateway = start_gateway(&MemoryTransport::new(), vec![]).await;
    let client = reqwest::Client::new();

    let stream_url = format!("{}/envelopes/S1/stream", gateway.base_url);
    let stream_task = tokio::spawn(async move {
        collect_sse(&stream_url, Duration::from_secs(10)).await
    });
    // Give the subscriber a moment to attach.
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (status, index) in [("running", 0usize), ("running", 1), ("succeeded", 1)] {
        let update = json!({
            "envelope_id": "S1",
            "current_actor_name": "echo",
            "index": index,
            "route_len": 1,
            "progress_percent": 100 * index.min(1),
            "status": status,
            "timestamp": chrono::Utc::now(),
        });
        client
            .post(format!("{}/progress", gateway.base_url))
            .json(&update)
            .send()
            .await
            .unwrap();
    }

    let body = stream_task.await.unwrap();
    assert!(body.contains("event: update"), "missing update events: {}", body);
    assert!(body.contains("\"status\":\"running\""));
    assert!(body.contains("\"status\":\"succeeded\""));
}

#[tokio::test]
async fn gateway_to_bucket_round_trip_with_live_progress() {
    let transport = MemoryTransport::new();
    let store = MemoryStore::new();
    let gateway = start_gateway(&transport, echo_tool()).await;

    // Real actors reporting progress to the gateway over HTTP.
    let sink = Arc::new(HttpProgressSink::new(format!("{}/progress", gateway.base_url)));
    let _happy = spawn_actor(
        &transport,
        &store,
        ActorSpec::end_actor("happy-end", asya_core::endactor::HAPPY_END_DESCRIPTOR)
            .with_sink(sink.clone()),
    )
    .await;
    let _error = spawn_actor(
        &transport,
        &store,
        ActorSpec::end_actor("error-end", asya_core::endactor::ERROR_END_DESCRIPTOR)
            .with_sink(sink.clone()),
    )
    .await;
    let _echo = spawn_actor(
        &transport,
        &store,
        ActorSpec::payload("echo", "handlers.echo").with_sink(sink),
    )
    .await;

    let client = reqwest::Client::new();
    let created: Value = client
        .post(format!("{}/tools/call", gateway.base_url))
        .json(&json!({"name": "echo", "arguments": {"message": "round trip"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let envelope_id = created["envelope_id"].as_str().unwrap().to_string();

    // The envelope reaches the results bucket.
    let result = wait_for_envelope(&store, RESULTS_BUCKET, &envelope_id).await;
    assert_eq!(result["payload"], json!({"echoed": "round trip"}));

    // And the gateway converges on a succeeded status.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status: Value = client
            .get(format!("{}/envelopes/{}", gateway.base_url, envelope_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["status"] == json!("succeeded") {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "status never reached succeeded: {}",
            status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
