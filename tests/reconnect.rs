//! Socket reconnect resilience: the runtime restarts independently of the
//! sidecar, and in-flight work survives through backoff plus transport
//! redelivery.

mod common;

use std::time::Duration;

use serde_json::json;

use asya_core::storage::MemoryStore;
use asya_core::transport::MemoryTransport;
use common::*;

#[tokio::test]
async fn runtime_restart_between_envelopes_is_invisible() {
    let transport = MemoryTransport::new();
    let store = MemoryStore::new();
    let _ends = spawn_end_actors(&transport, &store).await;
    let mut echo =
        spawn_actor(&transport, &store, ActorSpec::payload("echo", "handlers.echo")).await;

    publish_envelope(&transport, "echo", "R1", &["echo"], json!({"message": "before"})).await;
    wait_for_envelope(&store, RESULTS_BUCKET, "R1").await;

    echo.stop_runtime().await;
    echo.restart_runtime().await;

    publish_envelope(&transport, "echo", "R2", &["echo"], json!({"message": "after"})).await;
    let result = wait_for_envelope(&store, RESULTS_BUCKET, "R2").await;
    assert_eq!(result["payload"], json!({"echoed": "after"}));
}

#[tokio::test]
async fn sidecar_retries_until_runtime_comes_back() {
    let transport = MemoryTransport::new();
    let store = MemoryStore::new();
    let _ends = spawn_end_actors(&transport, &store).await;
    let mut echo =
        spawn_actor(&transport, &store, ActorSpec::payload("echo", "handlers.echo")).await;

    // Take the runtime down, then publish. The sidecar's connect attempts
    // fail and back off within the reconnect budget.
    echo.stop_runtime().await;
    publish_envelope(&transport, "echo", "R3", &["echo"], json!({"message": "waiting"})).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.find_envelope(RESULTS_BUCKET, "R3").is_none());

    // The runtime returns inside the budget; the hop completes normally.
    echo.restart_runtime().await;
    let result = wait_for_envelope(&store, RESULTS_BUCKET, "R3").await;
    assert_eq!(result["payload"], json!({"echoed": "waiting"}));
    assert_eq!(store.object_count(ERRORS_BUCKET), 0);
}

#[tokio::test]
async fn runtime_gone_past_budget_fails_the_hop_as_connection_error() {
    let transport = MemoryTransport::new();
    let store = MemoryStore::new();
    let _ends = spawn_end_actors(&transport, &store).await;
    let echo =
        spawn_actor(&transport, &store, ActorSpec::payload("echo", "handlers.echo")).await;

    // Runtime never comes back; the 5s harness budget runs out.
    echo.stop_runtime().await;
    publish_envelope(&transport, "echo", "R4", &["echo"], json!({"message": "lost"})).await;

    let result =
        wait_for_envelope_timeout(&store, ERRORS_BUCKET, "R4", Duration::from_secs(15)).await;
    assert_eq!(result["error"]["kind"], json!("connection_error"));
    assert_eq!(result["payload"], json!({"message": "lost"}));
}
