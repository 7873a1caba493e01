//! End-to-end: a child that never answers within the configured timeout is
//! reported as a gateway timeout and its pooled entry is evicted immediately,
//! not left to the idle reaper.

mod common;

use serde_json::json;

#[tokio::test]
async fn unresponsive_stateful_child_times_out_and_is_evicted() {
    let server = common::spawn_bridge(
        json!({
            "slow": {
                "command": "/bin/sleep",
                "args": ["30"],
                "mode": "stateful",
                "idle_timeout": 300
            }
        }),
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/mcp/slow", server.base_url))
        .header("x-forwarded-for", "10.0.0.7")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    let body: serde_json::Value = response.json().await.expect("response was not json");
    assert_eq!(body["error"]["code"], -32000);

    let health: serde_json::Value = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .expect("health request failed")
        .json()
        .await
        .expect("health response was not json");
    assert_eq!(
        health["active_sessions"], 0,
        "the timed-out child must not remain pooled"
    );
}
