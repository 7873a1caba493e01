//! End-to-end: a stateful server tag is pinned to a session key derived
//! from the client IP, reusing the same child across requests and starting
//! fresh for a different session key.

mod common;

use serde_json::json;

/// Counts lines read on stdin and echoes the count back as `result.n`,
/// never exiting between requests.
const COUNTER_SCRIPT: &str = "i=0; while read -r _line; do i=$((i+1)); printf '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"n\":%d}}\\n' \"$i\"; done";

#[tokio::test]
async fn same_session_key_reuses_the_child_and_different_key_starts_fresh() {
    let server = common::spawn_bridge(
        json!({
            "counter": {
                "command": "/bin/sh",
                "args": ["-c", COUNTER_SCRIPT],
                "mode": "stateful",
                "idle_timeout": 300
            }
        }),
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tick", "params": {}});

    let mut observed = Vec::new();
    for _ in 0..3 {
        let response = client
            .post(format!("{}/mcp/counter", server.base_url))
            .header("x-forwarded-for", "10.0.0.5")
            .json(&request)
            .send()
            .await
            .expect("request failed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.expect("response was not json");
        observed.push(body["result"]["n"].as_i64().expect("missing result.n"));
    }
    assert_eq!(observed, vec![1, 2, 3]);

    let response = client
        .post(format!("{}/mcp/counter", server.base_url))
        .header("x-forwarded-for", "10.0.0.9")
        .json(&request)
        .send()
        .await
        .expect("request failed");
    let body: serde_json::Value = response.json().await.expect("response was not json");
    assert_eq!(body["result"]["n"], 1, "a different session key must get its own child");
}
