//! OpenAPI synthesizer: a thin transform of a `tools/list` JSON-RPC
//! response into an OpenAPI 3.0 document with one
//! `POST /mcpo/{tag}/{tool_name}` path per tool.
//!
//! The router's `GET /mcpo/{tag}/openapi.json` endpoint has nothing else
//! to serve, so this lives here. Always re-derives from a fresh
//! `tools/list` call — no caching.

use serde_json::{json, Value};

const USAGE_GUIDE_TOOL_NAME: &str = "📖_usage_instructions";

/// Builds an OpenAPI 3.0 document for `tag` from a `tools/list` response.
/// Tools are expected at `response.result.tools`, each `{name, description,
/// inputSchema}`. The synthetic usage-guide tool is skipped.
pub fn synthesize(tag: &str, base_url: &str, tools_list_response: &Value) -> Value {
    let tools = tools_list_response
        .get("result")
        .and_then(|r| r.get("tools"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut paths = serde_json::Map::new();
    for tool in &tools {
        let Some(name) = tool.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name == USAGE_GUIDE_TOOL_NAME {
            continue;
        }

        let description = tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let schema = tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"}));

        paths.insert(
            format!("/mcpo/{tag}/{name}"),
            json!({
                "post": {
                    "summary": description,
                    "operationId": name,
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": schema } }
                    },
                    "responses": {
                        "200": { "description": "Successful response" }
                    }
                }
            }),
        );
    }

    json!({
        "openapi": "3.0.0",
        "info": { "title": format!("{tag} MCP Tools"), "version": "1.0.0" },
        "servers": [{ "url": base_url }],
        "paths": Value::Object(paths)
    })
}
