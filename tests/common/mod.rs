//! Shared helpers for the integration tests.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::{Request, ResponseTemplate};

/// Session ID handed out by [`mcp_reply`].
#[allow(dead_code)]
pub const HTTP_SESSION_ID: &str = "session-abc";

/// Path to the `mcp_test_server` helper binary.
#[allow(dead_code)]
pub fn test_server_exe() -> String {
    env!("CARGO_BIN_EXE_mcp_test_server").to_string()
}

/// Write `contents` to `file_name` inside a fresh temp dir.
#[allow(dead_code)]
pub fn temp_config_file(file_name: &str, contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join(file_name);
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// The JSON-RPC reply a minimal MCP server gives to `message`, or `None`
/// for notifications.
///
/// Exposes a single `echo` tool.
#[allow(dead_code)]
pub fn mcp_result(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let reply = match message["method"].as_str().unwrap_or("") {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "fake-router", "version": "1.0.0" }
            }
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [{
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": { "type": "object" }
                }]
            }
        }),
        "tools/call" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{
                    "type": "text",
                    "text": message["params"]["arguments"]["message"].as_str().unwrap_or("")
                }],
                "isError": false
            }
        }),
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        other => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {}", other) }
        }),
    };
    Some(reply)
}

/// wiremock responder speaking MCP over plain JSON bodies.
#[allow(dead_code)]
pub fn mcp_reply(request: &Request) -> ResponseTemplate {
    let message: Value = match serde_json::from_slice(&request.body) {
        Ok(v) => v,
        Err(_) => return ResponseTemplate::new(400),
    };
    match mcp_result(&message) {
        Some(reply) => ResponseTemplate::new(200)
            .insert_header("Mcp-Session-Id", HTTP_SESSION_ID)
            .set_body_json(reply),
        None => ResponseTemplate::new(202).insert_header("Mcp-Session-Id", HTTP_SESSION_ID),
    }
}

/// wiremock responder answering through an SSE body, preceded by a ping
/// and an unrelated notification event.
#[allow(dead_code)]
pub fn mcp_sse_reply(request: &Request) -> ResponseTemplate {
    let message: Value = match serde_json::from_slice(&request.body) {
        Ok(v) => v,
        Err(_) => return ResponseTemplate::new(400),
    };
    let Some(reply) = mcp_result(&message) else {
        return ResponseTemplate::new(202);
    };
    let body = format!(
        "event: ping\ndata: [PING]\n\n\
         event: message\ndata: {}\n\n\
         event: message\nid: {}\ndata: {}\n\n",
        json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": {} }),
        message["id"],
        reply
    );
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}
