//! Stdio MCP peer used by the subprocess integration tests
//!
//! Reads newline-delimited JSON-RPC from stdin and answers on stdout, one
//! message per line. A banner line goes to stderr at start-up so tests can
//! check that stderr output never disturbs the protocol stream.
//!
//! # Methods
//!
//! - `initialize` -- protocol `2025-11-25`, `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- two pages: `echo` and `env`, then `sleep` and `fail`.
//! - `tools/call`:
//!   - `echo` returns `arguments.message`.
//!   - `env` returns the value of the variable `arguments.name`.
//!   - `sleep` answers after `arguments.ms` milliseconds on its own thread,
//!     so later requests can overtake it.
//!   - `fail` returns a result with `isError: true`.
//! - `ping` -- empty result.
//! - Anything else -- `-32601 Method not found`.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

type Output = Arc<Mutex<io::Stdout>>;

fn main() {
    eprintln!("mcp_test_server: ready");

    let out: Output = Arc::new(Mutex::new(io::stdout()));
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                write_line(&out, &error(&Value::Null, -32700, "Parse error"));
                continue;
            }
        };

        let method = request["method"].as_str().unwrap_or("").to_string();
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        if method.starts_with("notifications/") {
            continue;
        }

        if method == "tools/call" && request["params"]["name"] == "sleep" {
            let ms = request["params"]["arguments"]["ms"].as_u64().unwrap_or(0);
            let out = Arc::clone(&out);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(ms));
                write_line(&out, &text_result(&id, &format!("slept {}", ms), false));
            });
            continue;
        }

        let response = match method.as_str() {
            "initialize" => success(
                &id,
                json!({
                    "protocolVersion": "2025-11-25",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mcp-test-server", "version": "0.2.0" }
                }),
            ),
            "tools/list" => tools_page(&id, &request["params"]),
            "tools/call" => call(&id, &request["params"]),
            "ping" => success(&id, json!({})),
            other => error(&id, -32601, &format!("Method not found: {}", other)),
        };
        if !write_line(&out, &response) {
            break;
        }
    }
}

fn write_line(out: &Output, message: &Value) -> bool {
    let mut out = match out.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    writeln!(out, "{}", message).is_ok() && out.flush().is_ok()
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": { "type": "object" }
    })
}

fn tools_page(id: &Value, params: &Value) -> Value {
    match params.get("cursor").and_then(Value::as_str) {
        None => success(
            id,
            json!({
                "tools": [tool("echo", "Echoes input"), tool("env", "Reads an environment variable")],
                "nextCursor": "page-2"
            }),
        ),
        Some("page-2") => success(
            id,
            json!({
                "tools": [tool("sleep", "Answers late"), tool("fail", "Always reports an error")]
            }),
        ),
        Some(other) => error(id, -32602, &format!("Unknown cursor: {}", other)),
    }
}

fn call(id: &Value, params: &Value) -> Value {
    let arguments = &params["arguments"];
    match params["name"].as_str().unwrap_or("") {
        "echo" => text_result(id, arguments["message"].as_str().unwrap_or(""), false),
        "env" => {
            let name = arguments["name"].as_str().unwrap_or("");
            text_result(id, &std::env::var(name).unwrap_or_default(), false)
        }
        "fail" => text_result(id, "tool failed", true),
        other => error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    success(
        id,
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }),
    )
}

fn success(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
