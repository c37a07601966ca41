/*!
Command handlers for the CLI

Each handler takes a loaded [`ClientConfig`] (or an [`McpClient`] built from
it), does its work and prints to stdout. Diagnostics go through `tracing`
to stderr, so stdout stays parseable.

- `servers` -- configured server names with their transport
- `tools`   -- connect, initialize and print the tool catalog
- `call`    -- invoke one tool and print the response as JSON
*/

use std::time::Duration;

use serde_json::Value;

use crate::client::McpClient;
use crate::config::ClientConfig;
use crate::error::{Result, RouterUseError};
use crate::mcp::factory::select_kind;
use crate::mcp::types::{CallToolResponse, McpTool};

/// Transport label shown for servers reached through the router.
pub const ROUTED_LABEL: &str = "router";

/// `(name, transport)` for every configured server, sorted by name.
///
/// Servers whose config matches no shape are labelled `invalid`.
pub fn describe_servers(config: &ClientConfig) -> Vec<(String, String)> {
    config
        .mcp_servers
        .iter()
        .map(|(name, server)| {
            let label = if config.mcp_router.is_some() {
                ROUTED_LABEL.to_string()
            } else {
                match select_kind(server) {
                    Ok(kind) => kind.to_string(),
                    Err(_) => "invalid".to_string(),
                }
            };
            (name.clone(), label)
        })
        .collect()
}

/// Print the configured servers.
pub fn list_servers(config: &ClientConfig) {
    let servers = describe_servers(config);
    if servers.is_empty() {
        println!("No MCP servers configured");
        return;
    }
    for (name, label) in servers {
        println!("{}\t{}", name, label);
    }
}

/// Connect to `server`, discover its tools and close the session again.
///
/// Tools come back sorted by name.
pub async fn fetch_tools(client: &mut McpClient, server: &str) -> Result<Vec<McpTool>> {
    let session = client.create_session(server, true).await?;
    let mut tools: Vec<McpTool> = session.tools().values().cloned().collect();
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    client.close_session(server).await?;
    Ok(tools)
}

/// Print the tool catalog of `server`.
pub async fn list_tools(client: &mut McpClient, server: &str) -> Result<()> {
    let tools = fetch_tools(client, server).await?;
    if tools.is_empty() {
        println!("Server '{}' exposes no tools", server);
        return Ok(());
    }
    for tool in tools {
        match tool.description {
            Some(description) => println!("{}\t{}", tool.name, description),
            None => println!("{}", tool.name),
        }
    }
    Ok(())
}

/// Parse the `--args` value; it must be a JSON object.
pub fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| RouterUseError::Config(format!("invalid --args JSON: {}", e)))?;
    if !value.is_object() {
        return Err(RouterUseError::Config(
            "--args must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Invoke `tool` on `server` and return the response.
pub async fn invoke_tool(
    client: &mut McpClient,
    server: &str,
    tool: &str,
    raw_args: &str,
    timeout_secs: Option<u64>,
) -> Result<CallToolResponse> {
    let arguments = parse_arguments(raw_args)?;
    let session = client.create_session(server, true).await?;
    let outcome = session
        .call_tool_with_timeout(tool, arguments, timeout_secs.map(Duration::from_secs))
        .await;
    client.close_session(server).await?;
    outcome
}

/// Invoke a tool and print the response as pretty JSON.
pub async fn call_tool(
    client: &mut McpClient,
    server: &str,
    tool: &str,
    raw_args: &str,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let response = invoke_tool(client, server, tool, raw_args, timeout_secs).await?;
    if response.is_error == Some(true) {
        tracing::warn!(server, tool, "tool reported an error");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
