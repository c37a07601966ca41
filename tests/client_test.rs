//! `McpClient` tests: config files on disk, routed sessions against a fake
//! router, and direct stdio sessions.

mod common;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer};

use common::{mcp_reply, temp_config_file, test_server_exe};
use mcp_router_use::config::{ENV_ROUTER_AUTH_TOKEN, ENV_ROUTER_URL};
use mcp_router_use::{McpClient, RouterUseError, SessionState, TransportKind};

#[tokio::test]
#[serial]
async fn test_routed_session_uses_router_mcp_endpoint() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("Authorization", "Bearer router-token"))
        .and(header("X-Team", "tools"))
        .respond_with(mcp_reply)
        .mount(&router)
        .await;

    let contents = json!({
        "mcpRouter": {
            "router_url": format!("{}/", router.uri()),
            "auth_token": "router-token",
            "headers": { "X-Team": "tools" }
        },
        "mcpServers": {
            "filesystem": { "command": "npx", "args": ["-y", "@mcp/filesystem"] }
        }
    });
    let (_dir, path) = temp_config_file("mcp.json", &contents.to_string());

    let mut client = McpClient::from_config_file(&path).unwrap();
    let session = client.create_session("filesystem", true).await.unwrap();
    assert_eq!(session.kind(), TransportKind::Http);
    assert_eq!(session.state(), SessionState::Initialized);

    let response = session
        .call_tool("echo", json!({ "message": "routed" }))
        .await
        .unwrap();
    assert_eq!(response.text(), "routed");

    client.close_all_sessions().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(client.active_sessions().is_empty());
}

#[tokio::test]
#[serial]
async fn test_router_url_from_environment() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("Authorization", "Bearer env-token"))
        .respond_with(mcp_reply)
        .mount(&router)
        .await;

    let (_dir, path) = temp_config_file(
        "mcp.yaml",
        "mcpServers:\n  search:\n    url: http://unused.invalid/mcp\n",
    );

    std::env::set_var(ENV_ROUTER_URL, router.uri());
    std::env::set_var(ENV_ROUTER_AUTH_TOKEN, "env-token");
    let loaded = McpClient::from_config_file(&path);
    std::env::remove_var(ENV_ROUTER_URL);
    std::env::remove_var(ENV_ROUTER_AUTH_TOKEN);

    let mut client = loaded.unwrap();
    let session = client.create_session("search", true).await.unwrap();
    assert!(session.tool("echo").is_some());
    client.close_session("search").await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_direct_sessions_for_every_server() {
    let exe = test_server_exe();
    let contents = json!({
        "mcpServers": {
            "one": { "command": exe, "args": [] },
            "two": { "command": exe, "args": [], "env": { "MODE": "second" } }
        }
    });
    let (_dir, path) = temp_config_file("mcp.json", &contents.to_string());

    let mut client = McpClient::from_config_file(&path).unwrap();
    let sessions = client.create_all_sessions(true).await.unwrap();
    assert_eq!(sessions.keys().collect::<Vec<_>>(), vec!["one", "two"]);

    let two = client.session("two").unwrap();
    let mode = two.call_tool("env", json!({ "name": "MODE" })).await.unwrap();
    assert_eq!(mode.text(), "second");

    client.close_session("one").await.unwrap();
    assert!(matches!(client.session("one"), Err(RouterUseError::Config(_))));
    assert_eq!(client.active_sessions().len(), 1);

    client.close_all_sessions().await.unwrap();
    assert_eq!(two.state(), SessionState::Closed);
}

#[test]
#[serial]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = McpClient::from_config_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, RouterUseError::Config(_)));
    assert!(err.to_string().contains("not found"));
}
