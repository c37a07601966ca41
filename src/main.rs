//! mcp-router-use - MCP client CLI
//!
#![doc = "mcp-router-use - MCP client CLI"]
#![doc = "Main entry point for the mcp-router-use command."]

use anyhow::{Context, Result};

use mcp_router_use::cli::{Cli, Commands};
use mcp_router_use::commands;
use mcp_router_use::config::ClientConfig;
use mcp_router_use::logging::{init_logging, DebugLevel, LoggingOptions};
use mcp_router_use::McpClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing; -v overrides the environment knob
    let mut logging = LoggingOptions::from_env();
    if cli.verbose {
        logging.level = DebugLevel::Verbose;
    }
    init_logging(&logging)?;

    // Load and validate configuration
    let config_path = cli.config_path();
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate()?;

    match cli.command {
        Commands::Servers => {
            commands::list_servers(&config);
            Ok(())
        }
        Commands::Tools { server } => {
            tracing::info!(server = %server, "listing tools");
            let mut client = McpClient::new(config);
            commands::list_tools(&mut client, &server)
                .await
                .with_context(|| format!("listing tools of `{}`", server))?;
            Ok(())
        }
        Commands::Call {
            server,
            tool,
            args,
            timeout,
        } => {
            tracing::info!(server = %server, tool = %tool, "calling tool");
            let mut client = McpClient::new(config);
            commands::call_tool(&mut client, &server, &tool, &args, timeout)
                .await
                .with_context(|| format!("calling `{}` on `{}`", tool, server))?;
            Ok(())
        }
    }
}
