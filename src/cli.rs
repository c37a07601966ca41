//! Command-line interface definition for mcp-router-use
//!
//! This module defines the CLI structure using clap's derive API:
//! listing configured servers, listing a server's tools and calling a tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mcp.json";

/// mcp-router-use - MCP client for routed and local tool servers
///
/// Connects to MCP servers described in a config file, either through an
/// MCP Router endpoint or directly over stdio / WebSocket.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-router-use")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long, env = "MCP_ROUTER_USE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// List configured servers and the transport each one uses
    Servers,

    /// Connect to a server and list its tools
    Tools {
        /// Server name from the config file
        server: String,
    },

    /// Invoke a tool and print the result as JSON
    Call {
        /// Server name from the config file
        server: String,

        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Request timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The config file to load.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_servers() {
        let cli = Cli::try_parse_from(["mcp-router-use", "servers"]).unwrap();
        assert_eq!(cli.command, Commands::Servers);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_tools() {
        let cli = Cli::try_parse_from(["mcp-router-use", "-v", "tools", "fs"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::Tools {
                server: "fs".to_string()
            }
        );
    }

    #[test]
    fn test_cli_parse_call_defaults() {
        let cli = Cli::try_parse_from(["mcp-router-use", "call", "fs", "read_file"]).unwrap();
        if let Commands::Call {
            server,
            tool,
            args,
            timeout,
        } = cli.command
        {
            assert_eq!(server, "fs");
            assert_eq!(tool, "read_file");
            assert_eq!(args, "{}");
            assert_eq!(timeout, None);
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_call_with_args_and_timeout() {
        let cli = Cli::try_parse_from([
            "mcp-router-use",
            "--config",
            "servers.yaml",
            "call",
            "fs",
            "read_file",
            "--args",
            r#"{"path":"/tmp/x"}"#,
            "--timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("servers.yaml"));
        if let Commands::Call { args, timeout, .. } = cli.command {
            assert_eq!(args, r#"{"path":"/tmp/x"}"#);
            assert_eq!(timeout, Some(5));
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["mcp-router-use"]).is_err());
        assert!(Cli::try_parse_from(["mcp-router-use", "tools"]).is_err());
    }
}
