//! Logging setup for mcp-router-use
//!
//! Verbosity is a tri-level knob read from `MCP_ROUTER_USE_DEBUG`:
//!
//! | value | level     | filter                 |
//! |-------|-----------|------------------------|
//! | `0`   | silent    | `off`                  |
//! | `1`   | info      | `mcp_router_use=info`  |
//! | `2`   | verbose   | `mcp_router_use=debug` |
//!
//! An explicit `RUST_LOG` always wins. Output goes to stderr so command
//! output on stdout stays machine-readable; `MCP_ROUTER_USE_LOG_FORMAT=json`
//! switches to JSON lines.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, RouterUseError};

/// Environment variable holding the debug level.
pub const ENV_DEBUG: &str = "MCP_ROUTER_USE_DEBUG";
/// Environment variable selecting the output format (`json` or `text`).
pub const ENV_LOG_FORMAT: &str = "MCP_ROUTER_USE_LOG_FORMAT";

/// Tri-level logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    /// No output.
    Silent,
    /// Lifecycle events and warnings.
    #[default]
    Info,
    /// Every request and response.
    Verbose,
}

impl DebugLevel {
    /// Read [`ENV_DEBUG`]; unset or unparsable values fall back to `Info`.
    pub fn from_env() -> Self {
        match std::env::var(ENV_DEBUG) {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                eprintln!("ignoring invalid {}={:?}", ENV_DEBUG, raw);
                DebugLevel::Info
            }),
            Err(_) => DebugLevel::Info,
        }
    }

    /// The `EnvFilter` directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            DebugLevel::Silent => "off",
            DebugLevel::Info => "mcp_router_use=info",
            DebugLevel::Verbose => "mcp_router_use=debug",
        }
    }
}

impl FromStr for DebugLevel {
    type Err = RouterUseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "silent" | "off" => Ok(DebugLevel::Silent),
            "1" | "info" => Ok(DebugLevel::Info),
            "2" | "verbose" | "debug" => Ok(DebugLevel::Verbose),
            other => Err(RouterUseError::Config(format!(
                "invalid debug level `{}`; expected 0, 1 or 2",
                other
            ))),
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugLevel::Silent => "silent",
            DebugLevel::Info => "info",
            DebugLevel::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Options for [`init_logging`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Verbosity.
    pub level: DebugLevel,
    /// Emit JSON lines instead of human-readable text.
    pub json_format: bool,
}

impl LoggingOptions {
    /// Build options from [`ENV_DEBUG`] and [`ENV_LOG_FORMAT`].
    pub fn from_env() -> Self {
        let json_format = std::env::var(ENV_LOG_FORMAT)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Self {
            level: DebugLevel::from_env(),
            json_format,
        }
    }
}

/// Filter for `level`, unless `RUST_LOG` is set.
pub fn env_filter(level: DebugLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`RouterUseError::Config`] if a global subscriber is already set.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(options.level));

    let installed = if options.json_format {
        registry
            .with(tfmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tfmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| RouterUseError::Config(format!("failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_levels() {
        assert_eq!("0".parse::<DebugLevel>().unwrap(), DebugLevel::Silent);
        assert_eq!("1".parse::<DebugLevel>().unwrap(), DebugLevel::Info);
        assert_eq!(" 2 ".parse::<DebugLevel>().unwrap(), DebugLevel::Verbose);
        assert_eq!("Verbose".parse::<DebugLevel>().unwrap(), DebugLevel::Verbose);
        assert!("3".parse::<DebugLevel>().is_err());
    }

    #[test]
    fn test_directives() {
        assert_eq!(DebugLevel::Silent.directive(), "off");
        assert_eq!(DebugLevel::Info.directive(), "mcp_router_use=info");
        assert_eq!(DebugLevel::Verbose.directive(), "mcp_router_use=debug");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::remove_var(ENV_DEBUG);
        assert_eq!(DebugLevel::from_env(), DebugLevel::Info);

        std::env::set_var(ENV_DEBUG, "2");
        assert_eq!(DebugLevel::from_env(), DebugLevel::Verbose);

        std::env::set_var(ENV_DEBUG, "garbage");
        assert_eq!(DebugLevel::from_env(), DebugLevel::Info);
        std::env::remove_var(ENV_DEBUG);
    }

    #[test]
    #[serial]
    fn test_logging_options_from_env() {
        std::env::set_var(ENV_DEBUG, "0");
        std::env::set_var(ENV_LOG_FORMAT, "JSON");
        let options = LoggingOptions::from_env();
        std::env::remove_var(ENV_DEBUG);
        std::env::remove_var(ENV_LOG_FORMAT);

        assert_eq!(options.level, DebugLevel::Silent);
        assert!(options.json_format);
    }
}
