// crates/flowcore-cli/src/serve_policy.rs
// ============================================================================
// Module: Serve Policy
// Description: Network exposure policy checks for the `serve` command.
// Purpose: Enforce safe-by-default bind behavior with explicit opt-in,
//          before the RPC transport ever binds a socket.
// Dependencies: flowcore-config, std
// ============================================================================

//! ## Overview
//! [`flowcore_config::RpcConfig::validate`] already rejects a non-loopback
//! HTTP bind with no `auth_token` set. This module adds the one check
//! config validation cannot make on its own: binding off loopback at all
//! requires an explicit opt-in, either `--allow-non-loopback` or the
//! [`ALLOW_NON_LOOPBACK_ENV`] environment variable, so a config file alone
//! can never expose the RPC surface to the network.

use std::env;
use std::net::SocketAddr;

use flowcore_config::FlowcoreConfig;
use flowcore_config::RpcTransport;

/// Environment variable enabling non-loopback server binds.
pub const ALLOW_NON_LOOPBACK_ENV: &str = "FLOWCORE_ALLOW_NON_LOOPBACK";

/// Outcome of resolving the `serve` command's bind policy.
///
/// # Invariants
/// - `bind_addr` is `None` for the stdio transport.
/// - `network_exposed` is `true` only when `bind_addr` is `Some` and not a
///   loopback address.
#[derive(Debug, Clone)]
pub struct BindOutcome {
    /// Selected transport.
    pub transport: RpcTransport,
    /// Bound socket address for the HTTP transport.
    pub bind_addr: Option<SocketAddr>,
    /// True when the server is bound to a non-loopback address.
    pub network_exposed: bool,
}

/// Failure resolving or enforcing the serve bind policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServePolicyError {
    /// The opt-in environment variable was set to an unrecognized value.
    #[error("{env} must be a boolean value (true/false/1/0), got '{value}'")]
    InvalidEnv {
        /// Environment variable name.
        env: &'static str,
        /// Raw environment value.
        value: String,
    },
    /// The configured bind address failed to parse.
    #[error("rpc.bind '{bind}' is not a valid socket address: {error}")]
    InvalidBind {
        /// Raw bind value.
        bind: String,
        /// Parse error message.
        error: String,
    },
    /// A non-loopback bind was requested without the opt-in.
    #[error("rpc.bind '{bind}' is not loopback; pass --allow-non-loopback or set {ALLOW_NON_LOOPBACK_ENV}=1")]
    NonLoopbackOptInRequired {
        /// Bind address.
        bind: String,
    },
}

/// Resolves the non-loopback opt-in flag from the CLI flag and environment.
///
/// # Errors
///
/// Returns [`ServePolicyError::InvalidEnv`] when [`ALLOW_NON_LOOPBACK_ENV`]
/// is set to a value that isn't recognizably boolean.
pub fn resolve_allow_non_loopback(flag: bool) -> Result<bool, ServePolicyError> {
    if flag {
        return Ok(true);
    }
    let Some(value) = env::var_os(ALLOW_NON_LOOPBACK_ENV) else {
        return Ok(false);
    };
    let value = value.to_string_lossy().to_string();
    parse_allow_non_loopback_value(&value)
}

/// Parses an environment value for the non-loopback opt-in.
fn parse_allow_non_loopback_value(value: &str) -> Result<bool, ServePolicyError> {
    parse_boolish(value)
        .ok_or_else(|| ServePolicyError::InvalidEnv { env: ALLOW_NON_LOOPBACK_ENV, value: value.to_string() })
}

/// Enforces local-only bind restrictions for `config.rpc`.
///
/// # Errors
///
/// Returns [`ServePolicyError`] when the configured bind is not loopback
/// and `allow_non_loopback` was not granted, or when the bind string
/// itself does not parse.
pub fn enforce_local_only(
    config: &FlowcoreConfig,
    allow_non_loopback: bool,
) -> Result<BindOutcome, ServePolicyError> {
    match config.rpc.transport {
        RpcTransport::Stdio => {
            Ok(BindOutcome { transport: RpcTransport::Stdio, bind_addr: None, network_exposed: false })
        }
        RpcTransport::Http => {
            let bind = config.rpc.bind.as_deref().unwrap_or_default();
            let addr: SocketAddr = bind
                .parse()
                .map_err(|err: std::net::AddrParseError| ServePolicyError::InvalidBind {
                    bind: bind.to_string(),
                    error: err.to_string(),
                })?;
            if addr.ip().is_loopback() {
                return Ok(BindOutcome {
                    transport: RpcTransport::Http,
                    bind_addr: Some(addr),
                    network_exposed: false,
                });
            }
            if !allow_non_loopback {
                return Err(ServePolicyError::NonLoopbackOptInRequired { bind: bind.to_string() });
            }
            Ok(BindOutcome {
                transport: RpcTransport::Http,
                bind_addr: Some(addr),
                network_exposed: true,
            })
        }
    }
}

/// Parses a bool-ish string (true/false/1/0/yes/no/on/off).
fn parse_boolish(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
