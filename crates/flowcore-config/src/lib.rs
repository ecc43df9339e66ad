// crates/flowcore-config/src/lib.rs
// ============================================================================
// Module: Flowcore Config
// Description: Canonical configuration model, load-time validation, and
//              schema/docs generation for the Flowcore host binary.
// Purpose: Give every Flowcore host a single, fail-closed config surface.
// Dependencies: flowcore-model, serde, serde_json, thiserror, toml
// ============================================================================

//! ## Overview
//! Flowcore reads one TOML file at startup (`flowcore.toml` by default).
//! [`FlowcoreConfig::load`] applies the same guard order the store crate
//! uses for untrusted input: path length, path component length, file
//! size, UTF-8, then parse, then [`FlowcoreConfig::validate`]. Nothing in
//! this crate mutates config after load; a changed file requires a
//! restart.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

const MAX_CONFIG_PATH_LEN: usize = 4_096;
const MAX_CONFIG_PATH_COMPONENT_LEN: usize = 255;
const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576;
const DEFAULT_CONFIG_FILE_NAME: &str = "flowcore.toml";

// ============================================================================
// SECTION: Error
// ============================================================================

/// Errors produced while loading or validating a [`FlowcoreConfig`].
///
/// # Invariants
/// - Variants are stable for programmatic handling by the CLI's exit-code
///   mapping.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config path string itself is implausibly long.
    #[error("config path exceeds max length")]
    PathTooLong,
    /// One path component exceeds the filesystem-portable limit.
    #[error("config path component too long")]
    PathComponentTooLong,
    /// The config file is larger than [`MAX_CONFIG_FILE_BYTES`].
    #[error("config file exceeds size limit")]
    FileTooLarge,
    /// The config file is not valid UTF-8.
    #[error("config file must be utf-8")]
    NotUtf8,
    /// Reading the config file failed.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The config parsed but failed a semantic validation rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Queue
// ============================================================================

/// Run Queue configuration (spec.md §6 Configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum runs the scheduler executes concurrently.
    pub max_parallel_runs: u32,
    /// Lease duration granted on claim, in milliseconds.
    pub lease_ttl_ms: u64,
    /// Interval between lease-renewal heartbeats, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_parallel_runs: 3, lease_ttl_ms: 15_000, heartbeat_interval_ms: 5_000 }
    }
}

// ============================================================================
// SECTION: Storm control
// ============================================================================

/// Global trigger storm-control defaults (spec.md §6 Configuration),
/// overridable per [`flowcore_model::core::trigger::TriggerSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StormControlConfig {
    /// Default cooldown between fires of the same trigger, in milliseconds.
    pub cooldown_ms: u64,
    /// Default cap on runs a single trigger may have queued at once.
    /// `None` means unlimited.
    pub max_queued: Option<u32>,
}

impl Default for StormControlConfig {
    fn default() -> Self {
        Self { cooldown_ms: 0, max_queued: None }
    }
}

// ============================================================================
// SECTION: Storage
// ============================================================================

/// On-disk storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { sqlite_path: "flowcore.db".to_string() }
    }
}

// ============================================================================
// SECTION: RPC
// ============================================================================

/// Transport the RPC surface listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcTransport {
    /// Duplex named-port transport over stdio; the default, used for an
    /// in-process host embedding (e.g. a browser extension's background
    /// worker talking to a child process).
    Stdio,
    /// HTTP/SSE transport for a standalone host process.
    Http,
}

/// RPC surface configuration (spec.md §4.10, §6 RPC channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Transport the RPC surface listens on.
    pub transport: RpcTransport,
    /// Bind address, required when `transport == Http`.
    pub bind: Option<String>,
    /// Shared-secret bearer token required on every request when the bind
    /// address is not loopback.
    pub auth_token: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { transport: RpcTransport::Stdio, bind: None, auth_token: None }
    }
}

impl RpcConfig {
    fn is_loopback_bind(&self) -> bool {
        self.bind
            .as_deref()
            .is_some_and(|bind| bind.starts_with("127.0.0.1") || bind.starts_with("[::1]") || bind.starts_with("localhost"))
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Structured-logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level emitted (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

// ============================================================================
// SECTION: Root config
// ============================================================================

/// Root Flowcore host configuration.
///
/// # Invariants
/// - A value returned by [`FlowcoreConfig::load`] has already passed
///   [`FlowcoreConfig::validate`]; callers never need to call it again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowcoreConfig {
    /// Run Queue configuration.
    pub queue: QueueConfig,
    /// Trigger storm-control defaults.
    pub storm_control: StormControlConfig,
    /// On-disk storage configuration.
    pub storage: StorageConfig,
    /// RPC surface configuration.
    pub rpc: RpcConfig,
    /// Structured-logging configuration.
    pub logging: LoggingConfig,
}

impl FlowcoreConfig {
    /// Loads configuration from `path`, or [`DEFAULT_CONFIG_FILE_NAME`] in
    /// the current directory when `path` is `None` and that file exists;
    /// otherwise returns built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path is implausible, the file is
    /// too large or not UTF-8, the TOML fails to parse, or the parsed
    /// config fails [`FlowcoreConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
                if default_path.exists() {
                    default_path.to_path_buf()
                } else {
                    let config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
            }
        };

        let path_str = resolved.as_os_str().to_string_lossy();
        if path_str.len() > MAX_CONFIG_PATH_LEN {
            return Err(ConfigError::PathTooLong);
        }
        for component in resolved.components() {
            if component.as_os_str().len() > MAX_CONFIG_PATH_COMPONENT_LEN {
                return Err(ConfigError::PathComponentTooLong);
            }
        }

        let metadata = fs::metadata(&resolved)?;
        if metadata.len() > MAX_CONFIG_FILE_BYTES {
            return Err(ConfigError::FileTooLarge);
        }

        let bytes = fs::read(&resolved)?;
        let text = String::from_utf8(bytes).map_err(|_| ConfigError::NotUtf8)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates semantic rules that span more than one field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_parallel_runs == 0 {
            return Err(ConfigError::Invalid("queue.maxParallelRuns must be at least 1".to_string()));
        }
        if self.queue.lease_ttl_ms <= self.queue.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(
                "queue.leaseTtlMs must exceed queue.heartbeatIntervalMs".to_string(),
            ));
        }
        match self.rpc.transport {
            RpcTransport::Http if self.rpc.bind.is_none() => {
                return Err(ConfigError::Invalid("http transport requires rpc.bind".to_string()));
            }
            RpcTransport::Http if !self.rpc.is_loopback_bind() && self.rpc.auth_token.is_none() => {
                return Err(ConfigError::Invalid(
                    "non-loopback rpc.bind requires rpc.authToken".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Schema / docs generation
// ============================================================================

/// Returns the JSON Schema (draft 2020-12) describing [`FlowcoreConfig`].
///
/// The schema intentionally stays hand-authored and narrow rather than
/// derived, so it can encode the cross-field rules [`FlowcoreConfig::validate`]
/// enforces as descriptions rather than `$ref` plumbing.
#[must_use]
pub fn config_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "FlowcoreConfig",
        "type": "object",
        "properties": {
            "queue": {
                "type": "object",
                "properties": {
                    "max_parallel_runs": { "type": "integer", "minimum": 1 },
                    "lease_ttl_ms": { "type": "integer", "minimum": 1 },
                    "heartbeat_interval_ms": { "type": "integer", "minimum": 1 }
                }
            },
            "storm_control": {
                "type": "object",
                "properties": {
                    "cooldown_ms": { "type": "integer", "minimum": 0 },
                    "max_queued": { "type": ["integer", "null"], "minimum": 1 }
                }
            },
            "storage": {
                "type": "object",
                "properties": {
                    "sqlite_path": { "type": "string" }
                }
            },
            "rpc": {
                "type": "object",
                "properties": {
                    "transport": { "enum": ["stdio", "http"] },
                    "bind": { "type": ["string", "null"] },
                    "auth_token": { "type": ["string", "null"] }
                }
            },
            "logging": {
                "type": "object",
                "properties": {
                    "level": { "type": "string" },
                    "json": { "type": "boolean" }
                }
            }
        }
    })
}

/// Returns an annotated `flowcore.toml` carrying every default value.
#[must_use]
pub fn config_toml_example() -> String {
    let config = FlowcoreConfig::default();
    toml::to_string_pretty(&config).unwrap_or_default()
}

/// Renders human-readable documentation for every recognized config option.
///
/// # Errors
///
/// Returns [`ConfigError`] if the example config cannot be serialized.
pub fn config_docs_markdown() -> Result<String, ConfigError> {
    let example = config_toml_example();
    Ok(format!(
        "# flowcore.toml Configuration\n\n\
         Flowcore reads `{DEFAULT_CONFIG_FILE_NAME}` from the working directory \
         unless an explicit path is passed to the host binary.\n\n\
         ## Defaults\n\n```toml\n{example}```\n"
    ))
}
