//! Config load validation tests for flowcore-config.
// crates/flowcore-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use flowcore_config::ConfigError;
use flowcore_config::FlowcoreConfig;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<FlowcoreConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(FlowcoreConfig::load(Some(path)), "config path exceeds max length")?;
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'a'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(FlowcoreConfig::load(Some(file.path())), "config file exceeds size limit")?;
    Ok(())
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(FlowcoreConfig::load(Some(file.path())), "config file must be utf-8")?;
    Ok(())
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"queue = [this is not valid toml").map_err(|err| err.to_string())?;
    match FlowcoreConfig::load(Some(file.path())) {
        Err(ConfigError::Parse(_)) => Ok(()),
        other => Err(format!("expected a parse error, got {other:?}")),
    }
}

#[test]
fn load_accepts_partial_override() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[queue]\nmax_parallel_runs = 8\n").map_err(|err| err.to_string())?;
    let config = FlowcoreConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.queue.max_parallel_runs != 8 {
        return Err("expected override to apply".to_string());
    }
    if config.queue.lease_ttl_ms != 15_000 {
        return Err("expected unspecified fields to keep their default".to_string());
    }
    Ok(())
}

#[test]
fn load_rejects_config_that_fails_semantic_validation() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[queue]\nmax_parallel_runs = 0\n").map_err(|err| err.to_string())?;
    assert_invalid(FlowcoreConfig::load(Some(file.path())), "queue.maxParallelRuns must be at least 1")?;
    Ok(())
}
