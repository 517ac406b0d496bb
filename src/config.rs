// Bastion — Configuration
//
// Typed configuration for the gateway and tool executor, deserializable
// from a JSON file. Every field has a default so a missing config file
// means "run with defaults", and tests construct configs inline.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BastionError;

/// Default directory for Bastion data files (vault, key, audit log).
pub fn data_dir() -> PathBuf {
    let base = dirs_next::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("bastion")
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub executor: ExecutorConfig,
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, BastionError> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| BastionError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// Request gateway policy: authentication, origin allow-list, rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// When false, requests are forwarded without an API key check.
    pub auth_enabled: bool,
    /// Valid API keys. Comparison is constant-time.
    pub api_keys: Vec<String>,
    /// Header the API key is read from.
    pub api_key_header: String,
    /// When true, a present `Origin` header must match the allow-list.
    pub origin_check_enabled: bool,
    /// Allowed origins; a literal "*" entry allows any origin.
    pub allowed_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    /// Maximum requests per client within one window.
    pub max_requests: u32,
    /// Fixed-window length in milliseconds.
    pub window_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            api_keys: Vec::new(),
            api_key_header: "X-API-Key".to_string(),
            origin_check_enabled: false,
            allowed_origins: Vec::new(),
            rate_limit_enabled: true,
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

/// Tool executor limits and sandbox roots.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Hard ceiling on simultaneously running jobs; overflow is rejected,
    /// never queued.
    pub max_concurrent_jobs: usize,
    /// Base directories path parameters must resolve under.
    pub allowed_paths: Vec<PathBuf>,
    /// Per-tool execution timeout in milliseconds.
    pub tool_timeout_ms: u64,
    /// How long a terminal job stays queryable before eviction.
    pub job_retention_ms: u64,
    /// Command invoked by the `external_scan` tool.
    pub external_scanner_cmd: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            allowed_paths: Vec::new(),
            tool_timeout_ms: 30_000,
            job_retention_ms: 60_000,
            external_scanner_cmd: "trivy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Entries older than this are dropped by the retention sweep.
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.gateway.auth_enabled);
        assert_eq!(config.gateway.api_key_header, "X-API-Key");
        assert_eq!(config.gateway.max_requests, 100);
        assert_eq!(config.executor.max_concurrent_jobs, 4);
        assert_eq!(config.audit.retention_days, 90);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"gateway": {"auth_enabled": false, "max_requests": 5}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.gateway.auth_enabled);
        assert_eq!(config.gateway.max_requests, 5);
        assert_eq!(config.gateway.window_ms, 60_000);
        assert_eq!(config.executor.max_concurrent_jobs, 4);
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gatway": {}}"#).unwrap();

        assert!(Config::load(&path).is_err(), "Typos in config must not pass silently");
    }
}
