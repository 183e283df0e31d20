// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine run configuration loading, validation, and merging.
//!
//! This crate provides [`EngineConfig`] — the engine's own run settings
//! (concurrency limits, broadcast mode, trace redaction, checkpoint path,
//! auto-approval) — together with helpers for loading from a TOML file,
//! applying `AIS_*` environment overrides, and layering CLI flags on top
//! (CLI always wins). This is distinct from, and has no bearing on, the
//! Protocol/Pack/Workflow documents the engine compiles and runs.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent a run but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No checkpoint path was configured; a run cannot be resumed.
    NoCheckpointPath,
    /// A per-chain concurrency override is unusually high.
    HighChainConcurrency {
        /// The chain id the override applies to.
        chain: String,
        /// The configured limit.
        limit: u32,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NoCheckpointPath => {
                write!(f, "no checkpoint_path configured: run cannot be resumed")
            }
            ConfigWarning::HighChainConcurrency { chain, limit } => {
                write!(f, "chain '{chain}' has a high concurrency limit ({limit})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Redaction applied to field values in JSONL trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// No redaction; raw field values appear in trace events.
    Off,
    /// Audit-grade: redact only values tagged as secrets.
    Audit,
    /// The engine's default redaction policy.
    #[default]
    Default,
}

/// Per-chain read/write concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ChainConcurrency {
    /// Maximum concurrent read-class nodes for this chain.
    pub max_read_concurrency: u32,
    /// Maximum concurrent write-class nodes for this chain.
    pub max_write_concurrency: u32,
}

impl Default for ChainConcurrency {
    fn default() -> Self {
        Self {
            max_read_concurrency: 8,
            max_write_concurrency: 1,
        }
    }
}

/// Top-level run configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EngineConfig {
    /// Global concurrency limit across all in-flight nodes.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Per-chain concurrency overrides, keyed by CAIP-2 chain id.
    #[serde(default)]
    pub chain_concurrency: BTreeMap<String, ChainConcurrency>,

    /// Whether writes are actually broadcast (`false` performs a dry run).
    #[serde(default)]
    pub broadcast: bool,

    /// Redaction mode applied to JSONL trace output.
    #[serde(default)]
    pub trace_redact: RedactionMode,

    /// Path to the checkpoint file used for save/resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<String>,

    /// Auto-approve every pending approval (`--yes`).
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_max_concurrency() -> u32 {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            chain_concurrency: BTreeMap::new(),
            broadcast: false,
            trace_redact: RedactionMode::default(),
            checkpoint_path: None,
            auto_approve: false,
        }
    }
}

/// CLI-flag overrides layered on top of a loaded [`EngineConfig`]; any
/// field left `None` leaves the underlying config value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--concurrency`.
    pub max_concurrency: Option<u32>,
    /// `--broadcast`.
    pub broadcast: Option<bool>,
    /// `--trace-redact`.
    pub trace_redact: Option<RedactionMode>,
    /// `--checkpoint`.
    pub checkpoint_path: Option<String>,
    /// `--yes`.
    pub auto_approve: Option<bool>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a per-chain concurrency limit generates a warning.
const HIGH_CHAIN_CONCURRENCY_THRESHOLD: u32 = 64;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`EngineConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`EngineConfig::default()`].
///
/// `AIS_*` environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => EngineConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`EngineConfig`].
pub fn parse_toml(content: &str) -> Result<EngineConfig, ConfigError> {
    toml::from_str::<EngineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply `AIS_*` environment variable overrides.
///
/// Recognised variables:
/// - `AIS_MAX_CONCURRENCY`
/// - `AIS_BROADCAST` (`"true"`/`"false"`)
/// - `AIS_TRACE_REDACT` (`"off"`/`"audit"`/`"default"`)
/// - `AIS_CHECKPOINT_PATH`
/// - `AIS_AUTO_APPROVE` (`"true"`/`"false"`)
pub fn apply_env_overrides(config: &mut EngineConfig) {
    if let Ok(val) = std::env::var("AIS_MAX_CONCURRENCY")
        && let Ok(n) = val.parse::<u32>()
    {
        config.max_concurrency = n;
    }
    if let Ok(val) = std::env::var("AIS_BROADCAST")
        && let Ok(b) = val.parse::<bool>()
    {
        config.broadcast = b;
    }
    if let Ok(val) = std::env::var("AIS_TRACE_REDACT") {
        config.trace_redact = match val.as_str() {
            "off" => RedactionMode::Off,
            "audit" => RedactionMode::Audit,
            _ => RedactionMode::Default,
        };
    }
    if let Ok(val) = std::env::var("AIS_CHECKPOINT_PATH") {
        config.checkpoint_path = Some(val);
    }
    if let Ok(val) = std::env::var("AIS_AUTO_APPROVE")
        && let Ok(b) = val.parse::<bool>()
    {
        config.auto_approve = b;
    }
}

/// Layer CLI-flag overrides on top of a config; CLI always wins.
#[must_use]
pub fn apply_cli_overrides(mut config: EngineConfig, overrides: &CliOverrides) -> EngineConfig {
    if let Some(n) = overrides.max_concurrency {
        config.max_concurrency = n;
    }
    if let Some(b) = overrides.broadcast {
        config.broadcast = b;
    }
    if let Some(mode) = overrides.trace_redact {
        config.trace_redact = mode;
    }
    if let Some(ref path) = overrides.checkpoint_path {
        config.checkpoint_path = Some(path.clone());
    }
    if let Some(b) = overrides.auto_approve {
        config.auto_approve = b;
    }
    config
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero global concurrency, zero per-chain concurrency) are
/// returned as a [`ConfigError::ValidationError`]; soft issues come back
/// as warnings.
pub fn validate_config(config: &EngineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.max_concurrency == 0 {
        errors.push("max_concurrency must be at least 1".into());
    }

    for (chain, limits) in &config.chain_concurrency {
        if limits.max_read_concurrency == 0 {
            errors.push(format!("chain '{chain}': max_read_concurrency must be at least 1"));
        }
        if limits.max_write_concurrency == 0 {
            errors.push(format!("chain '{chain}': max_write_concurrency must be at least 1"));
        }
        if limits.max_read_concurrency > HIGH_CHAIN_CONCURRENCY_THRESHOLD {
            warnings.push(ConfigWarning::HighChainConcurrency {
                chain: chain.clone(),
                limit: limits.max_read_concurrency,
            });
        }
    }

    if config.checkpoint_path.is_none() {
        warnings.push(ConfigWarning::NoCheckpointPath);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over `base`.
///
/// Chain concurrency maps are combined; on chain-id collisions the overlay
/// entry wins.
#[must_use]
pub fn merge_configs(base: EngineConfig, overlay: EngineConfig) -> EngineConfig {
    let mut chain_concurrency = base.chain_concurrency;
    chain_concurrency.extend(overlay.chain_concurrency);
    EngineConfig {
        max_concurrency: overlay.max_concurrency,
        chain_concurrency,
        broadcast: overlay.broadcast || base.broadcast,
        trace_redact: overlay.trace_redact,
        checkpoint_path: overlay.checkpoint_path.or(base.checkpoint_path),
        auto_approve: overlay.auto_approve || base.auto_approve,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::NoCheckpointPath)));
    }

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.trace_redact, RedactionMode::Default);
        assert!(!cfg.broadcast);
        assert!(!cfg.auto_approve);
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            max_concurrency = 8
            broadcast = true
            trace_redact = "audit"
            checkpoint_path = "/tmp/ckpt.json"

            [chain_concurrency."eip155:1"]
            max_read_concurrency = 16
            max_write_concurrency = 2
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.max_concurrency, 8);
        assert!(cfg.broadcast);
        assert_eq!(cfg.trace_redact, RedactionMode::Audit);
        assert_eq!(cfg.chain_concurrency.len(), 1);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_zero_max_concurrency() {
        let cfg = EngineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_chain_concurrency() {
        let mut cfg = EngineConfig::default();
        cfg.chain_concurrency.insert(
            "eip155:1".into(),
            ChainConcurrency {
                max_read_concurrency: 0,
                max_write_concurrency: 1,
            },
        );
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("max_read_concurrency")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn high_chain_concurrency_warns() {
        let mut cfg = EngineConfig::default();
        cfg.checkpoint_path = Some("/tmp/c.json".into());
        cfg.chain_concurrency.insert(
            "eip155:1".into(),
            ChainConcurrency {
                max_read_concurrency: 128,
                max_write_concurrency: 1,
            },
        );
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::HighChainConcurrency { .. })));
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_overrides_apply() {
        // SAFETY: test-only, single-threaded env mutation guarded by no parallel access to these keys.
        unsafe {
            std::env::set_var("AIS_MAX_CONCURRENCY", "16");
            std::env::set_var("AIS_BROADCAST", "true");
            std::env::set_var("AIS_TRACE_REDACT", "off");
        }
        let mut cfg = EngineConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_concurrency, 16);
        assert!(cfg.broadcast);
        assert_eq!(cfg.trace_redact, RedactionMode::Off);
        unsafe {
            std::env::remove_var("AIS_MAX_CONCURRENCY");
            std::env::remove_var("AIS_BROADCAST");
            std::env::remove_var("AIS_TRACE_REDACT");
        }
    }

    #[test]
    fn cli_overrides_win_over_file_config() {
        let cfg = EngineConfig {
            max_concurrency: 4,
            broadcast: false,
            ..Default::default()
        };
        let overrides = CliOverrides {
            max_concurrency: Some(32),
            broadcast: Some(true),
            ..Default::default()
        };
        let merged = apply_cli_overrides(cfg, &overrides);
        assert_eq!(merged.max_concurrency, 32);
        assert!(merged.broadcast);
    }

    #[test]
    fn cli_overrides_leave_unset_fields_untouched() {
        let cfg = EngineConfig {
            max_concurrency: 4,
            checkpoint_path: Some("/tmp/a.json".into()),
            ..Default::default()
        };
        let merged = apply_cli_overrides(cfg.clone(), &CliOverrides::default());
        assert_eq!(merged, cfg);
    }

    #[test]
    fn merge_overlay_overrides_base() {
        let base = EngineConfig {
            max_concurrency: 4,
            ..Default::default()
        };
        let overlay = EngineConfig {
            max_concurrency: 8,
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.max_concurrency, 8);
    }

    #[test]
    fn merge_combines_chain_concurrency_maps() {
        let mut base = EngineConfig::default();
        base.chain_concurrency.insert("eip155:1".into(), ChainConcurrency::default());
        let mut overlay = EngineConfig::default();
        overlay.chain_concurrency.insert(
            "solana:mainnet".into(),
            ChainConcurrency::default(),
        );
        let merged = merge_configs(base, overlay);
        assert!(merged.chain_concurrency.contains_key("eip155:1"));
        assert!(merged.chain_concurrency.contains_key("solana:mainnet"));
    }

    #[test]
    fn merge_overlay_chain_wins_on_collision() {
        let mut base = EngineConfig::default();
        base.chain_concurrency.insert(
            "eip155:1".into(),
            ChainConcurrency {
                max_read_concurrency: 4,
                max_write_concurrency: 1,
            },
        );
        let mut overlay = EngineConfig::default();
        overlay.chain_concurrency.insert(
            "eip155:1".into(),
            ChainConcurrency {
                max_read_concurrency: 16,
                max_write_concurrency: 2,
            },
        );
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.chain_concurrency["eip155:1"].max_read_concurrency, 16);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "max_concurrency = 12\nbroadcast = true").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_concurrency, 12);
        assert!(cfg.broadcast);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/engine.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.max_concurrency, 4);
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = EngineConfig {
            max_concurrency: 10,
            broadcast: true,
            trace_redact: RedactionMode::Audit,
            checkpoint_path: Some("/tmp/r.json".into()),
            auto_approve: true,
            ..Default::default()
        };
        cfg.chain_concurrency.insert("eip155:1".into(), ChainConcurrency::default());
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn config_warning_display() {
        let w = ConfigWarning::HighChainConcurrency {
            chain: "eip155:1".into(),
            limit: 128,
        };
        assert!(w.to_string().contains("eip155:1"));
        assert!(w.to_string().contains("128"));
        assert!(ConfigWarning::NoCheckpointPath.to_string().contains("resumed"));
    }

    #[test]
    fn json_schema_can_be_generated() {
        let schema = schemars::schema_for!(EngineConfig);
        let json = serde_json::to_string_pretty(&schema).unwrap();
        assert!(json.contains("EngineConfig"));
    }
}
