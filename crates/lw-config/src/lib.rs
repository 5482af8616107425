//! Configuration loading, validation, and merging for loomwork.
//!
//! [`LoomworkConfig`] is the top-level runtime configuration: relay
//! settings (FIFO directory, reader backoff), dispatcher settings (transfer
//! tool paths, batch sync level), and the planner's search horizon.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;

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

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A reader backoff ceiling is unusually large.
    LargeBackoffCeiling {
        /// Configured ceiling, in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeBackoffCeiling { secs } => {
                write!(f, "reader backoff ceiling is unusually large ({secs}s)")
            }
        }
    }
}

/// Relay IPC fabric settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RelayConfig {
    /// Directory holding the main channel FIFO and per-client work FIFOs.
    #[serde(default = "default_io_dir")]
    pub io_dir: String,
    /// Initial non-blocking-reader poll backoff, in milliseconds.
    #[serde(default = "default_backoff_floor_ms")]
    pub backoff_floor_ms: u64,
    /// Maximum non-blocking-reader poll backoff, in milliseconds.
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// How long a client connection may remain idle before the reaper
    /// reclaims its channel.
    #[serde(default = "default_reaper_grace_secs")]
    pub reaper_grace_secs: u64,
}

fn default_io_dir() -> String {
    "./.loomwork/relay".into()
}
fn default_backoff_floor_ms() -> u64 {
    100
}
fn default_backoff_ceiling_ms() -> u64 {
    600_000
}
fn default_reaper_grace_secs() -> u64 {
    300
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            io_dir: default_io_dir(),
            backoff_floor_ms: default_backoff_floor_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            reaper_grace_secs: default_reaper_grace_secs(),
        }
    }
}

/// Data-movement dispatcher settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum number of transfers batched into a single transport
    /// invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of retries for a transient transport failure.
    #[serde(default = "default_transfer_retries")]
    pub retries: u32,
}

fn default_batch_size() -> usize {
    32
}
fn default_transfer_retries() -> u32 {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retries: default_transfer_retries(),
        }
    }
}

/// Planner search settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Maximum recursion depth before the search gives up.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
}

// Mirrors lw_planner::DEFAULT_HORIZON; duplicated rather than taking a
// dependency on lw-planner purely for one constant.
fn default_horizon() -> usize {
    64
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct LoomworkConfig {
    /// Relay fabric settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Planner settings.
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Directory of nextflow preset templates used by the emitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nextflow_presets_dir: Option<String>,
}

/// Load a [`LoomworkConfig`] from an optional TOML file path, falling back
/// to defaults with environment overrides applied on top either way.
pub fn load_config(path: Option<&Path>) -> Result<LoomworkConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => LoomworkConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`LoomworkConfig`].
pub fn parse_toml(content: &str) -> Result<LoomworkConfig, ConfigError> {
    toml::from_str::<LoomworkConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply environment variable overrides.
///
/// Recognised variables: `LOOMWORK_RELAY_IO_DIR`, `LOOMWORK_PLANNER_HORIZON`.
pub fn apply_env_overrides(config: &mut LoomworkConfig) {
    if let Ok(val) = std::env::var("LOOMWORK_RELAY_IO_DIR") {
        config.relay.io_dir = val;
    }
    if let Ok(val) = std::env::var("LOOMWORK_PLANNER_HORIZON")
        && let Ok(horizon) = val.parse::<usize>()
    {
        config.planner.horizon = horizon;
    }
}

/// Validate a parsed configuration, returning advisory warnings. Hard
/// errors come back as [`ConfigError::ValidationError`].
pub fn validate_config(config: &LoomworkConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.relay.backoff_floor_ms == 0 {
        errors.push("relay.backoff_floor_ms must be nonzero".to_string());
    }
    if config.relay.backoff_ceiling_ms < config.relay.backoff_floor_ms {
        errors.push("relay.backoff_ceiling_ms must be >= backoff_floor_ms".to_string());
    }
    if config.relay.backoff_ceiling_ms > 3_600_000 {
        warnings.push(ConfigWarning::LargeBackoffCeiling {
            secs: config.relay.backoff_ceiling_ms / 1000,
        });
    }
    if config.planner.horizon == 0 {
        errors.push("planner.horizon must be nonzero".to_string());
    }
    if config.nextflow_presets_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "nextflow_presets_dir".into(),
            hint: "stage-workflow will fall back to the built-in default preset".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

/// Merge two configurations; values in `overlay` take precedence over
/// `base`.
pub fn merge_configs(base: LoomworkConfig, overlay: LoomworkConfig) -> LoomworkConfig {
    LoomworkConfig {
        relay: overlay.relay,
        dispatch: overlay.dispatch,
        planner: overlay.planner,
        nextflow_presets_dir: overlay.nextflow_presets_dir.or(base.nextflow_presets_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LoomworkConfig::default();
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(
            w,
            ConfigWarning::MissingOptionalField { field, .. } if field == "nextflow_presets_dir"
        )));
    }

    #[test]
    fn toml_round_trip() {
        let toml_src = r#"
            [relay]
            io_dir = "/tmp/relay"
            backoff_floor_ms = 50

            [planner]
            horizon = 32
        "#;
        let cfg = parse_toml(toml_src).unwrap();
        assert_eq!(cfg.relay.io_dir, "/tmp/relay");
        assert_eq!(cfg.relay.backoff_floor_ms, 50);
        assert_eq!(cfg.planner.horizon, 32);
        assert_eq!(cfg.dispatch.batch_size, 32);
    }

    #[test]
    fn rejects_zero_horizon() {
        let mut cfg = LoomworkConfig::default();
        cfg.planner.horizon = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn rejects_ceiling_below_floor() {
        let mut cfg = LoomworkConfig::default();
        cfg.relay.backoff_ceiling_ms = 10;
        cfg.relay.backoff_floor_ms = 100;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn merge_overlay_wins() {
        let mut base = LoomworkConfig::default();
        base.planner.horizon = 16;
        let mut overlay = LoomworkConfig::default();
        overlay.planner.horizon = 128;
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.planner.horizon, 128);
    }

    #[test]
    fn env_override_horizon() {
        // SAFETY/ordering: tests run single-threaded per-process for env
        // vars would be ideal, but this crate only reads the var once per
        // call, so sequential mutation here is safe within this test body.
        unsafe {
            std::env::set_var("LOOMWORK_PLANNER_HORIZON", "99");
        }
        let mut cfg = LoomworkConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.planner.horizon, 99);
        unsafe {
            std::env::remove_var("LOOMWORK_PLANNER_HORIZON");
        }
    }
}
