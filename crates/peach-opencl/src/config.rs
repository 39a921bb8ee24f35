//! Probe configuration with TOML, environment variable and default sources.
//!
//! Precedence, lowest first: built-in defaults, the `[probe]` table of a
//! TOML file, `PEACH_*` environment variables. Command-line flags are
//! applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::DEFAULT_MAX_DEVICES;
use crate::pipeline::{BuildPolicy, ProbeOptions};
use crate::program::OptLevel;
use crate::session::{WorkloadParams, DEFAULT_BLOCK_NUMBER, DEFAULT_DIFFICULTY};
use crate::source::{DEFAULT_KERNEL_PATH, DEFAULT_MAX_SOURCE_BYTES};
use crate::validation::{ValidationOptions, DEFAULT_ENTRY_POINT};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors produced by configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── LogLevel ─────────────────────────────────────────────────────────────────

/// Log verbosity for the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

// ── TOML wrapper ─────────────────────────────────────────────────────────────

/// Wrapper used for the `[probe]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    probe: ProbeConfig,
}

// ── ProbeConfig ──────────────────────────────────────────────────────────────

/// Full configuration of a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub kernel_path: PathBuf,
    pub max_source_bytes: usize,
    pub max_devices: usize,
    pub entry_point: String,
    pub passes: Vec<OptLevel>,
    pub correctly_rounded_div_sqrt: bool,
    pub extra_options: Vec<String>,
    pub keep_going: bool,
    pub wait_timeout_ms: Option<u64>,
    pub difficulty: u8,
    pub block_number: u64,
    pub log_level: LogLevel,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_devices: DEFAULT_MAX_DEVICES,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            passes: vec![OptLevel(0), OptLevel(1)],
            correctly_rounded_div_sqrt: true,
            extra_options: Vec::new(),
            keep_going: false,
            wait_timeout_ms: None,
            difficulty: DEFAULT_DIFFICULTY,
            block_number: DEFAULT_BLOCK_NUMBER,
            log_level: LogLevel::Info,
        }
    }
}

impl ProbeConfig {
    // ── Constructors ─────────────────────────────────────────────────────

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[probe]` table. If the file does
    /// not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a `[probe]` table from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let wrapper: TomlWrapper = toml::from_str(text)?;
        Ok(wrapper.probe)
    }

    /// Serialize to a TOML string (wrapped in `[probe]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { probe: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Build a config from `PEACH_*` environment variables on top of
    /// `Self::default()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Overwrite every field whose `PEACH_*` variable is set, even when the
    /// variable carries the default value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("PEACH_KERNEL_PATH") {
            self.kernel_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("PEACH_MAX_SOURCE_BYTES") {
            self.max_source_bytes = parse_env("PEACH_MAX_SOURCE_BYTES", &v)?;
        }
        if let Ok(v) = env::var("PEACH_MAX_DEVICES") {
            self.max_devices = parse_env("PEACH_MAX_DEVICES", &v)?;
        }
        if let Ok(v) = env::var("PEACH_ENTRY_POINT") {
            self.entry_point = v;
        }
        if let Ok(v) = env::var("PEACH_PASSES") {
            self.passes = parse_passes(&v).ok_or_else(|| ConfigError::InvalidEnvVar {
                key: "PEACH_PASSES".to_string(),
                value: v.clone(),
            })?;
        }
        if let Ok(v) = env::var("PEACH_CORRECTLY_ROUNDED_DIV_SQRT") {
            self.correctly_rounded_div_sqrt = parse_env_bool("PEACH_CORRECTLY_ROUNDED_DIV_SQRT", &v)?;
        }
        if let Ok(v) = env::var("PEACH_EXTRA_OPTIONS") {
            self.extra_options = v.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(v) = env::var("PEACH_KEEP_GOING") {
            self.keep_going = parse_env_bool("PEACH_KEEP_GOING", &v)?;
        }
        if let Ok(v) = env::var("PEACH_WAIT_TIMEOUT_MS") {
            self.wait_timeout_ms = Some(parse_env("PEACH_WAIT_TIMEOUT_MS", &v)?);
        }
        if let Ok(v) = env::var("PEACH_DIFFICULTY") {
            self.difficulty = parse_env("PEACH_DIFFICULTY", &v)?;
        }
        if let Ok(v) = env::var("PEACH_BLOCK_NUMBER") {
            self.block_number = parse_env("PEACH_BLOCK_NUMBER", &v)?;
        }
        if let Ok(v) = env::var("PEACH_LOG_LEVEL") {
            self.log_level = v.parse()?;
        }

        Ok(())
    }

    /// Defaults, then the file at `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_toml(p)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    // ── Validation ───────────────────────────────────────────────────────

    /// Reject configurations no probe run could satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passes.is_empty() {
            return Err(ConfigError::Validation("passes must list at least one level".into()));
        }
        if self.max_devices == 0 {
            return Err(ConfigError::Validation("max_devices must be >= 1".into()));
        }
        if self.max_source_bytes == 0 {
            return Err(ConfigError::Validation("max_source_bytes must be >= 1".into()));
        }
        if self.entry_point.trim().is_empty() {
            return Err(ConfigError::Validation("entry_point must not be empty".into()));
        }
        if self.wait_timeout_ms == Some(0) {
            return Err(ConfigError::Validation("wait_timeout_ms must be > 0 when set".into()));
        }
        if self.kernel_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("kernel_path must not be empty".into()));
        }
        Ok(())
    }

    // ── Merge ────────────────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        let d = Self::default();
        Self {
            kernel_path: pick(&self.kernel_path, &other.kernel_path, &d.kernel_path),
            max_source_bytes: pick(&self.max_source_bytes, &other.max_source_bytes, &d.max_source_bytes),
            max_devices: pick(&self.max_devices, &other.max_devices, &d.max_devices),
            entry_point: pick(&self.entry_point, &other.entry_point, &d.entry_point),
            passes: pick(&self.passes, &other.passes, &d.passes),
            correctly_rounded_div_sqrt: pick(
                &self.correctly_rounded_div_sqrt,
                &other.correctly_rounded_div_sqrt,
                &d.correctly_rounded_div_sqrt,
            ),
            extra_options: pick(&self.extra_options, &other.extra_options, &d.extra_options),
            keep_going: pick(&self.keep_going, &other.keep_going, &d.keep_going),
            wait_timeout_ms: other.wait_timeout_ms.or(self.wait_timeout_ms),
            difficulty: pick(&self.difficulty, &other.difficulty, &d.difficulty),
            block_number: pick(&self.block_number, &other.block_number, &d.block_number),
            log_level: pick(&self.log_level, &other.log_level, &d.log_level),
        }
    }

    // ── Conversion ───────────────────────────────────────────────────────

    /// Options for [`crate::ProbeHarness`].
    #[must_use]
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            kernel_path: self.kernel_path.clone(),
            max_devices: self.max_devices,
            policy: BuildPolicy {
                passes: self.passes.clone(),
                correctly_rounded_div_sqrt: self.correctly_rounded_div_sqrt,
                extra_options: self.extra_options.clone(),
            },
            validation: ValidationOptions {
                entry_point: self.entry_point.clone(),
                deadline: self.wait_timeout_ms.map(Duration::from_millis),
                ..ValidationOptions::default()
            },
            workload: WorkloadParams::new(self.difficulty, self.block_number),
            keep_going: self.keep_going,
        }
    }
}

/// Parse a comma- or space-separated list of optimization levels.
#[must_use]
pub fn parse_passes(s: &str) -> Option<Vec<OptLevel>> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_start_matches("-O").parse().ok().map(OptLevel))
        .collect()
}

fn pick<T: Clone + PartialEq>(base: &T, over: &T, default: &T) -> T {
    if over == default { base.clone() } else { over.clone() }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvVar {
        key: key.to_string(),
        value: val.to_string(),
    })
}

fn parse_env_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar { key: key.to_string(), value: val.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = ProbeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.kernel_path, Path::new("cl_minimal.cl"));
        assert_eq!(cfg.max_devices, 64);
    }

    #[test]
    fn log_level_display_roundtrip() {
        for l in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug, LogLevel::Trace]
        {
            let parsed: LogLevel = l.to_string().parse().unwrap();
            assert_eq!(l, parsed);
        }
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg = ProbeConfig::from_toml_str(
            "[probe]\nkernel_path = \"kernels/peach.cl\"\npasses = [0, 2]\nkeep_going = true\n",
        )
        .unwrap();
        assert_eq!(cfg.kernel_path, Path::new("kernels/peach.cl"));
        assert_eq!(cfg.passes, vec![OptLevel(0), OptLevel(2)]);
        assert!(cfg.keep_going);
        assert_eq!(cfg.difficulty, 18);
        assert_eq!(cfg.entry_point, "test");
    }

    #[test]
    fn toml_roundtrip_preserves_fields() {
        let cfg = ProbeConfig { wait_timeout_ms: Some(250), block_number: 42, ..Default::default() };
        let text = cfg.to_toml().unwrap();
        assert!(text.contains("[probe]"));
        assert_eq!(ProbeConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let cases = [
            ProbeConfig { passes: vec![], ..Default::default() },
            ProbeConfig { max_devices: 0, ..Default::default() },
            ProbeConfig { entry_point: "  ".into(), ..Default::default() },
            ProbeConfig { wait_timeout_ms: Some(0), ..Default::default() },
        ];
        for cfg in cases {
            assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))), "{cfg:?}");
        }
    }

    #[test]
    fn merge_prefers_non_default_overlay() {
        let base = ProbeConfig { difficulty: 20, max_devices: 8, ..Default::default() };
        let over = ProbeConfig { max_devices: 4, ..Default::default() };
        let merged = base.merge_with(&over);
        assert_eq!(merged.difficulty, 20);
        assert_eq!(merged.max_devices, 4);
    }

    #[test]
    fn passes_parse_from_flag_syntax() {
        assert_eq!(parse_passes("0,1"), Some(vec![OptLevel(0), OptLevel(1)]));
        assert_eq!(parse_passes("-O0 -O2"), Some(vec![OptLevel(0), OptLevel(2)]));
        assert_eq!(parse_passes("0,fast"), None);
    }

    #[test]
    fn probe_options_carry_workload_and_deadline() {
        let cfg = ProbeConfig { wait_timeout_ms: Some(100), block_number: 7, ..Default::default() };
        let opts = cfg.probe_options();
        assert_eq!(opts.validation.deadline, Some(Duration::from_millis(100)));
        assert_eq!(opts.workload.block_number(), 7);
        assert_eq!(opts.workload.difficulty, 18);
        assert_eq!(opts.policy.passes.len(), 2);
    }
}
