//! Configuration fragments accepted by `Dispatcher::register_*`.
//!
//! Mirrors the teacher's `ConnectorConfig`/`TransportConfig` split: a small
//! envelope of fields the core cares about (name, driver, timers) plus an
//! opaque `config` blob the driver itself deserializes. Representing
//! driver-specific settings as `serde_yaml::Value` lets the whole
//! configuration tree parse from one YAML document even though the core
//! doesn't know about every driver's fields (`spec.md §6.3`).

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Parser registration fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: YamlValue,
}

/// Filter registration fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: YamlValue,
}

fn default_defer_file_mode() -> u32 {
    0o600
}

fn default_defer_count() -> u32 {
    5
}

fn default_defer_interval_secs() -> u64 {
    60
}

fn default_store_timeout_secs() -> f64 {
    10.0
}

/// Storage registration fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub name: String,
    pub driver: String,
    pub defer_enabled: bool,
    pub defer_dir: String,
    #[serde(default = "default_defer_file_mode")]
    pub defer_file_mode: u32,
    #[serde(default = "default_defer_count")]
    pub defer_count: u32,
    #[serde(default = "default_defer_interval_secs")]
    pub defer_interval_secs: u64,
    pub defer_startup_check: bool,
    pub defer_only: bool,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: f64,
    pub config: YamlValue,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            driver: String::new(),
            defer_enabled: true,
            defer_dir: "/var/spool/statcollector".to_string(),
            defer_file_mode: default_defer_file_mode(),
            defer_count: default_defer_count(),
            defer_interval_secs: default_defer_interval_secs(),
            defer_startup_check: true,
            defer_only: false,
            store_timeout_secs: default_store_timeout_secs(),
            config: YamlValue::default(),
        }
    }
}

fn default_check_interval() -> f64 {
    60.0
}

fn default_check_timeout() -> f64 {
    10.0
}

fn default_error_resume_pause() -> f64 {
    60.0
}

/// Source registration fragment.
///
/// One of this struct's fields may instead be a *template* with one of the
/// permutation tokens described in `spec.md §4.6`; in that case the
/// Dispatcher expands it into many `SourceConfig`s before registering any of
/// them (`statcollector_core::permutation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: Option<String>,
    pub driver: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: f64,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: f64,
    pub max_errors_in_row: u32,
    #[serde(default = "default_error_resume_pause")]
    pub error_resume_pause_secs: f64,
    pub startup_delay_secs: f64,
    pub source_group: Option<String>,
    #[serde(default)]
    pub use_parser: Vec<String>,
    #[serde(default)]
    pub use_filter: Vec<String>,
    #[serde(default)]
    pub use_storage: Vec<String>,
    pub force_hostname: Option<String>,
    pub force_port: Option<u16>,
    pub force_content: Option<Vec<u8>>,
    pub debug_raw_data: bool,
    pub debug_parsed_data: bool,
    pub config: YamlValue,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: None,
            driver: String::new(),
            check_interval_secs: default_check_interval(),
            check_timeout_secs: default_check_timeout(),
            max_errors_in_row: 0,
            error_resume_pause_secs: default_error_resume_pause(),
            startup_delay_secs: 0.0,
            source_group: None,
            use_parser: Vec::new(),
            use_filter: Vec::new(),
            use_storage: Vec::new(),
            force_hostname: None,
            force_port: None,
            force_content: None,
            debug_raw_data: false,
            debug_parsed_data: false,
            config: YamlValue::default(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        let min_interval = self.check_timeout_secs + 0.1;
        if self.check_interval_secs < min_interval {
            return Err(PipelineError::IntervalTooShort {
                name: self.name.clone().unwrap_or_default(),
                check_interval: self.check_interval_secs,
                check_timeout: self.check_timeout_secs,
            });
        }
        Ok(())
    }
}

/// Trims blank and `#`-prefixed lines, then wraps the buffer in outer braces
/// if absent, per `spec.md §6.3`. Fragment loaders call this before handing
/// the buffer to `serde_yaml`.
pub fn normalize_fragment(raw: &str) -> String {
    let body: String = raw
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = body.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        trimmed.to_string()
    } else {
        format!("{{{trimmed}}}")
    }
}

/// Derives a fragment's default `name` from its file path: the basename
/// minus extension (`spec.md §6.3`).
pub fn name_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

pub fn parse_fragment<T: serde::de::DeserializeOwned>(raw: &str, path: &str) -> Result<T> {
    let normalized = normalize_fragment(raw);
    if normalized.trim() == "{}" {
        return Err(PipelineError::EmptyFragment {
            path: path.to_string(),
            reason: "fragment has no content after stripping blank/comment lines".to_string(),
        });
    }
    serde_yaml::from_str(&normalized).map_err(|e| PipelineError::EmptyFragment {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
