//! Configuration from environment variables and an optional TOML file.
//!
//! Values come from `KFIX_*` environment variables with defaults. Invalid
//! values fall back to defaults without failing. A TOML file given with
//! `--config` is laid over the environment; unlike the environment, a bad
//! file is an error.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `KFIX_RESPONSE_BUFFER` | 4096 | CallRoutine response buffer (bytes, min 24) |
//! | `KFIX_MAX_FIXTURE_NAME` | 63 | Longest fixture/routine name (UTF-16 units, 1..=1024) |
//! | `KFIX_EXECUTOR_SERVICE` | kfixkr | Executor service name |
//! | `KFIX_EXECUTOR_DISPLAY` | Kfix Kernel Reflector | Executor display name |
//! | `KFIX_SERVICE_PREFIX` | kfixkr_ | Prefix of per-module service names |
//! | `KFIX_ASSERT_DISPOSITION` | continue | Disposition for failed assertions |
//! | `KFIX_EXCEPTION_DISPOSITION` | continue | Disposition for uncaught exceptions |
//! | `KFIX_SHORTCUT_FIXTURE` | false | Stop a fixture at its first failing test |
//! | `KFIX_SHORTCUT_RUN` | false | Abort the run when a Setup fails |
//! | `KFIX_ESCALATE_FAILURES` | false | Abort the run on shortcut or Teardown failure |
//! | `KFIX_LOG_FORMAT` | json | `json` or `pretty` |
//! | `KFIX_LOG_LEVEL` | info | `EnvFilter` directive |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::channel::DEFAULT_RESPONSE_BUFFER;
use crate::harness::HarnessSettings;
use crate::orchestrator::ExecutionOptions;
use crate::telemetry::{LogConfig, LogFormat};
use crate::types::{Disposition, Dispositions};
use crate::wire::CALL_RESPONSE_HEADER_SIZE;

const MAX_FIXTURE_NAME_LIMIT: usize = 1024;
const DEFAULT_MAX_FIXTURE_NAME: usize = 63;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Flat summary of every effective value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub response_buffer: usize,
    pub max_fixture_name: usize,
    pub executor_service: String,
    pub executor_display: String,
    pub service_prefix: String,
    pub assert_disposition: Disposition,
    pub exception_disposition: Disposition,
    pub shortcut_fixture: bool,
    pub shortcut_run: bool,
    pub escalate_failures: bool,
    pub log_format: LogFormat,
    pub log_level: String,
}

/// All configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub harness: HarnessSettings,
    pub dispositions: Dispositions,
    pub options: ExecutionOptions,
    pub logging: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => default.to_string(),
    }
}

fn parse_disposition(key: &str) -> Disposition {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse::<Disposition>().ok())
        .unwrap_or_default()
}

fn clamp_response_buffer(bytes: usize) -> usize {
    bytes.max(CALL_RESPONSE_HEADER_SIZE)
}

fn clamp_max_fixture_name(units: usize) -> usize {
    units.clamp(1, MAX_FIXTURE_NAME_LIMIT)
}

fn load_harness_settings() -> HarnessSettings {
    let defaults = HarnessSettings::default();
    HarnessSettings {
        response_buffer: clamp_response_buffer(parse_usize("KFIX_RESPONSE_BUFFER", DEFAULT_RESPONSE_BUFFER)),
        max_fixture_name: clamp_max_fixture_name(parse_usize(
            "KFIX_MAX_FIXTURE_NAME",
            DEFAULT_MAX_FIXTURE_NAME,
        )),
        service_prefix: parse_string("KFIX_SERVICE_PREFIX", &defaults.service_prefix),
        executor_service: parse_string("KFIX_EXECUTOR_SERVICE", &defaults.executor_service),
        executor_display: parse_string("KFIX_EXECUTOR_DISPLAY", &defaults.executor_display),
    }
}

fn load_logging() -> LogConfig {
    let format = std::env::var("KFIX_LOG_FORMAT")
        .ok()
        .and_then(|val| val.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig {
        format,
        level: parse_string("KFIX_LOG_LEVEL", "info"),
        output_path: None,
    }
}

/// Load configuration from environment variables.
pub fn load() -> EnvConfig {
    EnvConfig {
        harness: load_harness_settings(),
        dispositions: Dispositions::new(
            parse_disposition("KFIX_ASSERT_DISPOSITION"),
            parse_disposition("KFIX_EXCEPTION_DISPOSITION"),
        ),
        options: ExecutionOptions {
            shortcut_fixture_on_failure: parse_bool("KFIX_SHORTCUT_FIXTURE", false),
            shortcut_run_on_setup_failure: parse_bool("KFIX_SHORTCUT_RUN", false),
            escalate_fixture_failures: parse_bool("KFIX_ESCALATE_FAILURES", false),
        },
        logging: load_logging(),
    }
}

/// TOML overlay. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub harness: FileHarness,
    #[serde(default)]
    pub dispositions: FileDispositions,
    #[serde(default)]
    pub execution: FileExecution,
    #[serde(default)]
    pub logging: FileLogging,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileHarness {
    pub response_buffer: Option<usize>,
    pub max_fixture_name: Option<usize>,
    pub service_prefix: Option<String>,
    pub executor_service: Option<String>,
    pub executor_display: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDispositions {
    pub failed_assertion: Option<Disposition>,
    pub uncaught_exception: Option<Disposition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileExecution {
    pub shortcut_fixture_on_failure: Option<bool>,
    pub shortcut_run_on_setup_failure: Option<bool>,
    pub escalate_fixture_failures: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLogging {
    pub format: Option<LogFormat>,
    pub level: Option<String>,
    pub output_path: Option<PathBuf>,
}

/// Parse a TOML overlay without applying it.
pub fn parse_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FileConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    file.validate()?;
    Ok(file)
}

/// Environment configuration with the TOML file at `path` laid over it.
pub fn load_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    let file = parse_file(path)?;
    let mut config = load();
    file.apply(&mut config);
    Ok(config)
}

impl FileConfig {
    /// Range checks the environment loader clamps silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bytes) = self.harness.response_buffer {
            if bytes < CALL_RESPONSE_HEADER_SIZE {
                return Err(ConfigError::Invalid {
                    key: "harness.response_buffer",
                    message: format!("{} is below the {}-byte response header", bytes, CALL_RESPONSE_HEADER_SIZE),
                });
            }
        }
        if let Some(units) = self.harness.max_fixture_name {
            if units == 0 || units > MAX_FIXTURE_NAME_LIMIT {
                return Err(ConfigError::Invalid {
                    key: "harness.max_fixture_name",
                    message: format!("{} is outside 1..={}", units, MAX_FIXTURE_NAME_LIMIT),
                });
            }
        }
        for (key, value) in [
            ("harness.service_prefix", &self.harness.service_prefix),
            ("harness.executor_service", &self.harness.executor_service),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::Invalid { key, message: "must not be empty".to_string() });
            }
        }
        Ok(())
    }

    pub fn apply(self, config: &mut EnvConfig) {
        let harness = &mut config.harness;
        if let Some(v) = self.harness.response_buffer {
            harness.response_buffer = clamp_response_buffer(v);
        }
        if let Some(v) = self.harness.max_fixture_name {
            harness.max_fixture_name = clamp_max_fixture_name(v);
        }
        if let Some(v) = self.harness.service_prefix {
            harness.service_prefix = v;
        }
        if let Some(v) = self.harness.executor_service {
            harness.executor_service = v;
        }
        if let Some(v) = self.harness.executor_display {
            harness.executor_display = v;
        }

        if let Some(v) = self.dispositions.failed_assertion {
            config.dispositions.failed_assertion = v;
        }
        if let Some(v) = self.dispositions.uncaught_exception {
            config.dispositions.uncaught_exception = v;
        }

        let options = &mut config.options;
        if let Some(v) = self.execution.shortcut_fixture_on_failure {
            options.shortcut_fixture_on_failure = v;
        }
        if let Some(v) = self.execution.shortcut_run_on_setup_failure {
            options.shortcut_run_on_setup_failure = v;
        }
        if let Some(v) = self.execution.escalate_fixture_failures {
            options.escalate_fixture_failures = v;
        }

        if let Some(v) = self.logging.format {
            config.logging.format = v;
        }
        if let Some(v) = self.logging.level {
            config.logging.level = v;
        }
        if self.logging.output_path.is_some() {
            config.logging.output_path = self.logging.output_path;
        }
    }
}

impl EnvConfig {
    pub fn harness_settings(&self) -> HarnessSettings {
        self.harness.clone()
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            response_buffer: self.harness.response_buffer,
            max_fixture_name: self.harness.max_fixture_name,
            executor_service: self.harness.executor_service.clone(),
            executor_display: self.harness.executor_display.clone(),
            service_prefix: self.harness.service_prefix.clone(),
            assert_disposition: self.dispositions.failed_assertion,
            exception_disposition: self.dispositions.uncaught_exception,
            shortcut_fixture: self.options.shortcut_fixture_on_failure,
            shortcut_run: self.options.shortcut_run_on_setup_failure,
            escalate_failures: self.options.escalate_fixture_failures,
            log_format: self.logging.format,
            log_level: self.logging.level.clone(),
        }
    }
}
