// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config subcommands: show, defaults, validate.
//!
//! These read the environment (and an optional TOML file) only; no
//! executor connection is made.

use std::path::Path;

use super::{EXIT_CONFIG_ERROR, EXIT_SUCCESS};
use crate::config::{self, EffectiveConfig, EnvConfig};

/// Print the effective configuration as `KEY=value` lines.
pub fn run_show(file: Option<&Path>) -> i32 {
    let cfg = match file {
        Some(path) => match config::load_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return EXIT_CONFIG_ERROR;
            }
        },
        None => config::load(),
    };
    print!("{}", render_config(&cfg.effective_config()));
    EXIT_SUCCESS
}

/// Print the built-in defaults, ignoring the environment.
pub fn run_defaults() {
    print!("{}", render_config(&EnvConfig::default().effective_config()));
}

/// Check a config file, or the environment when no file is given.
///
/// The environment is never invalid since bad values fall back to
/// defaults, but values that were replaced are reported as warnings.
pub fn run_validate(file: Option<&Path>) -> i32 {
    if let Some(path) = file {
        return match config::parse_file(path) {
            Ok(_) => {
                println!("Configuration file {} is valid.", path.display());
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("ERROR: {}", e);
                EXIT_CONFIG_ERROR
            }
        };
    }

    let warnings = env_warnings();
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
    }
    EXIT_SUCCESS
}

/// Environment values that were set but not taken as given.
fn env_warnings() -> Vec<String> {
    let effective = config::load().effective_config();
    let mut warnings = Vec::new();
    let checks: [(&str, String); 6] = [
        ("KFIX_RESPONSE_BUFFER", effective.response_buffer.to_string()),
        ("KFIX_MAX_FIXTURE_NAME", effective.max_fixture_name.to_string()),
        ("KFIX_ASSERT_DISPOSITION", effective.assert_disposition.to_string()),
        ("KFIX_EXCEPTION_DISPOSITION", effective.exception_disposition.to_string()),
        ("KFIX_LOG_FORMAT", effective.log_format.as_str().to_string()),
        ("KFIX_SHORTCUT_FIXTURE", effective.shortcut_fixture.to_string()),
    ];
    for (key, used) in checks {
        if let Ok(raw) = std::env::var(key) {
            if !same_value(&raw, &used) {
                warnings.push(format!("{}={:?} was not accepted; using {}", key, raw, used));
            }
        }
    }
    warnings
}

fn same_value(raw: &str, used: &str) -> bool {
    let raw = raw.trim().to_ascii_lowercase();
    match (raw.as_str(), used) {
        ("1" | "yes" | "on", "true") | ("0" | "no" | "off", "false") => true,
        ("break-if-debugger", "break") | ("always-break", "break-always") | ("abort-run", "abort") => true,
        ("text", "pretty") => true,
        (raw, used) => raw == used,
    }
}

pub fn render_config(cfg: &EffectiveConfig) -> String {
    [
        format!("KFIX_RESPONSE_BUFFER={}", cfg.response_buffer),
        format!("KFIX_MAX_FIXTURE_NAME={}", cfg.max_fixture_name),
        format!("KFIX_EXECUTOR_SERVICE={}", cfg.executor_service),
        format!("KFIX_EXECUTOR_DISPLAY={}", cfg.executor_display),
        format!("KFIX_SERVICE_PREFIX={}", cfg.service_prefix),
        format!("KFIX_ASSERT_DISPOSITION={}", cfg.assert_disposition),
        format!("KFIX_EXCEPTION_DISPOSITION={}", cfg.exception_disposition),
        format!("KFIX_SHORTCUT_FIXTURE={}", cfg.shortcut_fixture),
        format!("KFIX_SHORTCUT_RUN={}", cfg.shortcut_run),
        format!("KFIX_ESCALATE_FAILURES={}", cfg.escalate_failures),
        format!("KFIX_LOG_FORMAT={}", cfg.log_format.as_str()),
        format!("KFIX_LOG_LEVEL={}", cfg.log_level),
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect()
}
