// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command-line front end.
//!
//! ## Usage
//!
//! ```bash
//! kfix-cli run C:\tests\sample.sys   # Load and run a test module
//! kfix-cli demo --json               # Run the built-in loopback sample
//! kfix-cli config show               # Print the effective configuration
//! ```

pub mod config_cmd;
pub mod demo_cmd;
pub mod run_cmd;

use std::path::PathBuf;

use crate::channel::ChannelError;
use crate::config::{self, ConfigError, EnvConfig};
use crate::module::TestModule;
use crate::orchestrator::Orchestrator;
use crate::report::{RunSummary, SummaryCollector};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_TEST_FAILURES: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;
pub const EXIT_EXECUTOR_ERROR: i32 = 3;

/// Options shared by `run` and `demo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonArgs {
    pub json: bool,
    pub config: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub positional: Vec<PathBuf>,
}

impl CommonArgs {
    /// Parse everything after the subcommand.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--json" => parsed.json = true,
                "--config" => {
                    let value = iter.next().ok_or("Missing value for --config")?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "--log-file" => {
                    let value = iter.next().ok_or("Missing value for --log-file")?;
                    parsed.log_file = Some(PathBuf::from(value));
                }
                flag if flag.starts_with("--") => return Err(format!("Unknown option: {}", flag)),
                path => parsed.positional.push(PathBuf::from(path)),
            }
        }
        Ok(parsed)
    }

    /// Environment configuration, with the `--config` file laid over it.
    pub fn load_config(&self) -> Result<EnvConfig, ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => config::load_file(path)?,
            None => config::load(),
        };
        if self.log_file.is_some() {
            cfg.logging.output_path = self.log_file.clone();
        }
        Ok(cfg)
    }
}

/// Run every fixture of `module` and collect the summary.
pub fn execute_module(orchestrator: &Orchestrator, module: &TestModule) -> Result<RunSummary, ChannelError> {
    let mut collector = SummaryCollector::new(module.name());
    let reports = orchestrator.run_module(module, &mut collector)?;
    if reports.iter().any(|r| r.abort_run) {
        collector.mark_aborted();
    }
    Ok(collector.finish())
}

/// Exit code for a finished run.
pub fn exit_code_for(summaries: &[RunSummary]) -> i32 {
    if summaries.iter().all(RunSummary::succeeded) {
        EXIT_SUCCESS
    } else {
        EXIT_TEST_FAILURES
    }
}

/// Write summaries to stdout, as JSON or as plain text.
pub fn print_summaries(summaries: &[RunSummary], json: bool) {
    if json {
        match serde_json::to_string_pretty(summaries) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to serialize summary: {}", e),
        }
        return;
    }
    for summary in summaries {
        print!("{}", render_summary(summary));
    }
}

/// Plain-text rendering of one summary.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = format!("Module {} (run {})\n", summary.module, summary.run_id);
    for fixture in &summary.fixtures {
        let state = if fixture.ran_to_completion { "completed" } else { "incomplete" };
        out.push_str(&format!("  Fixture {} [{}]\n", fixture.name, state));
        for event in &fixture.events {
            out.push_str(&format!("    {:?}: {}\n", event.step, event.event));
        }
        for test_case in &fixture.test_cases {
            let verdict = if test_case.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("    [{}] {}\n", verdict, test_case.name));
            for event in &test_case.events {
                out.push_str(&format!("      {:?}: {}\n", event.step, event.event));
            }
        }
    }
    out.push_str(&format!(
        "  {} passed, {} failed, {} incomplete fixture(s){}\n",
        summary.passed(),
        summary.failed(),
        summary.incomplete_fixtures(),
        if summary.aborted { ", run aborted" } else { "" }
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_common_args() {
        let parsed = CommonArgs::parse(&args(&["a.sys", "--json", "--config", "k.toml", "b.sys"])).unwrap();
        assert!(parsed.json);
        assert_eq!(parsed.config, Some(PathBuf::from("k.toml")));
        assert_eq!(parsed.positional, vec![PathBuf::from("a.sys"), PathBuf::from("b.sys")]);
    }

    #[test]
    fn test_parse_rejects_unknown_and_dangling() {
        assert!(CommonArgs::parse(&args(&["--verbose"])).is_err());
        assert!(CommonArgs::parse(&args(&["--config"])).is_err());
    }

    #[test]
    fn test_exit_code_for_empty_run() {
        let summary = SummaryCollector::new("m").finish();
        assert_eq!(exit_code_for(&[summary.clone()]), EXIT_SUCCESS);

        let mut aborted = summary;
        aborted.aborted = true;
        assert_eq!(exit_code_for(&[aborted]), EXIT_TEST_FAILURES);
    }

    #[test]
    fn test_render_mentions_module() {
        let summary = SummaryCollector::new("sample").finish();
        let text = render_summary(&summary);
        assert!(text.starts_with("Module sample"));
        assert!(text.contains("0 passed, 0 failed"));
    }
}
