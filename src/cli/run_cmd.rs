// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! `run`: load test modules into the kernel executor and run them.

use super::{CommonArgs, EXIT_CONFIG_ERROR};
use crate::config::EnvConfig;

#[cfg(windows)]
pub fn run_modules(args: &CommonArgs, cfg: &EnvConfig) -> i32 {
    use std::sync::Arc;

    use super::{execute_module, exit_code_for, print_summaries, EXIT_EXECUTOR_ERROR};
    use crate::executor::{DeviceExecutor, DriverNameResolver};
    use crate::harness::Harness;
    use crate::orchestrator::Orchestrator;
    use crate::service::{ExecutorLocator, ScmServiceManager};

    if args.positional.is_empty() {
        eprintln!("Usage: kfix-cli run <module.sys>... [--json] [--config FILE]");
        return EXIT_CONFIG_ERROR;
    }

    let services = match ScmServiceManager::connect() {
        Ok(services) => Arc::new(services),
        Err(e) => {
            eprintln!("ERROR: cannot open the service control manager: {}", e);
            return EXIT_EXECUTOR_ERROR;
        }
    };
    let settings = cfg.harness_settings();

    let status = ExecutorLocator::from_current_exe()
        .and_then(|locator| {
            crate::service::ensure_executor_running(
                services.as_ref(),
                &locator,
                &settings.executor_service,
                &settings.executor_display,
            )
        });
    match status {
        Ok(status) => tracing::info!(
            image = %status.image.display(),
            installed = status.installed,
            started = status.started,
            "executor ready"
        ),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return EXIT_EXECUTOR_ERROR;
        }
    }

    let device = match DeviceExecutor::open(&settings.executor_service) {
        Ok(device) => Arc::new(device),
        Err(e) => {
            eprintln!("ERROR: cannot open the executor device: {}", e);
            return EXIT_EXECUTOR_ERROR;
        }
    };

    let harness = Harness::new(device, Arc::new(DriverNameResolver), services, settings);
    let orchestrator = Orchestrator::new(cfg.dispositions, cfg.options);

    let mut summaries = Vec::with_capacity(args.positional.len());
    for path in &args.positional {
        let module = match harness.load_module(path) {
            Ok(module) => module,
            Err(e) => {
                eprintln!("ERROR: {}: {}", path.display(), e);
                print_summaries(&summaries, args.json);
                return EXIT_EXECUTOR_ERROR;
            }
        };
        match execute_module(&orchestrator, &module) {
            Ok(summary) => {
                let aborted = summary.aborted;
                summaries.push(summary);
                if aborted {
                    break;
                }
            }
            Err(e) => {
                eprintln!("ERROR: {}: {}", module.name(), e);
                print_summaries(&summaries, args.json);
                return EXIT_EXECUTOR_ERROR;
            }
        }
    }

    print_summaries(&summaries, args.json);
    exit_code_for(&summaries)
}

#[cfg(not(windows))]
pub fn run_modules(args: &CommonArgs, _cfg: &EnvConfig) -> i32 {
    use super::EXIT_EXECUTOR_ERROR;

    if args.positional.is_empty() {
        eprintln!("Usage: kfix-cli run <module.sys>... [--json] [--config FILE]");
        return EXIT_CONFIG_ERROR;
    }
    eprintln!("ERROR: the kernel executor is only available on Windows; try `kfix-cli demo`");
    EXIT_EXECUTOR_ERROR
}
