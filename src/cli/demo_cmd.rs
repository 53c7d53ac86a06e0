// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! `demo`: run a built-in sample module on the loopback executor.
//!
//! Needs no privileges and no executor image, so it doubles as a smoke
//! test of the whole pipeline.

use std::sync::Arc;

use super::{execute_module, exit_code_for, print_summaries, CommonArgs, EXIT_EXECUTOR_ERROR};
use crate::config::EnvConfig;
use crate::events::ExceptionRecord;
use crate::executor::{LoopbackExecutor, LoopbackModule};
use crate::harness::Harness;
use crate::orchestrator::Orchestrator;
use crate::service::InMemoryServiceManager;
use crate::types::ContinuationToken;

pub const DEMO_MODULE: &str = "sample.sys";

/// Two fixtures exercising every routine kind and event type.
pub fn demo_module() -> LoopbackModule {
    LoopbackModule::builder(DEMO_MODULE)
        .fixture("SampleFixture1", |f| {
            f.setup(|ctx| {
                ctx.log("setting up");
                Ok(())
            })
            .teardown(|ctx| {
                ctx.log("tearing down");
                Ok(())
            })
            .before(|ctx| {
                ctx.set_token(ContinuationToken(0x5EED));
                Ok(())
            })
            .after(|ctx| {
                let token = ctx.token();
                ctx.check(token == ContinuationToken(0x5EED), "token == 0x5EED")
            })
            .test_case("Test01", |ctx| {
                let token = ctx.token();
                ctx.check(token == ContinuationToken(0x5EED), "token == 0x5EED")?;
                ctx.log("Test01 ran");
                Ok(())
            })
            .test_case("Test02", |ctx| {
                ctx.capture_frames(&[0xFFFF_F880_0100_1200, 0xFFFF_F880_0100_1000]);
                let sum: u32 = [1, 1].iter().sum();
                ctx.check(sum == 3, "sum == 3")
            })
        })
        .fixture("SampleFixture2", |f| {
            f.test_case("Inconclusive", |ctx| Err(ctx.inconclusive("not applicable here")))
                .test_case("Raises", |ctx| {
                    Err(ctx.raise(ExceptionRecord::Wide {
                        code: 0xC000_0005,
                        flags: 0,
                        record: 0,
                        address: 0xFFFF_F880_0100_2000,
                        parameter_count: 2,
                    }))
                })
        })
        .build()
}

pub fn run_demo(args: &CommonArgs, cfg: &EnvConfig) -> i32 {
    let executor = Arc::new(LoopbackExecutor::new());
    let address = executor.register(demo_module());
    let harness = Harness::new(
        executor.clone(),
        executor.clone(),
        Arc::new(InMemoryServiceManager::new()),
        cfg.harness_settings(),
    );
    let orchestrator = Orchestrator::new(cfg.dispositions, cfg.options);

    let summary = harness
        .attach_module(address, DEMO_MODULE)
        .map_err(|e| e.to_string())
        .and_then(|module| execute_module(&orchestrator, &module).map_err(|e| e.to_string()));

    match summary {
        Ok(summary) => {
            let summaries = [summary];
            print_summaries(&summaries, args.json);
            exit_code_for(&summaries)
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            EXIT_EXECUTOR_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::EXIT_TEST_FAILURES;

    #[test]
    fn test_demo_reports_expected_verdicts() {
        let executor = Arc::new(LoopbackExecutor::new());
        let address = executor.register(demo_module());
        let harness = Harness::new(
            executor.clone(),
            executor.clone(),
            Arc::new(InMemoryServiceManager::new()),
            Default::default(),
        );
        let module = harness.attach_module(address, DEMO_MODULE).unwrap();
        let summary = execute_module(&Orchestrator::default(), &module).unwrap();

        let verdicts: Vec<(String, bool)> = summary
            .fixtures
            .iter()
            .flat_map(|f| f.test_cases.iter().map(|t| (t.name.clone(), t.passed)))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                ("Test01".to_string(), true),
                ("Test02".to_string(), false),
                ("Inconclusive".to_string(), false),
                ("Raises".to_string(), false),
            ]
        );
        assert!(summary.fixtures.iter().all(|f| f.ran_to_completion));
        assert!(!summary.aborted);
        assert_eq!(summary.fixtures[0].events.len(), 2);
    }

    #[test]
    fn test_demo_exit_code() {
        let cfg = EnvConfig::default();
        assert_eq!(run_demo(&CommonArgs::default(), &cfg), EXIT_TEST_FAILURES);
    }
}
