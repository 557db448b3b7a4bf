/// Tester entry: assembles steps from a definition and the invocation
/// context, then runs them (or, in worker-process mode, runs exactly one).
use std::collections::HashMap;

use crate::logger::get_logger;
use crate::random;
use crate::test_runner::worker::TestRunnerWorker;
use crate::test_runner::{TestRunner, TestRunnerStep};
use crate::tester_context::{get_tester_context, TesterContext};
use crate::tester_definition::TesterDefinition;
use crate::types::{Result, TesterError};

#[derive(Debug)]
pub struct Tester {
    context: TesterContext,
    definition: TesterDefinition,
}

impl Tester {
    /// Creates a tester from the definition and the given environment.
    ///
    /// Every context test case must resolve to a definition test case;
    /// a missing match is an error returned to the caller.
    pub fn new(env: &HashMap<String, String>, definition: TesterDefinition) -> Result<Tester> {
        let context = get_tester_context(env, &definition.executable_file_name)?;

        for test_case in &context.test_cases {
            if definition.test_case_by_slug(&test_case.slug).is_none() {
                return Err(TesterError::Context(format!(
                    "test case {:?} not found in tester definition",
                    test_case.slug
                )));
            }
        }

        Ok(Tester {
            context,
            definition,
        })
    }

    /// Runs the tester and returns the process exit code: 0 if every step
    /// passed, 1 otherwise.
    pub fn run_cli(&self) -> i32 {
        random::init();

        if self.context.is_worker_process {
            return self.run_single_step_as_worker();
        }

        self.print_debug_context();

        let runner = TestRunner::new(
            self.build_steps(),
            self.context.clone(),
            self.definition.run_steps_in_worker_processes,
        );

        if runner.run() {
            0
        } else {
            1
        }
    }

    /// Worker-process mode: run only the step named by the environment.
    fn run_single_step_as_worker(&self) -> i32 {
        let slug = self
            .context
            .worker_process_step_slug
            .as_deref()
            .unwrap_or_else(|| panic!("CODECRAFTERS_WORKER_PROCESS_STEP_SLUG not set"));

        let runner = TestRunner::new(self.build_steps(), self.context.clone(), false);
        let step = runner.get_step_by_slug(slug);

        if TestRunnerWorker::new(runner.context(), step).run() {
            0
        } else {
            1
        }
    }

    /// Context steps in order, then anti-cheat steps (quiet, positional
    /// `ac-<i>` prefixes) unless skipped.
    fn build_steps(&self) -> Vec<TestRunnerStep> {
        let mut steps: Vec<TestRunnerStep> = self
            .context
            .test_cases
            .iter()
            .map(|test_case| TestRunnerStep {
                test_case: self
                    .definition
                    .test_case_by_slug(&test_case.slug)
                    .expect("context test cases are validated against the definition")
                    .clone(),
                tester_log_prefix: test_case.tester_log_prefix.clone(),
                title: test_case.title.clone(),
                is_quiet: false,
            })
            .collect();

        if !self.context.should_skip_anti_cheat_test_cases {
            for (i, test_case) in self.definition.anti_cheat_test_cases.iter().enumerate() {
                steps.push(TestRunnerStep {
                    test_case: test_case.clone(),
                    tester_log_prefix: format!("ac-{}", i + 1),
                    title: format!("AC{}", i + 1),
                    is_quiet: true,
                });
            }
        }

        steps
    }

    fn print_debug_context(&self) {
        if !self.context.is_debug {
            return;
        }

        let logger = get_logger(false, "");
        logger.plainln(&format!("Debug = {}", self.context.is_debug));
        logger.plainln("");
    }
}

/// Builds a tester from `env` and runs it, translating failures into exit
/// code 1 and user-visible log lines.
pub fn run_cli(env: &HashMap<String, String>, definition: TesterDefinition) -> i32 {
    match Tester::new(env, definition) {
        Ok(tester) => tester.run_cli(),
        Err(e) => {
            get_logger(false, "").plainln(&e.to_string());
            1
        }
    }
}
