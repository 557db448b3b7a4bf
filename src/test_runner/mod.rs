/// Fans test-case steps out across a bounded worker pool and aggregates
/// per-step pass/fail into one verdict.
pub mod worker;

use std::thread;

use crossbeam_channel::bounded;

use crate::tester_context::TesterContext;
use crate::tester_definition::TestCase;
use worker::TestRunnerWorker;

/// Upper bound on simultaneously running steps (and therefore on
/// simultaneously live candidate processes).
pub const MAX_CONCURRENT_WORKERS: usize = 8;

/// A definition test case paired with its per-invocation metadata.
pub struct TestRunnerStep {
    /// The test case that'll be run against the user's code.
    pub test_case: TestCase,

    /// Prefix for all logs the tester emits for this step. Example: "stage-1"
    pub tester_log_prefix: String,

    /// Display title. Example: "Stage #1: Bind to a port"
    pub title: String,

    /// Quiet steps (anti-cheat) only emit critical logs.
    pub is_quiet: bool,
}

pub struct TestRunner {
    pub steps: Vec<TestRunnerStep>,
    context: TesterContext,
    use_worker_processes: bool,
}

impl TestRunner {
    pub fn new(
        steps: Vec<TestRunnerStep>,
        context: TesterContext,
        use_worker_processes: bool,
    ) -> TestRunner {
        TestRunner {
            steps,
            context,
            use_worker_processes,
        }
    }

    /// Runs every step, at most `MAX_CONCURRENT_WORKERS` at a time, and
    /// returns true iff all of them passed.
    ///
    /// Submission order is sequential but completion order is not; only the
    /// outcome sets matter. A pass/fail accounting mismatch would silently
    /// misreport results, so it is fatal.
    pub fn run(&self) -> bool {
        let step_count = self.steps.len();
        if step_count == 0 {
            return true;
        }

        let (pass_tx, pass_rx) = bounded::<usize>(step_count);
        let (fail_tx, fail_rx) = bounded::<usize>(step_count);
        let (job_tx, job_rx) = bounded::<usize>(step_count);

        for index in 0..step_count {
            job_tx.send(index).expect("job channel sized to step count");
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..MAX_CONCURRENT_WORKERS.min(step_count) {
                let job_rx = job_rx.clone();
                let pass_tx = pass_tx.clone();
                let fail_tx = fail_tx.clone();

                scope.spawn(move || {
                    while let Ok(index) = job_rx.recv() {
                        let channel = if self.run_step(&self.steps[index]) {
                            &pass_tx
                        } else {
                            &fail_tx
                        };
                        channel
                            .send(index)
                            .expect("result channel sized to step count");
                    }
                });
            }
        });

        drop(pass_tx);
        drop(fail_tx);

        let mut passed: Vec<usize> = pass_rx.iter().collect();
        let failed: Vec<usize> = fail_rx.iter().collect();

        if passed.len() + failed.len() != step_count {
            panic!(
                "step accounting mismatch: {} passes + {} failures for {} steps",
                passed.len(),
                failed.len(),
                step_count
            );
        }

        if !failed.is_empty() {
            return false;
        }

        passed.sort_unstable();
        if passed != (0..step_count).collect::<Vec<_>>() {
            panic!("pass set does not match submitted steps: {:?}", passed);
        }

        true
    }

    fn run_step(&self, step: &TestRunnerStep) -> bool {
        if self.use_worker_processes && !self.context.is_worker_process {
            let mut worker = TestRunnerWorker::new(&self.context, step);
            match worker.run_process(!step.is_quiet) {
                Ok(passed) => passed,
                Err(e) => {
                    log::warn!("worker process for {} failed: {}", step.test_case.slug, e);
                    false
                }
            }
        } else {
            TestRunnerWorker::new(&self.context, step).run()
        }
    }

    /// Looks up a step by its test-case slug. Worker-process mode depends on
    /// this resolving, so an unknown slug is fatal.
    pub fn get_step_by_slug(&self, slug: &str) -> &TestRunnerStep {
        self.steps
            .iter()
            .find(|step| step.test_case.slug == slug)
            .unwrap_or_else(|| panic!("no step found for slug {:?}", slug))
    }

    pub fn context(&self) -> &TesterContext {
        &self.context
    }
}
