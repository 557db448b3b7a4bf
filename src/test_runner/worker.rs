/// Runs one step: a timed race between the user test function and the
/// per-test deadline, plus the optional worker-process mode that re-invokes
/// the tester inside a fresh network namespace.
use std::process::{Command, Stdio};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::executable::Executable;
use crate::logger::{get_logger, get_quiet_logger, Logger};
use crate::test_case_harness::TestCaseHarness;
use crate::tester_context::TesterContext;
use crate::types::{ExecutableResult, Result, TesterError};

use super::TestRunnerStep;

pub struct TestRunnerWorker<'a> {
    context: &'a TesterContext,
    step: &'a TestRunnerStep,
    network_namespace_name: Option<String>,
}

impl<'a> TestRunnerWorker<'a> {
    pub fn new(context: &'a TesterContext, step: &'a TestRunnerStep) -> TestRunnerWorker<'a> {
        TestRunnerWorker {
            context,
            step,
            network_namespace_name: None,
        }
    }

    fn get_logger(&self) -> Logger {
        if self.step.is_quiet {
            get_quiet_logger("")
        } else {
            get_logger(
                self.context.is_debug,
                &format!("[{}] ", self.step.tester_log_prefix),
            )
        }
    }

    fn get_executable(&self) -> Executable {
        let path = self.context.executable_path.to_string_lossy();

        if self.step.is_quiet {
            Executable::new(&path)
        } else {
            // The candidate's own stdout lines appear inline, prefixed.
            Executable::new_verbose(&path, get_logger(true, "[your_program] ").plainln_fn())
        }
    }

    /// Runs the step's test function in-process, racing it against the
    /// per-test timeout. Returns true iff the test passed.
    pub fn run(&self) -> bool {
        let logger = self.get_logger();
        let mut harness = TestCaseHarness::new(logger.clone(), self.get_executable());

        logger.infoln(&format!("Running tests for {}", self.step.title));

        let test_func = self.step.test_case.test_func;
        let (result_tx, result_rx) = bounded(1);
        thread::spawn(move || {
            let result = test_func(&mut harness);
            // On a timeout nobody receives; the harness (and its pending
            // teardowns) are released when the channel goes away.
            let _ = result_tx.send((result, harness));
        });

        let timeout = self.step.test_case.custom_or_default_timeout();

        let error = match result_rx.recv_timeout(timeout) {
            Ok((result, mut harness)) => {
                let error = result.err();
                match &error {
                    Some(e) => logger.errorln(&e.to_string()),
                    None => logger.successln("Test passed."),
                }
                harness.run_teardowns();
                error
            }
            Err(RecvTimeoutError::Timeout) => {
                let error = TesterError::TestTimedOut {
                    seconds: timeout.as_secs(),
                };
                logger.errorln(&error.to_string());
                Some(error)
            }
            Err(RecvTimeoutError::Disconnected) => {
                let error = TesterError::TestFailed("test function panicked".to_string());
                logger.errorln(&error.to_string());
                Some(error)
            }
        };

        error.is_none()
    }

    /// Runs the step in a re-invocation of the tester binary, isolated in a
    /// fresh network namespace. State crosses only through environment
    /// variables; the child's exit code is the verdict.
    pub fn run_process(&mut self, stream_output: bool) -> Result<bool> {
        self.create_network_namespace()?;

        let outcome = self.spawn_worker_process(stream_output);

        if let Err(e) = self.destroy_network_namespace() {
            log::warn!("failed to destroy network namespace: {}", e);
        }

        outcome
    }

    fn spawn_worker_process(&self, stream_output: bool) -> Result<bool> {
        let tester_executable = std::env::current_exe()?;
        let namespace = self
            .network_namespace_name
            .as_deref()
            .expect("network namespace not created");

        let mut cmd = Command::new("ip");
        cmd.args(["netns", "exec", namespace]);
        cmd.arg(&tester_executable);
        cmd.env("CODECRAFTERS_IS_WORKER_PROCESS", "true");
        cmd.env(
            "CODECRAFTERS_WORKER_PROCESS_STEP_SLUG",
            &self.step.test_case.slug,
        );

        if stream_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd
            .status()
            .map_err(|e| TesterError::SpawnFailed(e.to_string()))?;

        Ok(status.success())
    }

    fn create_network_namespace(&mut self) -> Result<()> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        let name = format!("test-ns-{}", nanos);

        let result = ip_executable().run(&["netns", "add", &name])?;
        check_ip_command(&result, "create network namespace")?;

        let result =
            ip_executable().run(&["netns", "exec", &name, "ip", "link", "set", "lo", "up"])?;
        if let Err(e) = check_ip_command(&result, "bring up loopback") {
            let _ = ip_executable().run(&["netns", "delete", &name]);
            return Err(e);
        }

        self.network_namespace_name = Some(name);
        Ok(())
    }

    fn destroy_network_namespace(&mut self) -> Result<()> {
        let name = match self.network_namespace_name.take() {
            Some(name) => name,
            None => return Ok(()),
        };

        let result = ip_executable().run(&["netns", "delete", &name])?;
        check_ip_command(&result, "delete network namespace")
    }
}

/// The `ip` tooling runs uncapped; the memory limit is for candidates.
fn ip_executable() -> Executable {
    let mut executable = Executable::new("ip");
    executable.memory_limit_bytes = 0;
    executable
}

fn check_ip_command(result: &ExecutableResult, action: &str) -> Result<()> {
    if result.exit_code == 0 {
        return Ok(());
    }

    Err(TesterError::Namespace(format!(
        "failed to {}: ip exited with {}: {}",
        action,
        result.exit_code,
        String::from_utf8_lossy(&result.stderr).trim()
    )))
}
