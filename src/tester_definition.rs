/// Definition-side test cases: what a concrete grader declares.
use std::time::Duration;

use crate::test_case_harness::TestCaseHarness;
use crate::types::Result;

const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A test function drives the candidate through the harness and returns
/// `Ok(())` on pass or an error describing the failure.
pub type TestCaseFunc = fn(&mut TestCaseHarness) -> Result<()>;

/// One gradable unit, declared by the grader.
#[derive(Clone, Debug)]
pub struct TestCase {
    /// Stable identifier. Example: "bind-to-port"
    pub slug: String,
    /// Human label. Example: "Bind to a port"
    pub title: String,
    pub test_func: TestCaseFunc,
    /// Per-test timeout; `None` falls back to the default.
    pub timeout: Option<Duration>,
}

impl TestCase {
    pub fn custom_or_default_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TEST_TIMEOUT)
    }
}

/// Everything a concrete grader declares about its stages.
#[derive(Debug)]
pub struct TesterDefinition {
    /// Name of the candidate executable inside the submission directory.
    /// Example: "your_program.sh"
    pub executable_file_name: String,

    pub test_cases: Vec<TestCase>,

    /// Hidden test cases appended after the visible ones and run quietly.
    pub anti_cheat_test_cases: Vec<TestCase>,

    /// When set, each step runs in a re-invocation of the tester inside its
    /// own network namespace instead of in-process.
    pub run_steps_in_worker_processes: bool,
}

impl TesterDefinition {
    pub fn test_case_by_slug(&self, slug: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.slug == slug)
    }
}
