//! testbox: a staged black-box grading harness
//!
//! Drives candidate programs through scripted test stages: launches them
//! over pipes or pseudo-terminals, captures output under hard caps, enforces
//! wall-clock and memory limits, terminates process groups reliably, and
//! fans stages out across a bounded worker pool.

pub mod executable;
pub mod logger;
pub mod random;
pub mod test_case_harness;
pub mod test_runner;
pub mod tester;
pub mod tester_context;
pub mod tester_definition;
pub mod testing;
pub mod types;

pub use executable::{Executable, StdioHandler};
pub use logger::{get_logger, get_quiet_logger, Logger};
pub use test_case_harness::TestCaseHarness;
pub use test_runner::{TestRunner, TestRunnerStep};
pub use tester::{run_cli, Tester};
pub use tester_definition::{TestCase, TesterDefinition};
pub use types::{ExecutableResult, Result, TesterError};
