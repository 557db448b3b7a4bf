//! Runner-level properties: result aggregation across the worker pool, the
//! concurrency cap, per-test timeouts, and teardown execution.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use testbox::test_case_harness::TestCaseHarness;
use testbox::test_runner::{TestRunner, TestRunnerStep, MAX_CONCURRENT_WORKERS};
use testbox::tester_context::TesterContext;
use testbox::tester_definition::{TestCase, TestCaseFunc};
use testbox::testing::OutputCapture;
use testbox::types::{Result, TesterError};

fn context() -> TesterContext {
    TesterContext {
        executable_path: "/bin/true".into(),
        is_debug: false,
        test_cases: Vec::new(),
        should_skip_anti_cheat_test_cases: false,
        is_worker_process: false,
        worker_process_step_slug: None,
    }
}

fn quiet_step(slug: &str, test_func: TestCaseFunc, timeout: Option<Duration>) -> TestRunnerStep {
    TestRunnerStep {
        test_case: TestCase {
            slug: slug.to_string(),
            title: format!("Stage: {}", slug),
            test_func,
            timeout,
        },
        tester_log_prefix: slug.to_string(),
        title: format!("Stage: {}", slug),
        is_quiet: true,
    }
}

fn passing_test(_harness: &mut TestCaseHarness) -> Result<()> {
    Ok(())
}

fn failing_test(_harness: &mut TestCaseHarness) -> Result<()> {
    Err(TesterError::TestFailed("boom".to_string()))
}

fn slow_test(_harness: &mut TestCaseHarness) -> Result<()> {
    std::thread::sleep(Duration::from_secs(2));
    Ok(())
}

#[test]
fn test_all_passing_steps_yield_true() {
    let steps = (0..5)
        .map(|i| quiet_step(&format!("pass-{}", i), passing_test, None))
        .collect();

    assert!(TestRunner::new(steps, context(), false).run());
}

#[test]
fn test_any_failing_step_yields_false() {
    let mut steps: Vec<TestRunnerStep> = (0..4)
        .map(|i| quiet_step(&format!("pass-{}", i), passing_test, None))
        .collect();
    steps.push(quiet_step("fail-1", failing_test, None));

    assert!(!TestRunner::new(steps, context(), false).run());
}

#[test]
fn test_empty_step_list_yields_true() {
    assert!(TestRunner::new(Vec::new(), context(), false).run());
}

static LIVE_WORKERS: AtomicUsize = AtomicUsize::new(0);
static MAX_LIVE_WORKERS: AtomicUsize = AtomicUsize::new(0);

fn concurrency_probe_test(_harness: &mut TestCaseHarness) -> Result<()> {
    let live = LIVE_WORKERS.fetch_add(1, Ordering::SeqCst) + 1;
    MAX_LIVE_WORKERS.fetch_max(live, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    LIVE_WORKERS.fetch_sub(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn test_concurrency_never_exceeds_the_cap() {
    let steps = (0..32)
        .map(|i| quiet_step(&format!("probe-{}", i), concurrency_probe_test, None))
        .collect();

    assert!(TestRunner::new(steps, context(), false).run());
    assert!(MAX_LIVE_WORKERS.load(Ordering::SeqCst) <= MAX_CONCURRENT_WORKERS);
    assert_eq!(LIVE_WORKERS.load(Ordering::SeqCst), 0);
}

#[test]
fn test_per_test_timeout_fails_the_step() {
    let capture = OutputCapture::begin();

    let mut step = quiet_step("slow-1", slow_test, Some(Duration::from_millis(100)));
    step.is_quiet = false;
    let passed = TestRunner::new(vec![step], context(), false).run();

    let output = String::from_utf8_lossy(&capture.end()).into_owned();
    assert!(!passed);
    assert!(output.contains("timed out, test exceeded 0 seconds"));
}

static TEARDOWN_RAN: AtomicBool = AtomicBool::new(false);

fn failing_test_with_teardown(harness: &mut TestCaseHarness) -> Result<()> {
    harness.register_teardown(|_| {
        TEARDOWN_RAN.store(true, Ordering::SeqCst);
    });
    Err(TesterError::TestFailed("boom".to_string()))
}

#[test]
fn test_teardowns_run_after_a_failed_step() {
    let steps = vec![quiet_step("teardown-1", failing_test_with_teardown, None)];
    assert!(!TestRunner::new(steps, context(), false).run());
    assert!(TEARDOWN_RAN.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "no step found for slug")]
fn test_unknown_step_slug_is_fatal() {
    let runner = TestRunner::new(
        vec![quiet_step("known", passing_test, None)],
        context(),
        false,
    );
    runner.get_step_by_slug("unknown");
}

#[test]
fn test_get_step_by_slug_finds_steps() {
    let runner = TestRunner::new(
        vec![
            quiet_step("first", passing_test, None),
            quiet_step("second", passing_test, None),
        ],
        context(),
        false,
    );

    assert_eq!(runner.get_step_by_slug("second").test_case.slug, "second");
}
