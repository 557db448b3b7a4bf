/// Per-step harness handed to a user test function.
///
/// Exposes the step's logger and the candidate executable, and collects
/// teardown closures. Teardowns run in reverse registration order once the
/// test completes; any still pending when the harness is dropped (for
/// example after a per-test timeout abandoned the test thread) run at drop,
/// so cleanup is never skipped.
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::executable::Executable;
use crate::logger::Logger;

type TeardownFunc = Box<dyn FnOnce(&mut TestCaseHarness) + Send>;

pub struct TestCaseHarness {
    /// Logger for all output of the test function.
    pub logger: Logger,
    /// The candidate program under test.
    pub executable: Executable,

    teardown_funcs: Vec<TeardownFunc>,
}

impl TestCaseHarness {
    pub fn new(logger: Logger, executable: Executable) -> TestCaseHarness {
        TestCaseHarness {
            logger,
            executable,
            teardown_funcs: Vec::new(),
        }
    }

    /// Registers a closure to run after the test, typically to kill a
    /// long-lived candidate:
    ///
    /// ```ignore
    /// harness.register_teardown(|h| {
    ///     let _ = h.executable.kill();
    /// });
    /// ```
    pub fn register_teardown<F>(&mut self, teardown: F)
    where
        F: FnOnce(&mut TestCaseHarness) + Send + 'static,
    {
        self.teardown_funcs.push(Box::new(teardown));
    }

    /// Runs all registered teardowns in reverse registration order. A
    /// panicking teardown is swallowed so it cannot mask the ones after it.
    pub fn run_teardowns(&mut self) {
        while let Some(teardown) = self.teardown_funcs.pop() {
            if catch_unwind(AssertUnwindSafe(|| teardown(self))).is_err() {
                log::warn!("teardown function panicked");
            }
        }
    }
}

impl Drop for TestCaseHarness {
    fn drop(&mut self) {
        self.run_teardowns();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::get_quiet_logger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn harness() -> TestCaseHarness {
        TestCaseHarness::new(get_quiet_logger(""), Executable::new("true"))
    }

    #[test]
    fn test_teardowns_run_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut harness = harness();

        for i in 0..3 {
            let order = Arc::clone(&order);
            harness.register_teardown(move |_| order.lock().unwrap().push(i));
        }

        harness.run_teardowns();
        assert_eq!(*order.lock().unwrap(), [2, 1, 0]);
    }

    #[test]
    fn test_panicking_teardown_does_not_mask_others() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut harness = harness();

        {
            let ran = Arc::clone(&ran);
            harness.register_teardown(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        harness.register_teardown(|_| panic!("broken teardown"));

        harness.run_teardowns();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_teardowns_run_on_drop() {
        let ran = Arc::new(AtomicUsize::new(0));

        {
            let mut harness = harness();
            let ran = Arc::clone(&ran);
            harness.register_teardown(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_teardowns_twice_is_safe() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut harness = harness();

        {
            let ran = Arc::clone(&ran);
            harness.register_teardown(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        harness.run_teardowns();
        harness.run_teardowns();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
