/// Helpers for testing concrete graders built on this crate.
///
/// `test_tester_output` drives a full tester run with the logger redirected
/// into a buffer, then compares the output byte-for-byte against a stored
/// fixture after a caller-supplied normalization. Setting
/// `CODECRAFTERS_RECORD_FIXTURES=true` re-records fixtures instead.
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::executable::Executable;
use crate::logger;
use crate::tester::run_cli;
use crate::tester_definition::TesterDefinition;

static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Exclusive capture of all logger output in the process. Holding the guard
/// serializes capture sessions across test threads.
pub struct OutputCapture {
    _guard: MutexGuard<'static, ()>,
}

impl OutputCapture {
    pub fn begin() -> OutputCapture {
        let guard = CAPTURE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        logger::redirect_output_to_capture();
        OutputCapture { _guard: guard }
    }

    /// Restores stdout logging and returns the captured bytes.
    pub fn end(self) -> Vec<u8> {
        logger::take_captured_output()
    }
}

pub struct TesterOutputTestCase {
    /// Directory containing the candidate code and `codecrafters.yml`.
    pub submission_path: PathBuf,

    /// Value for `CODECRAFTERS_TEST_CASES_JSON`.
    pub test_cases_json: String,

    /// Exit code the tester is expected to return.
    pub expected_exit_code: i32,

    /// File holding the expected stdout byte stream.
    pub stdout_fixture_path: PathBuf,

    /// Normalization applied to both sides before comparison. Useful for
    /// stripping timestamps and other run-dependent bytes.
    pub normalize_output_func: fn(Vec<u8>) -> Vec<u8>,
}

/// Runs the tester against a submission and asserts exit code and output.
/// Panics (the test-failure mechanism) on any mismatch.
pub fn test_tester_output(definition: TesterDefinition, test_case: &TesterOutputTestCase) {
    let capture = OutputCapture::begin();
    let exit_code = run_cli(&build_env(test_case), definition);
    let output = capture.end();

    if exit_code != test_case.expected_exit_code {
        panic!(
            "expected exit code {}, got {}\n\nstdout:\n{}",
            test_case.expected_exit_code,
            exit_code,
            String::from_utf8_lossy(&output)
        );
    }

    compare_output_with_fixture(
        output,
        test_case.normalize_output_func,
        &test_case.stdout_fixture_path,
    );
}

fn build_env(test_case: &TesterOutputTestCase) -> HashMap<String, String> {
    // Children may run with a different working directory, so a relative
    // submission path must be pinned down before the run starts.
    let submission_path = if test_case.submission_path.is_absolute() {
        test_case.submission_path.clone()
    } else {
        std::env::current_dir()
            .expect("working directory inaccessible")
            .join(&test_case.submission_path)
    };

    let mut env = HashMap::new();
    env.insert(
        "CODECRAFTERS_SUBMISSION_DIR".to_string(),
        submission_path.to_string_lossy().into_owned(),
    );
    env.insert(
        "CODECRAFTERS_TEST_CASES_JSON".to_string(),
        test_case.test_cases_json.clone(),
    );
    env
}

fn is_recording_fixtures() -> bool {
    std::env::var("CODECRAFTERS_RECORD_FIXTURES").as_deref() == Ok("true")
}

fn compare_output_with_fixture(
    output: Vec<u8>,
    normalize_output_func: fn(Vec<u8>) -> Vec<u8>,
    fixture_path: &Path,
) {
    if is_recording_fixtures() {
        if let Some(parent) = fixture_path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create fixture directory");
        }
        std::fs::write(fixture_path, &output).expect("failed to record fixture");
        return;
    }

    let fixture_contents = match std::fs::read(fixture_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => panic!(
            "fixture file {} does not exist. To create it, re-run with CODECRAFTERS_RECORD_FIXTURES=true",
            fixture_path.display()
        ),
        Err(e) => panic!("failed to read fixture {}: {}", fixture_path.display(), e),
    };

    let actual = normalize_output_func(output);
    let expected = normalize_output_func(fixture_contents);

    if actual == expected {
        return;
    }

    panic!(
        "tester output does not match fixture {}:\n\n{}\n\nRe-run with CODECRAFTERS_RECORD_FIXTURES=true to update fixtures",
        fixture_path.display(),
        render_diff(&expected, &actual)
    );
}

/// Renders a unified diff of expected vs. actual, shelling out to `diff`
/// through the crate's own executable runner.
fn render_diff(expected: &[u8], actual: &[u8]) -> String {
    let mut expected_file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    expected_file
        .write_all(expected)
        .expect("failed to write temp file");
    let mut actual_file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    actual_file
        .write_all(actual)
        .expect("failed to write temp file");

    let expected_path = expected_file.path().to_string_lossy().into_owned();
    let actual_path = actual_file.path().to_string_lossy().into_owned();
    let result =
        Executable::new("diff").run(&["-u", expected_path.as_str(), actual_path.as_str()]);

    match result {
        Ok(result) => {
            let diff = String::from_utf8_lossy(&result.stdout).into_owned();
            // The first two lines name the temp files, which mean nothing.
            diff.splitn(3, '\n').nth(2).unwrap_or(&diff).to_string()
        }
        Err(e) => format!("(diff unavailable: {})", e),
    }
}
