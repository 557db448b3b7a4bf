//! End-to-end properties of the PTY topologies: carriage-return line
//! endings, stream separation across devices, in-band end-of-input, EIO
//! swallowing after child exit, and single-PTY session setup.

use std::path::PathBuf;
use std::time::Duration;

use testbox::executable::Executable;
use testbox::StdioHandler;

fn helper_path(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/test_helpers")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn pty_executable(path: &str) -> Executable {
    let mut executable = Executable::new(path);
    executable.memory_limit_bytes = 0;
    executable.set_stdio_handler(StdioHandler::pty_trio());
    executable
}

fn single_pty_executable(path: &str, rows: u16, cols: u16) -> Executable {
    let mut executable = Executable::new(path);
    executable.memory_limit_bytes = 0;
    executable.set_stdio_handler(StdioHandler::single_pty(rows, cols));
    executable
}

#[test]
fn test_pty_stdout_uses_crlf_line_endings() {
    let result = pty_executable(&helper_path("stdout_echo.sh"))
        .run(&["hey"])
        .unwrap();
    assert_eq!(result.stdout, b"hey\r\n");
    assert_eq!(result.stderr, b"");
    assert_eq!(result.exit_code, 0);
}

#[test]
fn test_pty_streams_stay_separate() {
    let result = pty_executable(&helper_path("stderr_echo.sh"))
        .run(&["hey"])
        .unwrap();
    assert_eq!(result.stdout, b"");
    assert_eq!(result.stderr, b"hey\r\n");
}

#[test]
fn test_pty_large_output_is_capped() {
    let result = pty_executable(&helper_path("large_echo.sh"))
        .run(&[])
        .unwrap();
    assert_eq!(result.stdout.len(), 30000);
    assert_eq!(result.stderr, b"blah\r\n");
}

#[test]
fn test_pty_exit_codes_are_reported() {
    let mut executable = pty_executable(&helper_path("exit_with.sh"));
    assert_eq!(executable.run(&["0"]).unwrap().exit_code, 0);
    assert_eq!(executable.run(&["1"]).unwrap().exit_code, 1);
}

#[test]
fn test_pty_segfault_reports_exit_code_139() {
    let result = pty_executable(&helper_path("segfault.sh"))
        .run(&[])
        .unwrap();
    assert_eq!(result.exit_code, 139);
}

#[test]
fn test_pty_stdin_delivers_line_and_eof() {
    let mut executable = pty_executable("grep");
    let result = executable.run_with_stdin(b"has cat", &["cat"]).unwrap();
    assert_eq!(result.exit_code, 0);

    let result = executable.run_with_stdin(b"only dog", &["cat"]).unwrap();
    assert_eq!(result.exit_code, 1);
}

#[test]
fn test_pty_timeout_is_swallowed_not_a_read_panic() {
    // The deadline SIGKILL makes master reads fail with EIO; that must be
    // treated as end-of-stream, not an error.
    let mut executable = pty_executable("sleep");
    executable.timeout = Duration::from_millis(50);

    let err = executable.run(&["10"]).unwrap_err();
    assert_eq!(err.to_string(), "execution timed out");
}

#[test]
fn test_pty_kill_terminates_cleanly() {
    let mut executable = pty_executable(&helper_path("sleep_for.sh"));
    executable.start(&["5"]).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(executable.kill().is_ok());
}

#[test]
fn test_pty_successive_runs_reuse_the_handle() {
    let mut executable = pty_executable(&helper_path("stdout_echo.sh"));

    let result = executable.run(&["1"]).unwrap();
    assert_eq!(result.stdout, b"1\r\n");

    let result = executable.run(&["2"]).unwrap();
    assert_eq!(result.stdout, b"2\r\n");
}

/// Starts, lets the child finish, then waits. With one shared device,
/// waiting while the child is alive would echo the in-band end-of-input
/// bytes into the captured output.
fn run_single_pty(
    executable: &mut Executable,
    args: &[&str],
) -> testbox::types::ExecutableResult {
    executable.start(args).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !executable.has_exited() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    executable.wait().unwrap()
}

#[test]
fn test_single_pty_captures_stdout_with_empty_stderr() {
    let mut executable = single_pty_executable(&helper_path("stdout_echo.sh"), 24, 80);
    let result = run_single_pty(&mut executable, &["hey"]);
    assert_eq!(result.stdout, b"hey\r\n");
    assert_eq!(result.stderr, b"");
    assert_eq!(result.exit_code, 0);
}

#[test]
fn test_single_pty_merges_stderr_into_stdout() {
    let mut executable = single_pty_executable(&helper_path("stderr_echo.sh"), 24, 80);
    let result = run_single_pty(&mut executable, &["oops"]);
    assert_eq!(result.stdout, b"oops\r\n");
    assert_eq!(result.stderr, b"");
}

#[test]
fn test_single_pty_child_has_a_controlling_terminal() {
    let mut executable = single_pty_executable("sh", 24, 80);
    let result = run_single_pty(&mut executable, &["-c", "test -t 0 && test -t 1"]);
    assert_eq!(result.exit_code, 0);

    // Pipes, by contrast, are not a terminal.
    let mut executable = Executable::new("sh");
    executable.memory_limit_bytes = 0;
    let result = executable.run(&["-c", "test -t 0"]).unwrap();
    assert_eq!(result.exit_code, 1);
}

#[test]
fn test_single_pty_applies_initial_window_size() {
    let mut executable = single_pty_executable("sh", 31, 117);
    let result = run_single_pty(&mut executable, &["-c", "stty size"]);
    assert_eq!(result.stdout, b"31 117\r\n");
}
