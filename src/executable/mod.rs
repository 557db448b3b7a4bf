/// Child process lifecycle for candidate programs.
///
/// An `Executable` owns one child at a time: it resolves the program path,
/// spawns the child in its own process group wired to the configured stdio
/// topology, relays output into bounded buffers and a line-buffered logger
/// without ever back-pressuring the child, enforces a wall-clock deadline
/// and an out-of-band memory cap, and terminates the whole process group
/// with SIGTERM-then-SIGKILL escalation.
pub mod buffered_pipe;
pub mod line_writer;
pub mod memory_monitor;
pub mod pty;
pub mod stdio_handler;

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::Pid;

use crate::types::{ExecutableResult, Result, TesterError};
use buffered_pipe::{buffered_pipe, BufferedPipeReader, BufferedPipeWriter};
use line_writer::LineWriter;
use memory_monitor::{format_bytes_human_readable, MemoryMonitor};
pub use memory_monitor::get_memory_limit_in_bytes;
pub use stdio_handler::StdioHandler;

/// Callback receiving each line of child output (and relay warnings).
pub type LoggerFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Hard cap on captured bytes per stream. The relay keeps draining past the
/// cap so the child never blocks on a full pipe, but nothing more is stored.
pub const OUTPUT_CAP_BYTES: usize = 30_000;

/// Queued-chunk depth of each exposed streaming pipe.
const STREAM_DEPTH: usize = 30_000;

/// How long a SIGTERMed child gets before SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Returns a logger function that discards everything.
pub fn null_logger() -> LoggerFn {
    Arc::new(|_| {})
}

/// A runnable candidate program.
///
/// Configuration fields are public and stable across runs; live state is
/// created by `start` and torn down by `wait`. The handle can be reused for
/// successive runs but never for concurrent ones.
pub struct Executable {
    /// Path of the program; bare names are searched in `PATH`.
    pub path: String,
    /// Wall-clock deadline for one run.
    pub timeout: Duration,
    /// Memory cap in bytes; 0 or less disables the cap.
    pub memory_limit_bytes: i64,
    /// Working directory for the child; `None` inherits the tester's.
    pub working_dir: Option<PathBuf>,
    /// Child environment; `None` inherits the tester's. Variables named
    /// `CODECRAFTERS_SECRET*` are stripped either way.
    pub env: Option<Vec<(String, String)>>,

    logger_fn: LoggerFn,
    stdio_handler: StdioHandler,
    state: Option<LiveState>,
}

struct LiveState {
    child: Child,
    pid: i32,
    relay_count: usize,
    read_done_rx: Receiver<()>,
    exited: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    cancel_watchdog: Option<Sender<()>>,
    watchdog: Option<JoinHandle<()>>,
    memory_monitor: MemoryMonitor,
    stdout_buffer: Arc<Mutex<Vec<u8>>>,
    stderr_buffer: Arc<Mutex<Vec<u8>>>,
    stdout_stream: Option<BufferedPipeReader>,
    stderr_stream: Option<BufferedPipeReader>,
}

impl Executable {
    /// A quiet executable: discarded output lines, pipe-trio streams.
    pub fn new(path: &str) -> Executable {
        Executable {
            path: path.to_string(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit_bytes: get_memory_limit_in_bytes(),
            working_dir: None,
            env: None,
            logger_fn: null_logger(),
            stdio_handler: StdioHandler::pipe_trio(),
            state: None,
        }
    }

    /// A verbose executable: output lines go to `logger_fn`, streams run
    /// over a PTY trio.
    pub fn new_verbose(path: &str, logger_fn: LoggerFn) -> Executable {
        Executable {
            path: path.to_string(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit_bytes: get_memory_limit_in_bytes(),
            working_dir: None,
            env: None,
            logger_fn,
            stdio_handler: StdioHandler::pty_trio(),
            state: None,
        }
    }

    /// Replaces the stream topology. Only valid while no child is live.
    pub fn set_stdio_handler(&mut self, handler: StdioHandler) {
        if self.state.is_some() {
            panic!("cannot change stdio topology while a process is live");
        }
        self.stdio_handler = handler;
    }

    fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// True once at least one stream relay observed end-of-output.
    pub fn has_exited(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.exited.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Hands out the read side of the stdout streaming pipe, if a child is
    /// live and nobody took it yet. Reads never block the child.
    pub fn take_stdout_stream(&mut self) -> Option<BufferedPipeReader> {
        self.state.as_mut().and_then(|s| s.stdout_stream.take())
    }

    /// Read side of the stderr streaming pipe. Empty for the single-PTY
    /// topology, which has no separate stderr device.
    pub fn take_stderr_stream(&mut self) -> Option<BufferedPipeReader> {
        self.state.as_mut().and_then(|s| s.stderr_stream.take())
    }

    /// Starts the program but does not wait for it to complete.
    pub fn start(&mut self, args: &[&str]) -> Result<()> {
        if self.is_running() {
            return Err(TesterError::AlreadyRunning);
        }

        let absolute_path = resolve_absolute_path(&self.path);

        let basename = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());
        let metadata = std::fs::metadata(&absolute_path)
            .map_err(|_| TesterError::ExecutableNotFound { basename })?;

        if metadata.is_dir() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(TesterError::NotAnExecutable {
                path: self.path.clone(),
                resolved: absolute_path.to_string_lossy().into_owned(),
            });
        }

        let mut cmd = Command::new(&absolute_path);
        cmd.args(args);
        cmd.env_clear();
        cmd.envs(self.initialize_safe_env());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        // New process group so SIGTERM/SIGKILL to the negated pid reaches
        // descendants. Session leaders (single-PTY) set up their own group.
        if !self.stdio_handler.starts_own_session() {
            cmd.process_group(0);
        }

        self.stdio_handler.setup_streams(&mut cmd)?;

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.stdio_handler.close_parent_streams();
                return Err(TesterError::SpawnFailed(e.to_string()));
            }
        };

        self.stdio_handler.capture_child_handles(&mut child);
        let pid = child.id() as i32;

        let mut memory_monitor = MemoryMonitor::new(self.memory_limit_bytes);
        if let Err(e) = memory_monitor.start(child.id()) {
            self.abort_spawned_child(&mut child, pid);
            return Err(e);
        }

        let timed_out = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let watchdog = spawn_deadline_watchdog(pid, self.timeout, cancel_rx, Arc::clone(&timed_out));

        let exited = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<()>(2);
        let is_tty = self.stdio_handler.is_tty();

        let stdout_buffer = Arc::new(Mutex::new(Vec::new()));
        let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
        let (stdout_stream_tx, stdout_stream_rx) = buffered_pipe(STREAM_DEPTH);
        let (stderr_stream_tx, stderr_stream_rx) = buffered_pipe(STREAM_DEPTH);

        let mut relay_count = 0;

        let stdout_reader = match self.stdio_handler.stdout_reader() {
            Ok(reader) => reader,
            Err(e) => {
                self.abort_spawned_child(&mut child, pid);
                return Err(e);
            }
        };
        if let Some(reader) = stdout_reader {
            spawn_io_relay(
                reader,
                is_tty,
                Arc::clone(&stdout_buffer),
                LineWriter::new(Arc::clone(&self.logger_fn)),
                stdout_stream_tx,
                Arc::clone(&self.logger_fn),
                Arc::clone(&exited),
                done_tx.clone(),
            );
            relay_count += 1;
        }

        let stderr_reader = match self.stdio_handler.stderr_reader() {
            Ok(reader) => reader,
            Err(e) => {
                self.abort_spawned_child(&mut child, pid);
                return Err(e);
            }
        };
        if let Some(reader) = stderr_reader {
            spawn_io_relay(
                reader,
                is_tty,
                Arc::clone(&stderr_buffer),
                LineWriter::new(Arc::clone(&self.logger_fn)),
                stderr_stream_tx,
                Arc::clone(&self.logger_fn),
                Arc::clone(&exited),
                done_tx,
            );
            relay_count += 1;
        }

        self.state = Some(LiveState {
            child,
            pid,
            relay_count,
            read_done_rx: done_rx,
            exited,
            timed_out,
            cancel_watchdog: Some(cancel_tx),
            watchdog: Some(watchdog),
            memory_monitor,
            stdout_buffer,
            stderr_buffer,
            stdout_stream: Some(stdout_stream_rx),
            stderr_stream: Some(stderr_stream_rx),
        });

        Ok(())
    }

    /// Starts the program and waits for it to complete.
    pub fn run(&mut self, args: &[&str]) -> Result<ExecutableResult> {
        self.start(args)?;
        self.wait()
    }

    /// Starts the program, writes `stdin` to it verbatim (callers supply
    /// their own framing), and waits for it to complete.
    pub fn run_with_stdin(&mut self, stdin: &[u8], args: &[&str]) -> Result<ExecutableResult> {
        self.start(args)?;
        // A child that exits without reading its input is not an error; the
        // result still carries whatever it produced.
        let _ = self.stdio_handler.write_stdin(stdin);
        self.wait()
    }

    /// Waits for the program to finish and returns its result.
    ///
    /// Signals end-of-input, waits for every relay to drain, reaps the
    /// child, and derives the exit code (termination by signal N becomes
    /// 128 + N). A fired deadline yields `ExecutionTimedOut` with no
    /// payload; an OOM kill yields `MemoryLimitExceeded` carrying the
    /// truncated payload. The handle returns to idle either way.
    pub fn wait(&mut self) -> Result<ExecutableResult> {
        let mut state = self
            .state
            .take()
            .expect("wait called with no live process");

        // A dead child makes this write fail with EIO on a PTY; end-of-input
        // no longer matters at that point.
        let _ = self.stdio_handler.terminate_stdin();

        for _ in 0..state.relay_count {
            let _ = state.read_done_rx.recv();
        }

        let wait_outcome = state.child.wait();

        // The deadline verdict is only stable once the watchdog is done.
        state.cancel_watchdog.take();
        if let Some(watchdog) = state.watchdog.take() {
            let _ = watchdog.join();
        }
        let timed_out = state.timed_out.load(Ordering::SeqCst);

        let was_oom_killed = state.memory_monitor.was_oom_killed();
        state.memory_monitor.stop();

        let stdout = std::mem::take(&mut *state.stdout_buffer.lock().unwrap());
        let stderr = std::mem::take(&mut *state.stderr_buffer.lock().unwrap());

        self.stdio_handler.close_parent_streams();
        self.stdio_handler = self.stdio_handler.clone_fresh();

        let status = wait_outcome?;
        let exit_code = match status.code() {
            Some(code) => code,
            None => match status.signal() {
                Some(signal) => 128 + signal,
                None => -1,
            },
        };

        let result = ExecutableResult {
            stdout,
            stderr,
            exit_code,
        };

        if timed_out {
            return Err(TesterError::ExecutionTimedOut);
        }

        if was_oom_killed {
            return Err(TesterError::MemoryLimitExceeded {
                limit: format_bytes_human_readable(self.memory_limit_bytes),
                result,
            });
        }

        Ok(result)
    }

    /// Terminates the program and its process group.
    ///
    /// Succeeds silently when no child is live. Sends SIGTERM to the pid and
    /// the group; if the child has not exited within the grace period it is
    /// SIGKILLed and `KillTimeout` is returned.
    pub fn kill(&mut self) -> Result<()> {
        let pid = match &self.state {
            Some(state) => state.pid,
            None => return Ok(()),
        };

        let _ = send_signal(Pid::from_raw(pid), Signal::SIGTERM);
        let _ = send_signal(Pid::from_raw(-pid), Signal::SIGTERM);

        let deadline = Instant::now() + KILL_GRACE_PERIOD;
        let mut exited_in_time = false;
        while Instant::now() < deadline {
            match self.state.as_mut().unwrap().child.try_wait() {
                Ok(Some(_)) | Err(_) => {
                    exited_in_time = true;
                    break;
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
            }
        }

        if exited_in_time {
            self.wait().map(|_| ())
        } else {
            let _ = send_signal(Pid::from_raw(pid), Signal::SIGKILL);
            let _ = send_signal(Pid::from_raw(-pid), Signal::SIGKILL);
            let _ = self.wait();
            Err(TesterError::KillTimeout)
        }
    }

    /// Environment for the child: caller-supplied or inherited, minus every
    /// variable whose name starts with `CODECRAFTERS_SECRET`.
    fn initialize_safe_env(&self) -> Vec<(String, String)> {
        let vars: Vec<(String, String)> = match &self.env {
            Some(env) => env.clone(),
            None => std::env::vars().collect(),
        };

        vars.into_iter()
            .filter(|(name, _)| !name.starts_with("CODECRAFTERS_SECRET"))
            .collect()
    }

    /// Cleanup for failures between spawn and a fully-started state: kill
    /// the group, reap the child, close our descriptors.
    fn abort_spawned_child(&mut self, child: &mut Child, pid: i32) {
        let _ = send_signal(Pid::from_raw(pid), Signal::SIGKILL);
        let _ = send_signal(Pid::from_raw(-pid), Signal::SIGKILL);
        let _ = child.wait();
        self.stdio_handler.close_parent_streams();
    }
}

impl Clone for Executable {
    /// Copies the configuration; the clone starts idle with a fresh stdio
    /// handler of the same topology.
    fn clone(&self) -> Executable {
        Executable {
            path: self.path.clone(),
            timeout: self.timeout,
            memory_limit_bytes: self.memory_limit_bytes,
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            logger_fn: Arc::clone(&self.logger_fn),
            stdio_handler: self.stdio_handler.clone_fresh(),
            state: None,
        }
    }
}

/// SIGKILLs the process group when the deadline elapses before cancellation.
fn spawn_deadline_watchdog(
    pid: i32,
    timeout: Duration,
    cancel_rx: Receiver<()>,
    timed_out: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || match cancel_rx.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        Err(RecvTimeoutError::Timeout) => {
            timed_out.store(true, Ordering::SeqCst);
            let _ = send_signal(Pid::from_raw(pid), Signal::SIGKILL);
            let _ = send_signal(Pid::from_raw(-pid), Signal::SIGKILL);
        }
    })
}

/// Relays one child stream into the bounded capture buffer, the
/// line-buffered logger, and the exposed streaming pipe.
///
/// Stops storing at the per-stream cap (with a one-time warning), signals
/// completion, then keeps draining to a discard sink so the child is never
/// back-pressured. On a PTY master, EIO after the child closed the slave is
/// a normal end-of-stream. Any other read error indicates an OS-level bug
/// and is fatal.
#[allow(clippy::too_many_arguments)]
fn spawn_io_relay(
    mut source: File,
    source_is_tty: bool,
    buffer: Arc<Mutex<Vec<u8>>>,
    mut line_writer: LineWriter,
    mut stream: BufferedPipeWriter,
    logger_fn: LoggerFn,
    exited: Arc<AtomicBool>,
    done_tx: Sender<()>,
) {
    use std::io::Write;

    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        let mut captured = 0usize;

        loop {
            if captured == OUTPUT_CAP_BYTES {
                break;
            }

            let want = chunk.len().min(OUTPUT_CAP_BYTES - captured);
            match source.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.lock().unwrap().extend_from_slice(&chunk[..n]);
                    let _ = line_writer.write_all(&chunk[..n]);
                    let _ = stream.write_all(&chunk[..n]);
                    captured += n;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if source_is_tty && e.raw_os_error() == Some(libc::EIO) {
                        break;
                    }
                    panic!("failed to read from child stream: {}", e);
                }
            }
        }

        if captured == OUTPUT_CAP_BYTES {
            logger_fn("Warning: Logs exceeded allowed limit, output might be truncated.");
        }

        let _ = line_writer.flush();
        drop(stream);
        exited.store(true, Ordering::SeqCst);
        let _ = done_tx.send(());

        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });
}

/// Resolves a program path: a string containing a separator is made
/// absolute against the working directory; a bare name is searched in
/// `PATH`, falling back to the absolute of the name itself.
fn resolve_absolute_path(path: &str) -> PathBuf {
    if path.contains('/') {
        return absolutize(Path::new(path));
    }

    if let Some(search_path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&search_path) {
            let candidate = dir.join(path);
            if let Ok(metadata) = std::fs::metadata(&candidate) {
                if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                    return absolutize(&candidate);
                }
            }
        }
    }

    absolutize(Path::new(path))
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
