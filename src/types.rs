/// Core types shared across the testbox system
use thiserror::Error;

/// Result of a single run of a candidate executable.
///
/// Both output fields are capped at the per-stream limit enforced by the
/// relay (see `executable`); anything past the cap is discarded.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct ExecutableResult {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
    /// Exit code. Termination by signal N is reported as 128 + N.
    pub exit_code: i32,
}

/// Custom error types for testbox
#[derive(Error, Debug)]
pub enum TesterError {
    /// Missing or malformed environment variables or YAML configuration
    #[error("{0}")]
    Context(String),

    /// The candidate executable could not be found
    #[error("{basename} not found")]
    ExecutableNotFound { basename: String },

    /// The resolved path exists but is not an executable file
    #[error("{path} (resolved to {resolved}) is not an executable file")]
    NotAnExecutable { path: String, resolved: String },

    /// A second Start was attempted while a child is live
    #[error("process already in progress")]
    AlreadyRunning,

    /// The per-run deadline elapsed before the child exited
    #[error("execution timed out")]
    ExecutionTimedOut,

    /// A user test function outlived its per-test timeout
    #[error("timed out, test exceeded {seconds} seconds")]
    TestTimedOut { seconds: u64 },

    /// The kernel OOM-killed the child for exceeding its memory cap.
    /// Carries the (truncated) output captured up to the kill.
    #[error("process exceeded memory limit ({limit})")]
    MemoryLimitExceeded {
        limit: String,
        result: ExecutableResult,
    },

    /// The child ignored SIGTERM and had to be SIGKILLed
    #[error("program failed to exit in 2 seconds after receiving sigterm")]
    KillTimeout,

    /// The OS refused to spawn the child
    #[error("failed to start process: {0}")]
    SpawnFailed(String),

    /// Resource-control group setup failed
    #[error("cgroup error: {0}")]
    Cgroup(String),

    /// Network namespace setup or teardown failed
    #[error("network namespace error: {0}")]
    Namespace(String),

    /// A user test function reported a failure
    #[error("{0}")]
    TestFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for testbox operations
pub type Result<T> = std::result::Result<T, TesterError>;
