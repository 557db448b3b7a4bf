/// Prefixed, color-coded logging for tester output.
///
/// All loggers in the process write through one serialized sink so that a
/// logger and its clones (or two unrelated loggers running on different
/// worker threads) never interleave partial lines. The sink is normally
/// stdout; the `testing` module swaps it for an in-memory buffer when
/// capturing output for fixture comparison.
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};

const RESET: &str = "\x1b[0m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BRIGHT_BLUE: &str = "\x1b[94m";
const BRIGHT_GREEN: &str = "\x1b[92m";
const BRIGHT_RED: &str = "\x1b[91m";

enum Sink {
    Stdout,
    Capture(Vec<u8>),
}

fn sink() -> &'static Mutex<Sink> {
    static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(Sink::Stdout))
}

/// Redirects all logger output into an in-memory buffer.
///
/// Callers must serialize capture sessions themselves; see
/// `testing::OutputCapture`.
pub(crate) fn redirect_output_to_capture() {
    *sink().lock().unwrap() = Sink::Capture(Vec::new());
}

/// Restores stdout output and returns everything captured since
/// `redirect_output_to_capture`.
pub(crate) fn take_captured_output() -> Vec<u8> {
    let mut guard = sink().lock().unwrap();
    match std::mem::replace(&mut *guard, Sink::Stdout) {
        Sink::Capture(bytes) => bytes,
        Sink::Stdout => Vec::new(),
    }
}

fn write_line(line: &str) {
    let mut guard = sink().lock().unwrap();
    match &mut *guard {
        Sink::Stdout => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{}", line);
        }
        Sink::Capture(bytes) => {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
    }
}

/// A cloneable logger with a primary prefix, a stack of secondary prefixes,
/// and debug/quiet gating.
///
/// Levels: success, info, error, debug, plain, critical. When quiet, only
/// critical messages are emitted; critical on a non-quiet logger is an
/// internal invariant violation. Debug messages are suppressed unless the
/// logger is in debug mode.
#[derive(Clone)]
pub struct Logger {
    /// Emit debug-level messages
    pub is_debug: bool,
    /// Suppress everything except critical messages
    pub is_quiet: bool,
    prefix: String,
    secondary_prefixes: Vec<String>,
}

/// Returns a logger writing to the shared sink.
pub fn get_logger(is_debug: bool, prefix: &str) -> Logger {
    Logger {
        is_debug,
        is_quiet: false,
        prefix: prefix.to_string(),
        secondary_prefixes: Vec::new(),
    }
}

/// Returns a logger that only emits critical messages. Used for anti-cheat
/// stages.
pub fn get_quiet_logger(prefix: &str) -> Logger {
    Logger {
        is_debug: false,
        is_quiet: true,
        prefix: prefix.to_string(),
        secondary_prefixes: Vec::new(),
    }
}

impl Logger {
    fn rendered_prefix(&self) -> String {
        let mut full = self.prefix.clone();
        for secondary in &self.secondary_prefixes {
            full.push_str(&format!("[{}] ", secondary));
        }

        if full.is_empty() {
            full
        } else {
            format!("{}{}{}", YELLOW, full, RESET)
        }
    }

    fn emit(&self, color: Option<&str>, msg: &str) {
        let prefix = self.rendered_prefix();

        for line in msg.split('\n') {
            match color {
                Some(color) => write_line(&format!("{}{}{}{}", prefix, color, line, RESET)),
                None => write_line(&format!("{}{}", prefix, line)),
            }
        }
    }

    pub fn successln(&self, msg: &str) {
        if self.is_quiet {
            return;
        }
        self.emit(Some(BRIGHT_GREEN), msg);
    }

    pub fn infoln(&self, msg: &str) {
        if self.is_quiet {
            return;
        }
        self.emit(Some(BRIGHT_BLUE), msg);
    }

    pub fn errorln(&self, msg: &str) {
        if self.is_quiet {
            return;
        }
        self.emit(Some(BRIGHT_RED), msg);
    }

    pub fn debugln(&self, msg: &str) {
        if !self.is_debug {
            return;
        }
        self.emit(Some(CYAN), msg);
    }

    /// Emits a line with the prefix but no level color.
    pub fn plainln(&self, msg: &str) {
        self.emit(None, msg);
    }

    /// To be used only by quiet loggers (anti-cheat stages).
    pub fn criticalln(&self, msg: &str) {
        if !self.is_quiet {
            panic!("critical is only for quiet loggers");
        }
        self.emit(Some(BRIGHT_RED), msg);
    }

    /// Returns a callable that feeds lines through `plainln`, suitable as an
    /// executable's logger function.
    pub fn plainln_fn(&self) -> Arc<dyn Fn(&str) + Send + Sync> {
        let logger = self.clone();
        Arc::new(move |msg| logger.plainln(msg))
    }

    pub fn get_secondary_prefixes(&self) -> &[String] {
        &self.secondary_prefixes
    }

    pub fn get_last_secondary_prefix(&self) -> Option<&str> {
        self.secondary_prefixes.last().map(String::as_str)
    }

    pub fn push_secondary_prefix(&mut self, prefix: &str) {
        self.secondary_prefixes.push(prefix.to_string());
    }

    pub fn pop_secondary_prefix(&mut self) -> Option<String> {
        self.secondary_prefixes.pop()
    }

    /// Replaces the secondary prefix at the top of the stack.
    pub fn update_last_secondary_prefix(&mut self, prefix: &str) {
        self.pop_secondary_prefix();
        self.push_secondary_prefix(prefix);
    }

    pub fn reset_secondary_prefixes(&mut self) {
        self.secondary_prefixes.clear();
    }

    /// Runs `f` with an extra secondary prefix pushed, popping it afterwards.
    pub fn with_additional_secondary_prefix<F>(&mut self, prefix: &str, f: F)
    where
        F: FnOnce(&mut Logger),
    {
        self.push_secondary_prefix(prefix);
        f(self);
        self.pop_secondary_prefix();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secondary_prefix_stack() {
        let mut logger = get_logger(false, "[stage-1] ");
        assert!(logger.get_secondary_prefixes().is_empty());

        logger.push_secondary_prefix("setup");
        logger.push_secondary_prefix("client-1");
        assert_eq!(logger.get_secondary_prefixes(), ["setup", "client-1"]);
        assert_eq!(logger.get_last_secondary_prefix(), Some("client-1"));

        logger.update_last_secondary_prefix("client-2");
        assert_eq!(logger.get_last_secondary_prefix(), Some("client-2"));

        assert_eq!(logger.pop_secondary_prefix().as_deref(), Some("client-2"));
        logger.reset_secondary_prefixes();
        assert!(logger.get_secondary_prefixes().is_empty());
    }

    #[test]
    fn test_rendered_prefix_is_push_ordered() {
        let mut logger = get_logger(false, "[stage-1] ");
        logger.push_secondary_prefix("a");
        logger.push_secondary_prefix("b");

        let rendered = logger.rendered_prefix();
        assert!(rendered.contains("[stage-1] [a] [b] "));
    }

    #[test]
    fn test_with_additional_secondary_prefix_is_scoped() {
        let mut logger = get_logger(false, "");
        logger.with_additional_secondary_prefix("scoped", |l| {
            assert_eq!(l.get_last_secondary_prefix(), Some("scoped"));
        });
        assert!(logger.get_secondary_prefixes().is_empty());
    }

    #[test]
    #[should_panic(expected = "critical is only for quiet loggers")]
    fn test_critical_rejected_outside_quiet_mode() {
        let logger = get_logger(false, "");
        logger.criticalln("nope");
    }

    #[test]
    fn test_clone_copies_prefix_stack() {
        let mut logger = get_logger(true, "[stage-2] ");
        logger.push_secondary_prefix("x");

        let mut clone = logger.clone();
        assert_eq!(clone.get_secondary_prefixes(), ["x"]);

        // The stacks diverge after cloning.
        clone.push_secondary_prefix("y");
        assert_eq!(logger.get_secondary_prefixes(), ["x"]);
    }
}
