/// Stream topologies between the tester and a candidate process.
///
/// Three wirings are supported:
///
/// - `PipeTrio`: three anonymous pipes. The cheapest option and the default
///   for quiet runs.
/// - `PtyTrio`: three independent pseudo-terminal pairs. Separate devices
///   keep stdin echo out of stdout and stdout separate from stderr. Default
///   for verbose runs.
/// - `SinglePty`: one pseudo-terminal shared by all three streams; the child
///   starts a new session with the slave as its controlling terminal. For
///   candidates that require a real interactive TTY.
///
/// Child-side descriptors are handed to `std::process::Command`, which
/// closes the parent's copies right after spawn; the handler only ever owns
/// parent-side descriptors.
use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use super::pty::open_pty;
use crate::types::Result;

// Newline plus EOT: flushes the PTY line discipline, then signals
// end-of-input inside the terminal.
const PTY_STDIN_TERMINATOR: &[u8] = b"\n\x04";

pub enum StdioHandler {
    PipeTrio(PipeTrioState),
    PtyTrio(PtyTrioState),
    SinglePty(SinglePtyState),
}

#[derive(Default)]
pub struct PipeTrioState {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

#[derive(Default)]
pub struct PtyTrioState {
    stdin_master: Option<File>,
    stdout_master: Option<File>,
    stderr_master: Option<File>,
}

pub struct SinglePtyState {
    rows: u16,
    cols: u16,
    master: Option<File>,
}

impl StdioHandler {
    pub fn pipe_trio() -> Self {
        StdioHandler::PipeTrio(PipeTrioState::default())
    }

    pub fn pty_trio() -> Self {
        StdioHandler::PtyTrio(PtyTrioState::default())
    }

    /// Single shared PTY with the given initial window size. Both dimensions
    /// must be non-zero.
    pub fn single_pty(rows: u16, cols: u16) -> Self {
        StdioHandler::SinglePty(SinglePtyState {
            rows,
            cols,
            master: None,
        })
    }

    /// Whether the child becomes a session leader with a controlling TTY.
    /// Such children must not additionally be placed in a new process group
    /// by the spawner.
    pub fn starts_own_session(&self) -> bool {
        matches!(self, StdioHandler::SinglePty(_))
    }

    /// Whether parent-side readers are PTY masters. Determines how read
    /// errors after child exit are interpreted.
    pub fn is_tty(&self) -> bool {
        !matches!(self, StdioHandler::PipeTrio(_))
    }

    /// Wires the topology's child-side descriptors into the spawn request.
    ///
    /// For PTY topologies this opens the device pairs; a failure after a
    /// partial open drops (and thereby closes) the pairs opened so far.
    pub fn setup_streams(&mut self, cmd: &mut Command) -> Result<()> {
        match self {
            StdioHandler::PipeTrio(_) => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }

            StdioHandler::PtyTrio(state) => {
                let stdin_pair = open_pty(None)?;
                let stdout_pair = open_pty(None)?;
                let stderr_pair = open_pty(None)?;

                cmd.stdin(Stdio::from(stdin_pair.slave))
                    .stdout(Stdio::from(stdout_pair.slave))
                    .stderr(Stdio::from(stderr_pair.slave));

                state.stdin_master = Some(File::from(stdin_pair.master));
                state.stdout_master = Some(File::from(stdout_pair.master));
                state.stderr_master = Some(File::from(stderr_pair.master));
            }

            StdioHandler::SinglePty(state) => {
                if state.rows == 0 || state.cols == 0 {
                    panic!("single-PTY topology selected with a zero window size");
                }

                let pair = open_pty(Some((state.rows, state.cols)))?;

                let stdin_fd: OwnedFd = pair.slave.try_clone()?;
                let stdout_fd: OwnedFd = pair.slave.try_clone()?;
                cmd.stdin(Stdio::from(stdin_fd))
                    .stdout(Stdio::from(stdout_fd))
                    .stderr(Stdio::from(pair.slave));

                // The child starts a fresh session and adopts the slave (its
                // stdin) as controlling terminal. setsid requires the caller
                // not to be a process group leader, so no setpgid here.
                unsafe {
                    cmd.pre_exec(|| {
                        if libc::setsid() == -1 {
                            return Err(std::io::Error::last_os_error());
                        }
                        if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                            return Err(std::io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }

                state.master = Some(File::from(pair.master));
            }
        }

        Ok(())
    }

    /// Takes ownership of the parent-side pipe endpoints created by spawn.
    /// Only the pipe topology has any; PTY masters were opened up front.
    pub fn capture_child_handles(&mut self, child: &mut Child) {
        if let StdioHandler::PipeTrio(state) = self {
            state.stdin = child.stdin.take().map(|h| File::from(OwnedFd::from(h)));
            state.stdout = child.stdout.take().map(|h| File::from(OwnedFd::from(h)));
            state.stderr = child.stderr.take().map(|h| File::from(OwnedFd::from(h)));
        }
    }

    /// Returns the reader for the child's stdout, for a relay to own.
    ///
    /// Pipe endpoints are moved out; PTY masters are duplicated so the
    /// handler can still write to (and close) the original.
    pub fn stdout_reader(&mut self) -> Result<Option<File>> {
        match self {
            StdioHandler::PipeTrio(state) => Ok(state.stdout.take()),
            StdioHandler::PtyTrio(state) => dup_reader(&state.stdout_master),
            StdioHandler::SinglePty(state) => dup_reader(&state.master),
        }
    }

    /// Returns the reader for the child's stderr.
    ///
    /// The single-PTY topology has no independent stderr device; exposing
    /// the shared master twice would race two readers on one descriptor, so
    /// it reports no reader and the stream is recorded as empty.
    pub fn stderr_reader(&mut self) -> Result<Option<File>> {
        match self {
            StdioHandler::PipeTrio(state) => Ok(state.stderr.take()),
            StdioHandler::PtyTrio(state) => dup_reader(&state.stderr_master),
            StdioHandler::SinglePty(_) => Ok(None),
        }
    }

    /// Writes `data` to the child's stdin.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let writer = match self {
            StdioHandler::PipeTrio(state) => state.stdin.as_mut(),
            StdioHandler::PtyTrio(state) => state.stdin_master.as_mut(),
            StdioHandler::SinglePty(state) => state.master.as_mut(),
        };

        if let Some(writer) = writer {
            writer.write_all(data)?;
        }

        Ok(())
    }

    /// Signals end-of-input to the child.
    ///
    /// On pipes the write end is closed. On a PTY the device stays open (the
    /// master must keep serving reads), so end-of-input is signalled in-band
    /// with newline + EOT.
    pub fn terminate_stdin(&mut self) -> Result<()> {
        match self {
            StdioHandler::PipeTrio(state) => {
                state.stdin.take();
                Ok(())
            }
            StdioHandler::PtyTrio(state) => {
                if let Some(master) = state.stdin_master.as_mut() {
                    master.write_all(PTY_STDIN_TERMINATOR)?;
                }
                Ok(())
            }
            StdioHandler::SinglePty(state) => {
                if let Some(master) = state.master.as_mut() {
                    master.write_all(PTY_STDIN_TERMINATOR)?;
                }
                Ok(())
            }
        }
    }

    /// Closes every parent-side descriptor the handler still holds.
    /// Descriptors already moved out or closed are skipped.
    pub fn close_parent_streams(&mut self) {
        match self {
            StdioHandler::PipeTrio(state) => {
                state.stdin.take();
                state.stdout.take();
                state.stderr.take();
            }
            StdioHandler::PtyTrio(state) => {
                state.stdin_master.take();
                state.stdout_master.take();
                state.stderr_master.take();
            }
            StdioHandler::SinglePty(state) => {
                state.master.take();
            }
        }
    }

    /// A handler of the same topology and configuration with no open
    /// descriptors.
    pub fn clone_fresh(&self) -> StdioHandler {
        match self {
            StdioHandler::PipeTrio(_) => StdioHandler::pipe_trio(),
            StdioHandler::PtyTrio(_) => StdioHandler::pty_trio(),
            StdioHandler::SinglePty(state) => StdioHandler::single_pty(state.rows, state.cols),
        }
    }
}

fn dup_reader(master: &Option<File>) -> Result<Option<File>> {
    match master {
        Some(file) => Ok(Some(file.try_clone()?)),
        None => Ok(None),
    }
}
