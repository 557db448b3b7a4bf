/// Line-buffered adapter between a stream relay and a logger function.
///
/// Bytes are accumulated until a newline; each complete line is forwarded
/// with the newline stripped. `flush` forwards any trailing partial line so
/// output that does not end in a newline is not lost.
use std::io::{self, Write};

use super::LoggerFn;

pub struct LineWriter {
    logger_fn: LoggerFn,
    buf: Vec<u8>,
}

impl LineWriter {
    pub fn new(logger_fn: LoggerFn) -> Self {
        LineWriter {
            logger_fn,
            buf: Vec::new(),
        }
    }

    fn emit_complete_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            (self.logger_fn)(&String::from_utf8_lossy(line));
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        self.emit_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            (self.logger_fn)(&String::from_utf8_lossy(&line));
        }
        Ok(())
    }
}
