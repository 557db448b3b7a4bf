/// Non-blocking bounded pipe between a stream relay and a test function.
///
/// The write side never blocks: if the reader is slow and the buffer fills
/// up, chunks are dropped. This is a correctness requirement for the relay,
/// which must keep draining the child's output even when nobody reads the
/// stream.
use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

pub struct BufferedPipeWriter {
    tx: Sender<Vec<u8>>,
}

pub struct BufferedPipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Creates a pipe holding at most `depth` queued chunks.
pub fn buffered_pipe(depth: usize) -> (BufferedPipeWriter, BufferedPipeReader) {
    let (tx, rx) = bounded(depth);
    (
        BufferedPipeWriter { tx },
        BufferedPipeReader {
            rx,
            pending: Vec::new(),
        },
    )
}

impl Write for BufferedPipeWriter {
    /// Queues `buf` for the reader. Never blocks; reports success even when
    /// the chunk is dropped (buffer full) or the reader is gone.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let _ = self.tx.try_send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for BufferedPipeReader {
    /// Blocks until data is available. Returns 0 (EOF) once the write side
    /// is closed and all queued chunks are consumed.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }

        match self.rx.recv() {
            Ok(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.pending.extend_from_slice(&chunk[n..]);
                }
                Ok(n)
            }
            Err(_) => Ok(0),
        }
    }
}

impl BufferedPipeReader {
    /// Non-blocking probe: returns a queued chunk if one is ready.
    pub fn try_read_chunk(&mut self) -> Option<Vec<u8>> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }

        match self.rx.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_round_trips() {
        let (mut writer, mut reader) = buffered_pipe(16);
        writer.write_all(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let (mut writer, mut reader) = buffered_pipe(16);
        writer.write_all(b"abcdef").unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"cd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ef");
    }

    #[test]
    fn test_full_buffer_drops_writes_without_blocking() {
        let (mut writer, _reader) = buffered_pipe(1);
        writer.write_all(b"kept").unwrap();
        // Must return immediately even though the buffer is full.
        writer.write_all(b"dropped").unwrap();
    }

    #[test]
    fn test_closed_writer_yields_eof_after_drain() {
        let (mut writer, mut reader) = buffered_pipe(16);
        writer.write_all(b"tail").unwrap();
        drop(writer);

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"tail");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
