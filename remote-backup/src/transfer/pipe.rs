//! Bounded byte pipe between one producer and one consumer.
//!
//! Bytes travel as chunks through a fixed-capacity channel, so at most
//! `buffer_size` bytes (plus the chunk being assembled) are in memory no
//! matter how large the stream is. A full channel suspends the producer and
//! an empty one suspends the consumer.
//!
//! A producer failure is delivered in-band: the last item the consumer sees
//! is the error, never a clean end-of-stream. End-of-stream is only reported
//! after every writer handle has been dropped.
//!
//! Both ends have a blocking flavour (`std::io::Write` / `std::io::Read`,
//! for use inside `spawn_blocking`) and an async flavour.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Default pipe capacity between stream stages (4 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Size of a single chunk travelling through the pipe (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

type Item = io::Result<Bytes>;

/// Create a pipe holding at most `buffer_size` bytes in flight.
pub fn pipe(buffer_size: usize) -> (PipeWriter, PipeReader) {
    pipe_with_chunk_size(buffer_size, CHUNK_SIZE)
}

/// Create a pipe with an explicit chunk size.
pub fn pipe_with_chunk_size(buffer_size: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let chunk_size = chunk_size.max(1);
    let slots = (buffer_size / chunk_size).max(1);
    let (tx, rx) = mpsc::channel(slots);
    (
        PipeWriter {
            tx,
            pending: BytesMut::with_capacity(chunk_size),
            chunk_size,
        },
        PipeReader {
            rx,
            current: Bytes::new(),
            failed: false,
        },
    )
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader was dropped")
}

/// Producer end of the pipe.
pub struct PipeWriter {
    tx: mpsc::Sender<Item>,
    pending: BytesMut,
    chunk_size: usize,
}

impl PipeWriter {
    /// Handle that can fail the stream after the writer itself has been
    /// moved into an encoder.
    pub fn abort_handle(&self) -> PipeAbortHandle {
        PipeAbortHandle {
            tx: self.tx.clone(),
        }
    }

    /// Flush buffered bytes and close the stream cleanly (blocking).
    pub fn finish(mut self) -> io::Result<()> {
        self.flush()
    }

    /// Send one chunk (async producers).
    pub async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(Ok(chunk)).await.map_err(|_| broken_pipe())
    }

    /// Close the stream with an error (async producers).
    pub async fn fail(self, err: io::Error) {
        let _ = self.tx.send(Err(err)).await;
    }

    fn send_pending_blocking(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.tx.blocking_send(Ok(chunk)).map_err(|_| broken_pipe())
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.pending.len();
        let n = room.min(buf.len());
        self.pending.extend_from_slice(&buf[..n]);
        if self.pending.len() >= self.chunk_size {
            self.send_pending_blocking()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending_blocking()
    }
}

/// Fails a pipe from the producer side.
pub struct PipeAbortHandle {
    tx: mpsc::Sender<Item>,
}

impl PipeAbortHandle {
    /// Deliver `err` to the consumer (blocking). A consumer that already
    /// went away is ignored.
    pub fn fail(self, err: io::Error) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

/// Consumer end of the pipe.
pub struct PipeReader {
    rx: mpsc::Receiver<Item>,
    current: Bytes,
    failed: bool,
}

impl PipeReader {
    fn copy_current(&mut self, out: &mut [u8]) -> usize {
        let n = self.current.len().min(out.len());
        out[..n].copy_from_slice(&self.current[..n]);
        let _ = self.current.split_to(n);
        n
    }

    fn accept(&mut self, item: Option<Item>) -> io::Result<bool> {
        match item {
            Some(Ok(chunk)) => {
                self.current = chunk;
                Ok(true)
            }
            Some(Err(e)) => {
                self.failed = true;
                self.rx.close();
                Err(e)
            }
            None => Ok(false),
        }
    }

    fn failed_error() -> io::Error {
        io::Error::other("pipe was closed with an error")
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.failed {
            return Err(Self::failed_error());
        }
        while self.current.is_empty() {
            let item = self.rx.blocking_recv();
            if !self.accept(item)? {
                return Ok(0);
            }
        }
        Ok(self.copy_current(buf))
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.failed {
            return Poll::Ready(Err(Self::failed_error()));
        }
        while this.current.is_empty() {
            let item = match this.rx.poll_recv(cx) {
                Poll::Ready(item) => item,
                Poll::Pending => return Poll::Pending,
            };
            match this.accept(item) {
                Ok(true) => {}
                Ok(false) => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
        let n = this.current.len().min(buf.remaining());
        buf.put_slice(&this.current[..n]);
        let _ = this.current.split_to(n);
        Poll::Ready(Ok(()))
    }
}
