//! Progress-tracking reader wrapper for archive streams.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Duration, Instant};

/// Callback for progress updates
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Reader wrapper that counts bytes and calls a progress callback
pub struct ProgressReader<R> {
    inner: R,
    bytes_transferred: u64,
    last_update: Instant,
    update_interval: Duration,
    callback: ProgressCallback,
    finished: bool,
}

impl<R> ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            last_update: Instant::now(),
            update_interval: Duration::from_millis(250), // 4 updates per second
            callback,
            finished: false,
        }
    }

    /// Get total bytes read so far
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<R> AsyncRead for ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;
                if read == 0 && buf.remaining() > 0 {
                    // End of stream, final update
                    if !self.finished {
                        self.finished = true;
                        (self.callback)(self.bytes_transferred);
                    }
                    return Poll::Ready(Ok(()));
                }

                self.bytes_transferred += read;
                let now = Instant::now();
                if now.duration_since(self.last_update) >= self.update_interval {
                    (self.callback)(self.bytes_transferred);
                    self.last_update = now;
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_counts_bytes_and_reports_at_end() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |n| sink.store(n, Ordering::SeqCst));

        let data = vec![7u8; 10_000];
        let mut reader = ProgressReader::new(io::Cursor::new(data), callback);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 10_000);
        assert_eq!(reader.bytes_transferred(), 10_000);
        assert_eq!(seen.load(Ordering::SeqCst), 10_000);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::other("network reset")))
            }
        }

        let mut reader = ProgressReader::new(Failing, Arc::new(|_| {}));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.to_string(), "network reset");
    }
}
