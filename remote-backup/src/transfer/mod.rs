//! Streaming building blocks shared by upload and download.

pub mod pipe;
pub mod progress;
pub mod progress_stream;

pub use pipe::{pipe, PipeAbortHandle, PipeReader, PipeWriter, DEFAULT_BUFFER_SIZE};
pub use progress::{format_bytes, ProgressReporter};
pub use progress_stream::{ProgressCallback, ProgressReader};
