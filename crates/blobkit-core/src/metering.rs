//! Byte-level metering hooks.
//!
//! Hooks are invoked synchronously once per chunk that crosses the metered
//! boundary, with the size of that chunk. The core never aggregates: callers
//! keep their own counters (atomics, metrics registries) behind the closure.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Callback receiving the size of each chunk.
pub type ByteHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Four optional byte counters around the compression boundary.
#[derive(Clone, Default)]
pub struct MeteringHooks {
    /// Bytes written to the backend (after encoding).
    pub compressed_write: Option<ByteHook>,
    /// Bytes handed to the encoder by the caller.
    pub uncompressed_write: Option<ByteHook>,
    /// Bytes read from the backend (before decoding).
    pub compressed_read: Option<ByteHook>,
    /// Bytes handed back to the caller after decoding.
    pub uncompressed_read: Option<ByteHook>,
}

impl MeteringHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_compressed_write(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.compressed_write = Some(Arc::new(hook));
        self
    }

    pub fn on_uncompressed_write(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.uncompressed_write = Some(Arc::new(hook));
        self
    }

    pub fn on_compressed_read(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.compressed_read = Some(Arc::new(hook));
        self
    }

    pub fn on_uncompressed_read(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.uncompressed_read = Some(Arc::new(hook));
        self
    }

    /// Route the backend-side (compressed) traffic into a [`Meter`].
    pub fn with_meter(self, meter: Arc<dyn Meter>) -> Self {
        let reads = Arc::clone(&meter);
        self.on_compressed_read(move |n| reads.add_bytes_read(n))
            .on_compressed_write(move |n| meter.add_bytes_written(n))
    }

    pub fn is_empty(&self) -> bool {
        self.compressed_write.is_none()
            && self.uncompressed_write.is_none()
            && self.compressed_read.is_none()
            && self.uncompressed_read.is_none()
    }
}

impl fmt::Debug for MeteringHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteringHooks")
            .field("compressed_write", &self.compressed_write.is_some())
            .field("uncompressed_write", &self.uncompressed_write.is_some())
            .field("compressed_read", &self.compressed_read.is_some())
            .field("uncompressed_read", &self.uncompressed_read.is_some())
            .finish()
    }
}

/// Coarse byte accounting sink, usually backed by a metrics registry.
pub trait Meter: Send + Sync {
    fn add_bytes_read(&self, n: usize);
    fn add_bytes_written(&self, n: usize);
}

/// Reader that reports every successful read to a hook.
pub struct MeteredReader<R> {
    inner: R,
    hook: ByteHook,
}

impl<R> MeteredReader<R> {
    pub fn new(inner: R, hook: ByteHook) -> Self {
        Self { inner, hook }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MeteredReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            let n = buf.filled().len() - before;
            if n > 0 {
                (self.hook)(n);
            }
        }
        res
    }
}

/// Writer that reports every accepted write to a hook.
pub struct MeteredWriter<W> {
    inner: W,
    hook: ByteHook,
}

impl<W> MeteredWriter<W> {
    pub fn new(inner: W, hook: ByteHook) -> Self {
        Self { inner, hook }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for MeteredWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                (self.hook)(n);
            }
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
