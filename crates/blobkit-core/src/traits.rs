use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::trace;
use url::Url;

use crate::attributes::ObjectAttributes;
use crate::codec::ObjectBody;
use crate::config::StoreConfig;
use crate::context::CallContext;
use crate::error::StoreResult;
use crate::path::PathResolver;
use crate::walk::{collect_into, Visitor};
use crate::writer;

/// A named-blob store scoped to one base location.
///
/// Implementations must satisfy these invariants:
/// - A reader never observes a partially written object.
/// - With `overwrite` off, writing an existing name is a successful no-op.
/// - Every backend's not-found signal surfaces as `StoreError::NotFound`.
/// - A walk visits names in ascending byte order of the name itself, even
///   where the stored keys sort differently once the extension is added.
/// - A walk never visits a name below its starting point, and a starting
///   point outside the prefix fails before any I/O.
/// - Configuration is fixed for the handle's lifetime; `sub_store` and
///   `reconfigure` derive new handles sharing the backend client.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    fn config(&self) -> &StoreConfig;

    fn paths(&self) -> &PathResolver;

    /// Physical path or key for `name`.
    fn object_path(&self, name: &str) -> String {
        self.paths().object_path(name)
    }

    /// Fully qualified URL of `name`, including scheme and bucket.
    fn object_url(&self, name: &str) -> String;

    fn base_url(&self) -> Url;

    /// Open `name` for reading, decoded with the configured codec.
    ///
    /// Decode errors are reported by the returned reader, not here.
    async fn open_object(&self, cx: &CallContext, name: &str) -> StoreResult<ObjectReader>;

    /// Encode `source` and publish it under `name` atomically.
    async fn write_object(
        &self,
        cx: &CallContext,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<()>;

    async fn file_exists(&self, cx: &CallContext, name: &str) -> StoreResult<bool>;

    async fn object_attributes(&self, cx: &CallContext, name: &str)
        -> StoreResult<ObjectAttributes>;

    /// Remove `name`. Fails with `NotFound` when it does not exist.
    async fn delete_object(&self, cx: &CallContext, name: &str) -> StoreResult<()>;

    /// Copy `source` to `destination` inside this store.
    async fn copy_object(
        &self,
        cx: &CallContext,
        source: &str,
        destination: &str,
    ) -> StoreResult<()> {
        let mut reader = self.open_object(cx, source).await?;
        self.write_object(cx, destination, &mut reader).await
    }

    async fn walk(&self, cx: &CallContext, prefix: &str, visit: Visitor<'_>) -> StoreResult<()> {
        self.walk_from(cx, prefix, "", visit).await
    }

    /// Visit every name starting with `prefix` that is not below
    /// `starting_point`.
    async fn walk_from(
        &self,
        cx: &CallContext,
        prefix: &str,
        starting_point: &str,
        visit: Visitor<'_>,
    ) -> StoreResult<()>;

    /// Up to `max` names under `prefix`; a negative `max` lists all.
    async fn list_files(&self, cx: &CallContext, prefix: &str, max: i64) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        self.walk(cx, prefix, &mut collect_into(&mut names, max))
            .await?;
        Ok(names)
    }

    /// Upload a local file as `name`, then delete the local file.
    async fn push_local_file(&self, cx: &CallContext, local: &Path, name: &str) -> StoreResult<()> {
        writer::push_and_verify(self, cx, local, name).await
    }

    /// Handle scoped to `base/sub`, sharing the backend client.
    fn sub_store(&self, sub: &str) -> StoreResult<Box<dyn Store>>;

    /// Handle with a different configuration, sharing the backend client.
    fn reconfigure(&self, config: StoreConfig) -> StoreResult<Box<dyn Store>>;
}

/// Decoded byte stream of one object.
pub struct ObjectReader {
    inner: ObjectBody,
    path: String,
    trace_id: String,
}

impl ObjectReader {
    pub fn new(inner: ObjectBody, path: impl Into<String>, cx: &CallContext) -> Self {
        Self {
            inner,
            path: path.into(),
            trace_id: cx.trace_id().to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for ObjectReader {
    fn drop(&mut self) {
        trace!(path = %self.path, trace_id = %self.trace_id, "closing object reader");
    }
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader").field("path", &self.path).finish()
    }
}

/// Read the whole decoded content of `name`.
pub async fn read_bytes<S>(store: &S, cx: &CallContext, name: &str) -> StoreResult<Vec<u8>>
where
    S: Store + ?Sized,
{
    let mut reader = store.open_object(cx, name).await?;
    cx.run(async move {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    })
    .await
}

/// Write `content` under `name`.
pub async fn write_bytes<S>(store: &S, cx: &CallContext, name: &str, content: &[u8]) -> StoreResult<()>
where
    S: Store + ?Sized,
{
    let mut source = content;
    store.write_object(cx, name, &mut source).await
}
