//! The store contract realized over any [`ObjectClient`].

use std::io::{self, Cursor};
use std::sync::Arc;

use async_trait::async_trait;
use blobkit_core::codec::{self, ObjectBody};
use blobkit_core::walk::{before_start, check_starting_point, Visitor};
use blobkit_core::{
    CallContext, ObjectAttributes, ObjectReader, PathResolver, Store, StoreConfig, StoreError,
    StoreResult,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};
use url::Url;

use crate::client::{ListRequest, ObjectClient, PutPrecondition};
use crate::error::ClientError;
use crate::kind::CloudKind;
use crate::order::NameOrder;

/// Capacity of the pipe between the encoder and the upload.
const PIPE_CAPACITY: usize = 256 * 1024;

/// How the upload side of a write ended.
enum Upload {
    Stored,
    /// The object already existed and overwrite is off.
    Skipped,
}

/// Store scoped to a key prefix inside one bucket or container.
#[derive(Clone)]
pub struct CloudStore {
    client: Arc<dyn ObjectClient>,
    paths: PathResolver,
    base_url: Url,
    config: StoreConfig,
}

impl CloudStore {
    /// `path` is the key prefix inside the bucket, without surrounding `/`.
    pub fn new(
        client: Arc<dyn ObjectClient>,
        base_url: Url,
        path: &str,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let paths = PathResolver::new(path.trim_matches('/'), config.extension())?;
        Ok(Self {
            client,
            paths,
            base_url,
            config,
        })
    }

    pub fn kind(&self) -> CloudKind {
        self.client.kind()
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    async fn fetch(&self, key: &str) -> StoreResult<ObjectBody> {
        let body = self
            .client
            .get(key)
            .await
            .map_err(|e| e.into_store_error(key, format!("reading {key:?} from {}", self.kind())))?;

        if !self.config.retry().buffered_read {
            return Ok(body);
        }

        let mut body = body;
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| StoreError::upstream(format!("downloading {key:?}"), e))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn key_exists(&self, key: &str) -> StoreResult<bool> {
        match self.client.head(key).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into_store_error(key, format!("checking {key:?}"))),
        }
    }

    async fn upload(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        precondition: PutPrecondition,
    ) -> StoreResult<()> {
        let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let compression = self.config.compression();
        let hooks = &self.config.hooks;

        // Resolves to whether the whole encoded body went into the pipe.
        let produce = async move {
            let res = async {
                codec::encode(source, &mut writer, compression, hooks).await?;
                writer.shutdown().await
            }
            .await;
            match res {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(false),
                Err(err) => Err(StoreError::upstream(format!("encoding {key:?}"), err)),
            }
        };

        let consume = async {
            match self.client.put(key, Box::new(reader), precondition).await {
                Ok(()) => Ok(Upload::Stored),
                Err(ClientError::PreconditionFailed(_)) if !self.config.overwrite() => Ok(Upload::Skipped),
                Err(err) => Err(err.into_store_error(key, format!("writing {key:?} to {}", self.kind()))),
            }
        };

        // The first failure drops the other half, closing the pipe.
        let (complete, upload) = tokio::try_join!(produce, consume)?;
        match upload {
            Upload::Skipped => {
                debug!(key, "object already exists, skipping write");
                Ok(())
            }
            Upload::Stored if complete => Ok(()),
            Upload::Stored => Err(StoreError::upstream(
                format!("writing {key:?} to {}", self.kind()),
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "upload finished before the whole body was read",
                ),
            )),
        }
    }
}

impl std::fmt::Debug for CloudStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStore")
            .field("kind", &self.kind())
            .field("base", &self.paths.base())
            .field("client", &self.client)
            .finish()
    }
}

#[async_trait]
impl Store for CloudStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn paths(&self) -> &PathResolver {
        &self.paths
    }

    fn object_url(&self, name: &str) -> String {
        let mut url = self.base_url.clone();
        url.set_query(None);
        format!(
            "{}/{}",
            url.as_str().trim_end_matches('/'),
            self.paths.relative_path(name).trim_start_matches('/')
        )
    }

    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    async fn open_object(&self, cx: &CallContext, name: &str) -> StoreResult<ObjectReader> {
        let key = self.paths.object_path(name);
        let retry = self.config.retry();
        let attempts = retry.read_attempts();
        debug!(key = %key, kind = %self.kind(), trace_id = cx.trace_id(), "opening cloud object");

        let mut attempt = 1;
        let body = loop {
            match cx.run(self.fetch(&key)).await {
                Ok(body) => break body,
                Err(err @ StoreError::Upstream { .. }) if attempt < attempts => {
                    debug!(
                        key = %key,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        trace_id = cx.trace_id(),
                        "cloud read failed, retrying"
                    );
                    let delay = retry.read_retry_delay();
                    cx.run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let decoded = codec::decode(body, self.config.compression(), &self.config.hooks);
        Ok(ObjectReader::new(decoded, key, cx))
    }

    async fn write_object(
        &self,
        cx: &CallContext,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<()> {
        cx.check()?;
        let key = self.paths.object_path(name);

        let precondition = if self.config.overwrite() {
            PutPrecondition::None
        } else if self.kind().conditional_put() {
            PutPrecondition::IfAbsent
        } else {
            // Best effort: another writer can slip in between the check
            // and the upload.
            if cx.run(self.key_exists(&key)).await? {
                debug!(key = %key, trace_id = cx.trace_id(), "object exists and overwrite is off, skipping write");
                return Ok(());
            }
            PutPrecondition::None
        };

        cx.run(self.upload(&key, source, precondition)).await?;
        trace!(key = %key, trace_id = cx.trace_id(), "wrote cloud object");
        Ok(())
    }

    async fn file_exists(&self, cx: &CallContext, name: &str) -> StoreResult<bool> {
        cx.run(self.key_exists(&self.paths.object_path(name))).await
    }

    async fn object_attributes(
        &self,
        cx: &CallContext,
        name: &str,
    ) -> StoreResult<ObjectAttributes> {
        let key = self.paths.object_path(name);
        cx.run(async {
            self.client
                .head(&key)
                .await
                .map_err(|e| e.into_store_error(&key, format!("reading attributes of {key:?}")))
        })
        .await
    }

    async fn delete_object(&self, cx: &CallContext, name: &str) -> StoreResult<()> {
        let key = self.paths.object_path(name);
        debug!(key = %key, trace_id = cx.trace_id(), "deleting cloud object");
        cx.run(async {
            self.client
                .delete(&key)
                .await
                .map_err(|e| e.into_store_error(&key, format!("deleting {key:?}")))
        })
        .await
    }

    async fn walk_from(
        &self,
        cx: &CallContext,
        prefix: &str,
        starting_point: &str,
        visit: Visitor<'_>,
    ) -> StoreResult<()> {
        check_starting_point(prefix, starting_point)?;

        let relative = starting_point.strip_prefix(prefix).unwrap_or("");
        let start = self
            .kind()
            .list_start(prefix, relative, |name| self.paths.prefix_path(name));
        let mut request = ListRequest {
            prefix: self.paths.prefix_path(prefix),
            start,
            continuation: None,
        };
        debug!(
            prefix = %request.prefix,
            start = ?request.start,
            trace_id = cx.trace_id(),
            "walking cloud store"
        );

        let mut order = NameOrder::new(&self.paths, prefix);
        loop {
            let page = cx
                .run(async {
                    self.client.list(&request).await.map_err(|e| {
                        e.into_store_error(
                            &request.prefix,
                            format!("listing objects under {:?}", request.prefix),
                        )
                    })
                })
                .await?;

            for key in &page.keys {
                let name = self.paths.to_base_name(key);
                if name.is_empty() {
                    debug!(key = %key, "ignoring key with an empty name");
                } else if name.starts_with(prefix) && !before_start(&name, starting_point) {
                    order.hold(name);
                }
                while let Some(name) = order.release(key) {
                    if visit(&name)?.is_break() {
                        return Ok(());
                    }
                }
            }

            match page.next {
                Some(token) => request.continuation = Some(token),
                None => break,
            }
        }

        while let Some(name) = order.drain() {
            if visit(&name)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn sub_store(&self, sub: &str) -> StoreResult<Box<dyn Store>> {
        let paths = self.paths.join(sub)?;
        let mut base_url = self.base_url.clone();
        base_url.set_path(&format!(
            "{}/{}",
            base_url.path().trim_end_matches('/'),
            sub.trim_matches('/')
        ));
        Ok(Box::new(Self {
            client: Arc::clone(&self.client),
            paths,
            base_url,
            config: self.config.clone(),
        }))
    }

    fn reconfigure(&self, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        Ok(Box::new(Self {
            client: Arc::clone(&self.client),
            paths: self.paths.with_extension(config.extension()),
            base_url: self.base_url.clone(),
            config,
        }))
    }
}
