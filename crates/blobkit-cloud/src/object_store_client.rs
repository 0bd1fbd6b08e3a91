//! [`ObjectClient`] over the `object_store` crate.
//!
//! Backs GCS (feature `gcp`) and Azure Blob Storage (feature `azure`).
//! Credentials come from the environment the way `object_store` reads them
//! (`GOOGLE_SERVICE_ACCOUNT`, `AZURE_STORAGE_ACCESS_KEY`, ...). Any other
//! `object_store` backend can be wrapped with [`ObjectStoreClient::new`].

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use blobkit_core::codec::CHUNK_SIZE;
use blobkit_core::ObjectAttributes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutPayload, WriteMultipart};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::client::{ClientBody, ListPage, ListRequest, ObjectClient, PutPrecondition, StartBound};
use crate::error::{ClientError, ClientResult};
use crate::kind::CloudKind;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Parts of one multipart write allowed in flight at once.
const MAX_PARTS_IN_FLIGHT: usize = 4;

#[derive(Debug)]
pub struct ObjectStoreClient {
    kind: CloudKind,
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

impl ObjectStoreClient {
    /// `kind` decides the listing and upload primitives the store layer
    /// asks this client for.
    pub fn new(kind: CloudKind, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            kind,
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit listing pages to `page_size` keys (at least one).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[cfg(feature = "gcp")]
    pub fn gcs(location: &blobkit_core::location::GcsLocation) -> blobkit_core::StoreResult<Self> {
        use object_store::gcp::GoogleCloudStorageBuilder;

        if location.project.is_some() {
            debug!(bucket = %location.bucket, "billing project is not used by the GCS client");
        }
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&location.bucket)
            .build()
            .map_err(|err| {
                blobkit_core::StoreError::upstream(
                    format!("configuring GCS client for bucket {}", location.bucket),
                    err,
                )
            })?;
        debug!(bucket = %location.bucket, "connecting GCS client");
        Ok(Self::new(CloudKind::Gcs, Arc::new(store)))
    }

    #[cfg(feature = "azure")]
    pub fn azure(location: &blobkit_core::location::AzureLocation) -> blobkit_core::StoreResult<Self> {
        use object_store::azure::MicrosoftAzureBuilder;

        let store = MicrosoftAzureBuilder::from_env()
            .with_account(&location.account)
            .with_container_name(&location.container)
            .build()
            .map_err(|err| {
                blobkit_core::StoreError::upstream(
                    format!(
                        "configuring Azure client for {}/{}",
                        location.account, location.container
                    ),
                    err,
                )
            })?;
        debug!(
            account = %location.account,
            container = %location.container,
            "connecting Azure client"
        );
        Ok(Self::new(CloudKind::Azure, Arc::new(store)))
    }

    async fn put_streaming(&self, key: &str, path: &Path, body: &mut ClientBody) -> ClientResult<()> {
        let upload = self
            .store
            .put_multipart(path)
            .await
            .map_err(|e| classify(key, e))?;
        let mut writer = WriteMultipart::new(upload);

        match copy_into(&mut writer, body).await {
            Ok(()) => {
                writer.finish().await.map_err(|e| classify(key, e))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort) = writer.abort().await {
                    debug!(key, error = %abort, "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }
}

async fn copy_into(writer: &mut WriteMultipart, body: &mut ClientBody) -> ClientResult<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = body.read(&mut buf).await.map_err(ClientError::other)?;
        if n == 0 {
            return Ok(());
        }
        writer
            .wait_for_capacity(MAX_PARTS_IN_FLIGHT)
            .await
            .map_err(ClientError::other)?;
        writer.write(&buf[..n]);
    }
}

fn location(key: &str) -> ClientResult<Path> {
    Path::parse(key).map_err(ClientError::other)
}

fn classify(key: &str, err: object_store::Error) -> ClientError {
    match err {
        object_store::Error::NotFound { .. } => ClientError::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            ClientError::PreconditionFailed(key.to_string())
        }
        other => ClientError::other(other),
    }
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    fn kind(&self) -> CloudKind {
        self.kind
    }

    async fn put(
        &self,
        key: &str,
        mut body: ClientBody,
        precondition: PutPrecondition,
    ) -> ClientResult<()> {
        let path = location(key)?;
        match precondition {
            PutPrecondition::None => self.put_streaming(key, &path, &mut body).await,
            // Conditional creates are single requests.
            PutPrecondition::IfAbsent => {
                let mut data = Vec::new();
                body.read_to_end(&mut data).await.map_err(ClientError::other)?;
                self.store
                    .put_opts(&path, PutPayload::from(data), PutMode::Create.into())
                    .await
                    .map_err(|e| classify(key, e))?;
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> ClientResult<ClientBody> {
        let result = self
            .store
            .get(&location(key)?)
            .await
            .map_err(|e| classify(key, e))?;
        let stream = result.into_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn head(&self, key: &str) -> ClientResult<ObjectAttributes> {
        let meta = self
            .store
            .head(&location(key)?)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(ObjectAttributes::new(meta.size as u64, meta.last_modified))
    }

    async fn delete(&self, key: &str) -> ClientResult<()> {
        // Providers differ on deleting a missing key; report it uniformly.
        self.head(key).await?;
        self.store
            .delete(&location(key)?)
            .await
            .map_err(|e| classify(key, e))
    }

    async fn list(&self, request: &ListRequest) -> ClientResult<ListPage> {
        // `object_store` prefixes match whole path segments, so list the
        // enclosing directory and filter on the raw prefix.
        let dir = match request.prefix.rfind('/') {
            Some(idx) if idx > 0 => Some(location(&request.prefix[..idx])?),
            _ => None,
        };
        let (offset, inclusive) = match (&request.continuation, &request.start) {
            (Some(token), _) => (Some(token.as_str()), None),
            (None, Some(StartBound::Exclusive(key))) => (Some(key.as_str()), None),
            (None, Some(StartBound::Inclusive(key))) => (None, Some(key.as_str())),
            (None, None) => (None, None),
        };

        let mut objects = match offset {
            Some(offset) => self.store.list_with_offset(dir.as_ref(), &location(offset)?),
            None => self.store.list(dir.as_ref()),
        };

        let mut keys = Vec::new();
        while let Some(meta) = objects
            .try_next()
            .await
            .map_err(|e| classify(&request.prefix, e))?
        {
            let key = String::from(meta.location);
            if !key.starts_with(&request.prefix) {
                // Listings are in key order: past the prefix nothing matches.
                if key > request.prefix {
                    break;
                }
                continue;
            }
            if inclusive.is_some_and(|start| key.as_str() < start) {
                continue;
            }
            keys.push(key);
            if keys.len() == self.page_size {
                break;
            }
        }

        let next = if keys.len() == self.page_size {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }
}

#[cfg(test)]
mod tests {
    use blobkit_core::{conformance, read_bytes, write_bytes, CallContext, Store, StoreConfig, StoreOptions};
    use object_store::memory::InMemory;
    use url::Url;

    use super::*;
    use crate::store::CloudStore;

    fn client(kind: CloudKind) -> Arc<ObjectStoreClient> {
        Arc::new(ObjectStoreClient::new(kind, Arc::new(InMemory::new())).with_page_size(2))
    }

    async fn conforms(kind: CloudKind) {
        conformance::run_all(|config| async move {
            let url = Url::parse(&format!("{kind}://bucket/scope")).unwrap();
            Box::new(CloudStore::new(client(kind), url, "scope", config).unwrap()) as Box<dyn Store>
        })
        .await;
    }

    #[tokio::test]
    async fn gcs_over_object_store_conforms() {
        conforms(CloudKind::Gcs).await;
    }

    #[tokio::test]
    async fn azure_over_object_store_conforms() {
        conforms(CloudKind::Azure).await;
    }

    #[tokio::test]
    async fn list_filters_raw_prefix_inside_directory() {
        let client = ObjectStoreClient::new(CloudKind::Gcs, Arc::new(InMemory::new()));
        for key in ["d/a1", "d/a2", "d/b1", "d/a/x", "e/a1"] {
            client
                .put(key, Box::new(std::io::Cursor::new(b"x".to_vec())), PutPrecondition::None)
                .await
                .unwrap();
        }

        let page = client
            .list(&ListRequest {
                prefix: "d/a".into(),
                start: Some(StartBound::Inclusive("d/a2".into())),
                continuation: None,
            })
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["d/a2"]);
        assert_eq!(page.next, None);

        let page = client
            .list(&ListRequest {
                prefix: "d/a".into(),
                start: None,
                continuation: None,
            })
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["d/a/x", "d/a1", "d/a2"]);
    }

    #[tokio::test]
    async fn missing_keys_and_existing_creates_are_normalized() {
        let client = client(CloudKind::Gcs);
        assert!(matches!(client.get("nope").await, Err(ClientError::NotFound(_))));
        assert!(matches!(client.delete("nope").await, Err(ClientError::NotFound(_))));

        let body = || Box::new(std::io::Cursor::new(b"x".to_vec())) as ClientBody;
        client.put("k", body(), PutPrecondition::IfAbsent).await.unwrap();
        let err = client.put("k", body(), PutPrecondition::IfAbsent).await.unwrap_err();
        assert!(matches!(err, ClientError::PreconditionFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn large_objects_stream_through_multipart_writes() {
        let client = client(CloudKind::Azure);
        let url = Url::parse("az://account.container/base").unwrap();
        let store = CloudStore::new(client, url, "base", StoreConfig::new(StoreOptions::simple())).unwrap();
        let cx = CallContext::new();
        let payload: Vec<u8> = (0..12 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

        write_bytes(&store, &cx, "big", &payload).await.unwrap();
        assert_eq!(read_bytes(&store, &cx, "big").await.unwrap(), payload);
    }
}
