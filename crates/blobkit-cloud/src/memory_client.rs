//! In-process [`ObjectClient`] that behaves like a provider bucket.
//!
//! Used by tests to drive [`CloudStore`](crate::CloudStore) through every
//! provider family without network access, and to inject the faults real
//! providers produce: lost writes, uploads cut off mid-stream, flaky reads
//! and paginated listings.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use blobkit_core::ObjectAttributes;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::client::{ClientBody, ListPage, ListRequest, ObjectClient, PutPrecondition, StartBound};
use crate::error::{ClientError, ClientResult};
use crate::kind::CloudKind;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Misbehaviour of the next upload after reading part of its body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PutFault {
    /// Fail with a transient error.
    Fail { after: u64 },
    /// Store what was read so far and report success.
    Truncate { after: u64 },
}

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryClient {
    kind: CloudKind,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
    dropped_puts: AtomicUsize,
    failing_gets: AtomicUsize,
    put_fault: Mutex<Option<PutFault>>,
    list_requests: Mutex<Vec<ListRequest>>,
}

impl InMemoryClient {
    pub fn new(kind: CloudKind) -> Self {
        Self {
            kind,
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            dropped_puts: AtomicUsize::new(0),
            failing_gets: AtomicUsize::new(0),
            put_fault: Mutex::new(None),
            list_requests: Mutex::new(Vec::new()),
        }
    }

    /// Limit listing pages to `page_size` keys (at least one).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Acknowledge the next `n` uploads without storing them, the way an
    /// eventually consistent bucket can lose a fresh write.
    pub fn drop_next_puts(&self, n: usize) {
        self.dropped_puts.store(n, Ordering::SeqCst);
    }

    /// Fail the next upload once `bytes` of its body have been read.
    pub fn fail_next_put_after(&self, bytes: u64) {
        *self.put_fault.lock().expect("lock poisoned") = Some(PutFault::Fail { after: bytes });
    }

    /// Stop reading the next upload after `bytes`, store that much and
    /// acknowledge it.
    pub fn truncate_next_put(&self, bytes: u64) {
        *self.put_fault.lock().expect("lock poisoned") = Some(PutFault::Truncate { after: bytes });
    }

    /// Fail the next `n` downloads with a transient error.
    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Every listing request received so far.
    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.list_requests.lock().expect("lock poisoned").clone()
    }

    /// Stored (encoded) bytes of `key`.
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        let objects = self.objects.read().expect("lock poisoned");
        objects.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().expect("lock poisoned");
        objects.keys().cloned().collect()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn contains(&self, key: &str) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(key)
    }
}

#[async_trait]
impl ObjectClient for InMemoryClient {
    fn kind(&self) -> CloudKind {
        self.kind
    }

    async fn put(
        &self,
        key: &str,
        mut body: ClientBody,
        precondition: PutPrecondition,
    ) -> ClientResult<()> {
        if precondition == PutPrecondition::IfAbsent && self.contains(key) {
            return Err(ClientError::PreconditionFailed(key.to_string()));
        }

        let fault = self.put_fault.lock().expect("lock poisoned").take();
        let mut data = Vec::new();
        let read = match fault {
            None => body.read_to_end(&mut data).await,
            Some(PutFault::Fail { after } | PutFault::Truncate { after }) => {
                (&mut body).take(after).read_to_end(&mut data).await
            }
        };
        read.map_err(ClientError::other)?;

        if let Some(PutFault::Fail { .. }) = fault {
            return Err(ClientError::other(format!(
                "connection reset after {} bytes of {key}",
                data.len()
            )));
        }
        if Self::take_one(&self.dropped_puts) {
            return Ok(());
        }

        let mut objects = self.objects.write().expect("lock poisoned");
        if precondition == PutPrecondition::IfAbsent && objects.contains_key(key) {
            return Err(ClientError::PreconditionFailed(key.to_string()));
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::from(data),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> ClientResult<ClientBody> {
        if Self::take_one(&self.failing_gets) {
            return Err(ClientError::other(format!("transient failure reading {key}")));
        }
        let objects = self.objects.read().expect("lock poisoned");
        let object = objects
            .get(key)
            .ok_or_else(|| ClientError::NotFound(key.to_string()))?;
        Ok(Box::new(std::io::Cursor::new(object.data.clone())))
    }

    async fn head(&self, key: &str) -> ClientResult<ObjectAttributes> {
        let objects = self.objects.read().expect("lock poisoned");
        objects
            .get(key)
            .map(|o| ObjectAttributes::new(o.data.len() as u64, o.modified))
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> ClientResult<()> {
        let mut objects = self.objects.write().expect("lock poisoned");
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn list(&self, request: &ListRequest) -> ClientResult<ListPage> {
        self.list_requests
            .lock()
            .expect("lock poisoned")
            .push(request.clone());

        let mut lower = Bound::Included(request.prefix.clone());
        match &request.start {
            Some(StartBound::Exclusive(key)) if *key >= request.prefix => {
                lower = Bound::Excluded(key.clone());
            }
            Some(StartBound::Inclusive(key)) if *key > request.prefix => {
                lower = Bound::Included(key.clone());
            }
            _ => {}
        }
        if let Some(token) = &request.continuation {
            lower = Bound::Excluded(token.clone());
        }

        let objects = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<String> = objects
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&request.prefix))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn put(client: &InMemoryClient, key: &str) {
        client
            .put(key, Box::new(std::io::Cursor::new(key.as_bytes().to_vec())), PutPrecondition::None)
            .await
            .unwrap();
    }

    fn request(prefix: &str, start: Option<StartBound>) -> ListRequest {
        ListRequest {
            prefix: prefix.into(),
            start,
            continuation: None,
        }
    }

    #[tokio::test]
    async fn list_pages_through_prefix() {
        let client = InMemoryClient::new(CloudKind::S3).with_page_size(2);
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            put(&client, key).await;
        }

        let mut req = request("a/", None);
        let first = client.list(&req).await.unwrap();
        assert_eq!(first.keys, vec!["a/1", "a/2"]);
        req.continuation = first.next;
        let second = client.list(&req).await.unwrap();
        assert_eq!(second.keys, vec!["a/3"]);
        assert_eq!(second.next, None);
        assert_eq!(client.list_requests().len(), 2);
    }

    #[tokio::test]
    async fn list_honours_start_bounds() {
        let client = InMemoryClient::new(CloudKind::Gcs);
        for key in ["k1", "k2", "k3"] {
            put(&client, key).await;
        }

        let exclusive = client
            .list(&request("k", Some(StartBound::Exclusive("k2".into()))))
            .await
            .unwrap();
        assert_eq!(exclusive.keys, vec!["k3"]);

        let inclusive = client
            .list(&request("k", Some(StartBound::Inclusive("k2".into()))))
            .await
            .unwrap();
        assert_eq!(inclusive.keys, vec!["k2", "k3"]);
    }

    #[tokio::test]
    async fn if_absent_rejects_existing_key() {
        let client = InMemoryClient::new(CloudKind::Gcs);
        put(&client, "k").await;
        let err = client
            .put("k", Box::new(std::io::Cursor::new(b"x".to_vec())), PutPrecondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PreconditionFailed(_)));
        assert_eq!(client.raw("k").unwrap(), Bytes::from_static(b"k"));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let client = InMemoryClient::new(CloudKind::Azure);
        client.drop_next_puts(1);
        put(&client, "lost").await;
        assert!(client.keys().is_empty());
        put(&client, "kept").await;
        assert_eq!(client.keys(), vec!["kept"]);

        client.fail_next_put_after(1);
        let body = Box::new(std::io::Cursor::new(b"abc".to_vec()));
        assert!(client.put("failed", body, PutPrecondition::None).await.is_err());
        client.truncate_next_put(1);
        put(&client, "short").await;
        assert_eq!(client.raw("short").unwrap(), Bytes::from_static(b"s"));
        assert_eq!(client.keys(), vec!["kept", "short"]);

        client.fail_next_gets(1);
        assert!(matches!(client.get("kept").await, Err(ClientError::Other(_))));
        assert!(client.get("kept").await.is_ok());
        assert!(matches!(client.get("gone").await, Err(ClientError::NotFound(_))));
        assert!(matches!(client.delete("gone").await, Err(ClientError::NotFound(_))));
    }
}
