use std::fmt;
use std::io;

use async_trait::async_trait;
use blobkit_core::ObjectAttributes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ClientResult;
use crate::kind::CloudKind;

/// Raw (still encoded) object bytes moving to or from a provider.
pub type ClientBody = Box<dyn AsyncRead + Send + Unpin>;

/// Size of the parts multipart uploads are split into. S3 rejects non-final
/// parts under 5 MiB.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Read the next part of an upload body: exactly `size` bytes, or fewer
/// (possibly none) once the body ends.
pub async fn read_part(body: &mut ClientBody, size: usize) -> io::Result<Vec<u8>> {
    let mut part = Vec::with_capacity(size);
    body.take(size as u64).read_to_end(&mut part).await?;
    Ok(part)
}

/// Condition attached to an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutPrecondition {
    None,
    /// Fail with `PreconditionFailed` when the key already exists.
    IfAbsent,
}

/// Where a listing begins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartBound {
    /// Keys strictly greater than this one (S3 `start-after`).
    Exclusive(String),
    /// Keys greater than or equal to this one (GCS `startOffset`).
    Inclusive(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub start: Option<StartBound>,
    /// Opaque token from the previous page.
    pub continuation: Option<String>,
}

/// One page of keys in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next: Option<String>,
}

/// Authenticated access to one bucket or container.
///
/// Implementations wrap a provider SDK; they own retries, authentication
/// and the wire protocol. They must be safe for concurrent use and must
/// report a missing key as `ClientError::NotFound` from every operation,
/// including `delete`.
#[async_trait]
pub trait ObjectClient: Send + Sync + fmt::Debug {
    fn kind(&self) -> CloudKind;

    /// Upload `body` under `key`, replacing any previous object atomically.
    async fn put(&self, key: &str, body: ClientBody, precondition: PutPrecondition)
        -> ClientResult<()>;

    async fn get(&self, key: &str) -> ClientResult<ClientBody>;

    async fn head(&self, key: &str) -> ClientResult<ObjectAttributes>;

    async fn delete(&self, key: &str) -> ClientResult<()>;

    async fn list(&self, request: &ListRequest) -> ClientResult<ListPage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_splits_into_fixed_parts() {
        let mut body: ClientBody = Box::new(std::io::Cursor::new(vec![9u8; 25]));

        let mut sizes = Vec::new();
        loop {
            let part = read_part(&mut body, 10).await.unwrap();
            sizes.push(part.len());
            if part.len() < 10 {
                break;
            }
        }
        assert_eq!(sizes, [10, 10, 5]);
    }

    #[tokio::test]
    async fn exact_multiple_ends_with_empty_part() {
        let mut body: ClientBody = Box::new(std::io::Cursor::new(vec![1u8; 20]));
        assert_eq!(read_part(&mut body, 10).await.unwrap().len(), 10);
        assert_eq!(read_part(&mut body, 10).await.unwrap().len(), 10);
        assert!(read_part(&mut body, 10).await.unwrap().is_empty());
    }
}
