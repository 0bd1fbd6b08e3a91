//! S3 object client on the AWS SDK.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, R2, Ceph).
//! An explicit endpoint switches to path-style addressing. Uploads larger
//! than one part go through the multipart API, so at most two parts of a
//! body are held in memory.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use blobkit_core::location::S3Location;
use blobkit_core::ObjectAttributes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::client::{
    read_part, ClientBody, ListPage, ListRequest, ObjectClient, PutPrecondition, StartBound,
    PART_SIZE,
};
use crate::error::{ClientError, ClientResult};
use crate::kind::CloudKind;

pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Build a client for the bucket named by `location`. Without static
    /// credentials in the location, the environment's provider chain is used.
    pub async fn connect(location: &S3Location) -> Self {
        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(location.region.clone()))
            .force_path_style(location.endpoint.is_some());

        if let Some(endpoint) = &location.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        match &location.credentials {
            Some(creds) => {
                builder = builder.credentials_provider(Credentials::new(
                    &creds.access_key_id,
                    &creds.secret_access_key,
                    None,
                    None,
                    "static",
                ));
            }
            None => {
                let sdk_config = aws_config::load_from_env().await;
                if let Some(provider) = sdk_config.credentials_provider() {
                    builder = builder.credentials_provider(provider);
                }
            }
        }

        debug!(
            bucket = %location.bucket,
            region = %location.region,
            endpoint = ?location.endpoint,
            "connecting S3 client"
        );

        Self {
            client: Client::from_conf(builder.build()),
            bucket: location.bucket.clone(),
        }
    }
}

impl S3Client {
    async fn put_single(&self, key: &str, data: Vec<u8>, precondition: PutPrecondition) -> ClientResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));
        if precondition == PutPrecondition::IfAbsent {
            request = request.if_none_match("*");
        }
        request.send().await.map_err(|e| classify(key, e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        body: ClientBody,
        first: Vec<u8>,
        second: Vec<u8>,
        precondition: PutPrecondition,
    ) -> ClientResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ClientError::other(format!("no upload id returned for {key}")))?
            .to_string();

        let res = self
            .upload_parts(key, &upload_id, body, first, second, precondition)
            .await;
        if res.is_err() {
            let abort = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await;
            if let Err(err) = abort {
                debug!(key, upload_id = %upload_id, error = %DisplayErrorContext(&err), "failed to abort multipart upload");
            }
        }
        res
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut body: ClientBody,
        first: Vec<u8>,
        second: Vec<u8>,
        precondition: PutPrecondition,
    ) -> ClientResult<()> {
        let mut completed = Vec::new();
        let mut part = first;
        let mut queued = Some(second);
        while !part.is_empty() {
            let number = completed.len() as i32 + 1;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| classify(key, e))?;
            completed.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(number)
                    .build(),
            );

            part = match queued.take() {
                Some(next) => next,
                None => read_part(&mut body, PART_SIZE).await.map_err(ClientError::other)?,
            };
        }

        debug!(key, parts = completed.len(), "completing multipart upload");
        let mut request = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build());
        if precondition == PutPrecondition::IfAbsent {
            request = request.if_none_match("*");
        }
        request.send().await.map_err(|e| classify(key, e))?;
        Ok(())
    }
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Normalize an SDK failure. The SDK error types differ per operation, so
/// classification goes through the rendered error chain.
fn classify<E>(key: &str, err: E) -> ClientError
where
    E: std::error::Error,
{
    let rendered = DisplayErrorContext(&err).to_string();
    if rendered.contains("NoSuchKey") || rendered.contains("NotFound") || rendered.contains("404") {
        ClientError::NotFound(key.to_string())
    } else if rendered.contains("PreconditionFailed") || rendered.contains("412") {
        ClientError::PreconditionFailed(key.to_string())
    } else {
        ClientError::other(rendered)
    }
}

#[async_trait]
impl ObjectClient for S3Client {
    fn kind(&self) -> CloudKind {
        CloudKind::S3
    }

    async fn put(
        &self,
        key: &str,
        mut body: ClientBody,
        precondition: PutPrecondition,
    ) -> ClientResult<()> {
        let first = read_part(&mut body, PART_SIZE).await.map_err(ClientError::other)?;
        if first.len() < PART_SIZE {
            return self.put_single(key, first, precondition).await;
        }
        let second = read_part(&mut body, PART_SIZE).await.map_err(ClientError::other)?;
        if second.is_empty() {
            return self.put_single(key, first, precondition).await;
        }
        self.put_multipart(key, body, first, second, precondition).await
    }

    async fn get(&self, key: &str) -> ClientResult<ClientBody> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        Ok(Box::new(result.body.into_async_read()))
    }

    async fn head(&self, key: &str) -> ClientResult<ObjectAttributes> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        let size = result.content_length().unwrap_or(0).max(0) as u64;
        let last_modified = result
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Ok(ObjectAttributes::new(size, last_modified))
    }

    async fn delete(&self, key: &str) -> ClientResult<()> {
        // S3 deletes of missing keys succeed silently.
        self.head(key).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    async fn list(&self, request: &ListRequest) -> ClientResult<ListPage> {
        let mut call = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix);

        match &request.start {
            Some(StartBound::Exclusive(key)) => call = call.start_after(key),
            // S3 has no inclusive start; the store's gate covers the gap.
            Some(StartBound::Inclusive(_)) | None => {}
        }
        if let Some(token) = &request.continuation {
            call = call.continuation_token(token);
        }

        let result = call
            .send()
            .await
            .map_err(|e| classify(&request.prefix, e))?;

        let keys = result
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next = if result.is_truncated().unwrap_or(false) {
            result.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }
}
