//! Cloud object store backends for blobkit.
//!
//! A single [`CloudStore`] implements the store contract on top of any
//! [`ObjectClient`]; provider differences (conditional uploads, listing
//! start parameters) are captured by [`CloudKind`].
//!
//! - `s3` (feature `aws`) -- [`S3Client`] on the AWS SDK
//! - [`ObjectStoreClient`] -- any `object_store` backend; GCS with feature
//!   `gcp`, Azure with feature `azure`
//! - [`InMemoryClient`] -- provider-shaped bucket held in memory, with
//!   fault injection for tests

pub mod client;
pub mod error;
pub mod kind;
pub mod memory_client;
pub mod object_store_client;
mod order;
#[cfg(feature = "aws")]
pub mod s3;
pub mod store;

pub use client::{read_part, ClientBody, ListPage, ListRequest, ObjectClient, PutPrecondition, StartBound, PART_SIZE};
pub use error::{ClientError, ClientResult};
pub use kind::CloudKind;
pub use memory_client::InMemoryClient;
pub use object_store_client::ObjectStoreClient;
#[cfg(feature = "aws")]
pub use s3::S3Client;
pub use store::CloudStore;
