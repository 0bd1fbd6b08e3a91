//! Backend-agnostic blob storage.
//!
//! This crate defines the contract every blob store satisfies and the
//! pieces backends share to satisfy it: named objects under a base scope,
//! written atomically, transparently compressed, enumerated in order and
//! resumable from any name.
//!
//! # Backends
//!
//! All backends implement the [`Store`] trait:
//!
//! - [`LocalStore`] -- a directory on the local filesystem
//! - [`MemoryStore`] -- `BTreeMap`-based store for tests and embedding
//!
//! Cloud object stores live in the `blobkit-cloud` crate.
//!
//! # Design Rules
//!
//! 1. A reader never observes a partially written object.
//! 2. With overwrite off, a second write of the same name is a no-op.
//! 3. Walks visit names in ascending order and never go below the
//!    starting point.
//! 4. Every operation takes a [`CallContext`]; firing its cancellation
//!    token aborts the operation with [`StoreError::Cancelled`].
//! 5. Handle configuration is immutable; derive a new handle to change it.

pub mod attributes;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod local;
pub mod location;
pub mod memory;
pub mod metering;
pub mod path;
pub mod traits;
pub mod walk;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod conformance;

// Re-export primary types at crate root for ergonomic imports.
pub use attributes::ObjectAttributes;
pub use codec::{Compression, ObjectBody};
pub use config::{RetryPolicy, StoreConfig, StoreOptions};
pub use context::CallContext;
pub use error::{BoxError, StoreError, StoreResult};
pub use local::LocalStore;
pub use location::Location;
pub use memory::MemoryStore;
pub use metering::{ByteHook, Meter, MeteringHooks};
pub use path::PathResolver;
pub use traits::{read_bytes, write_bytes, ObjectReader, Store};
pub use walk::Visitor;
