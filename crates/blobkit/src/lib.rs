//! Blob storage over local disk, memory and cloud object stores.
//!
//! This is the main entry point for applications. Parse a location, open
//! a store through [`StoreFactory`] (or [`open_store`] for the defaults)
//! and use the [`Store`] contract from there.
//!
//! ```no_run
//! # async fn demo() -> blobkit::StoreResult<()> {
//! use blobkit::{open_store, CallContext, StoreConfig, StoreOptions};
//!
//! let store = open_store("/var/data/blocks", StoreConfig::new(StoreOptions::dbin())).await?;
//! let cx = CallContext::new();
//! blobkit::write_bytes(store.as_ref(), &cx, "0000000001", b"block").await?;
//! # Ok(())
//! # }
//! ```

pub mod factory;

pub use factory::{open_store, StoreFactory};

pub use blobkit_cloud::{CloudKind, CloudStore, InMemoryClient, ObjectClient, ObjectStoreClient};
pub use blobkit_core::{
    read_bytes, write_bytes, ByteHook, CallContext, Compression, LocalStore, Location, Meter,
    MemoryStore, MeteringHooks, ObjectAttributes, ObjectReader, RetryPolicy, Store, StoreConfig,
    StoreError, StoreOptions, StoreResult, Visitor,
};
