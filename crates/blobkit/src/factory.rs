//! Location-driven store construction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blobkit_cloud::{CloudKind, CloudStore, ObjectClient};
use blobkit_core::location::{AzureLocation, GcsLocation};
use blobkit_core::{LocalStore, Location, MemoryStore, Store, StoreConfig, StoreError, StoreResult};
use tracing::debug;

/// Opens stores for parsed locations.
///
/// Cloud locations need an [`ObjectClient`] for their provider. A client
/// registered with [`StoreFactory::with_client`] wins; otherwise S3 falls
/// back to the AWS SDK client (feature `aws`), GCS and Azure to
/// `object_store` clients (features `gcp` and `azure`) configured from the
/// environment. `memory://` locations with the same path share their
/// objects for the lifetime of the factory.
#[derive(Debug, Default)]
pub struct StoreFactory {
    clients: HashMap<CloudKind, Arc<dyn ObjectClient>>,
    memory: Mutex<HashMap<String, MemoryStore>>,
}

impl StoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `client` for every location of its provider kind.
    pub fn with_client(mut self, client: Arc<dyn ObjectClient>) -> Self {
        self.clients.insert(client.kind(), client);
        self
    }

    /// Parse `location` and open it.
    pub async fn open_str(&self, location: &str, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        self.open(&Location::parse(location)?, config).await
    }

    pub async fn open(&self, location: &Location, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        debug!(scheme = location.scheme(), "opening store");
        match location {
            Location::Local(root) => Ok(Box::new(LocalStore::open(root.clone(), config).await?)),
            Location::Memory(path) => self.memory_store(path, config),
            Location::S3(loc) => {
                let client = self.s3_client(loc).await?;
                Ok(Box::new(CloudStore::new(client, loc.url.clone(), &loc.path, config)?))
            }
            Location::Gcs(loc) => {
                let client = self.gcs_client(loc)?;
                Ok(Box::new(CloudStore::new(client, loc.url.clone(), &loc.path, config)?))
            }
            Location::Azure(loc) => {
                let client = self.azure_client(loc)?;
                Ok(Box::new(CloudStore::new(client, loc.url.clone(), &loc.path, config)?))
            }
        }
    }

    fn memory_store(&self, path: &str, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        let mut stores = self.memory.lock().expect("lock poisoned");
        if let Some(store) = stores.get(path) {
            return store.reconfigure(config);
        }
        let store = MemoryStore::new(path, config)?;
        stores.insert(path.to_string(), store.clone());
        Ok(Box::new(store))
    }

    fn registered(&self, kind: CloudKind) -> StoreResult<Arc<dyn ObjectClient>> {
        self.clients.get(&kind).cloned().ok_or_else(|| {
            StoreError::invalid_usage(format!(
                "no object client registered for {kind}:// locations and the provider feature is disabled"
            ))
        })
    }

    #[cfg(feature = "aws")]
    async fn s3_client(&self, loc: &blobkit_core::location::S3Location) -> StoreResult<Arc<dyn ObjectClient>> {
        if let Some(client) = self.clients.get(&CloudKind::S3) {
            return Ok(Arc::clone(client));
        }
        Ok(Arc::new(blobkit_cloud::s3::S3Client::connect(loc).await))
    }

    #[cfg(not(feature = "aws"))]
    async fn s3_client(&self, _loc: &blobkit_core::location::S3Location) -> StoreResult<Arc<dyn ObjectClient>> {
        self.registered(CloudKind::S3)
    }

    #[cfg(feature = "gcp")]
    fn gcs_client(&self, loc: &GcsLocation) -> StoreResult<Arc<dyn ObjectClient>> {
        if let Some(client) = self.clients.get(&CloudKind::Gcs) {
            return Ok(Arc::clone(client));
        }
        Ok(Arc::new(blobkit_cloud::ObjectStoreClient::gcs(loc)?))
    }

    #[cfg(not(feature = "gcp"))]
    fn gcs_client(&self, _loc: &GcsLocation) -> StoreResult<Arc<dyn ObjectClient>> {
        self.registered(CloudKind::Gcs)
    }

    #[cfg(feature = "azure")]
    fn azure_client(&self, loc: &AzureLocation) -> StoreResult<Arc<dyn ObjectClient>> {
        if let Some(client) = self.clients.get(&CloudKind::Azure) {
            return Ok(Arc::clone(client));
        }
        Ok(Arc::new(blobkit_cloud::ObjectStoreClient::azure(loc)?))
    }

    #[cfg(not(feature = "azure"))]
    fn azure_client(&self, _loc: &AzureLocation) -> StoreResult<Arc<dyn ObjectClient>> {
        self.registered(CloudKind::Azure)
    }
}

/// Open `location` with a default factory.
pub async fn open_store(location: &str, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
    StoreFactory::new().open_str(location, config).await
}
