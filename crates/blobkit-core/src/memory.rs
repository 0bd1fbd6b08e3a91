use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tracing::debug;
use url::Url;

use crate::attributes::ObjectAttributes;
use crate::codec;
use crate::config::StoreConfig;
use crate::context::CallContext;
use crate::error::{StoreError, StoreResult};
use crate::path::PathResolver;
use crate::traits::{ObjectReader, Store};
use crate::walk::{before_start, check_starting_point, Visitor};

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

type Objects = Arc<RwLock<BTreeMap<String, MemoryObject>>>;

/// In-memory, BTreeMap-based store.
///
/// Intended for tests and embedding. Objects are keyed by their physical
/// path and stored encoded, exactly as a remote backend would hold them.
/// Sub-stores and reconfigured handles share the same map.
#[derive(Clone)]
pub struct MemoryStore {
    objects: Objects,
    paths: PathResolver,
    base_url: Url,
    config: StoreConfig,
}

fn memory_url(base: &str) -> StoreResult<Url> {
    Url::parse(&format!("memory://{base}"))
        .map_err(|e| StoreError::invalid_usage(format!("memory base {base:?}: {e}")))
}

impl MemoryStore {
    /// Create a new empty store scoped at `base`.
    pub fn new(base: &str, config: StoreConfig) -> StoreResult<Self> {
        let paths = PathResolver::new(base.trim_start_matches('/'), config.extension())?;
        Ok(Self {
            objects: Arc::default(),
            base_url: memory_url(paths.base())?,
            paths,
            config,
        })
    }

    /// Number of objects across every scope sharing this map.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no scope holds any object.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total stored (encoded) bytes.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|obj| obj.data.len() as u64)
            .sum()
    }

    /// Remove all objects from the store.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }

    fn get(&self, path: &str) -> Option<MemoryObject> {
        self.objects.read().expect("lock poisoned").get(path).cloned()
    }

    fn derive(&self, paths: PathResolver, config: StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            objects: Arc::clone(&self.objects),
            base_url: memory_url(paths.base())?,
            paths,
            config,
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("base", &self.paths.base())
            .field("object_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn paths(&self) -> &PathResolver {
        &self.paths
    }

    fn object_url(&self, name: &str) -> String {
        format!("memory://{}", self.paths.object_path(name))
    }

    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    async fn open_object(&self, cx: &CallContext, name: &str) -> StoreResult<ObjectReader> {
        cx.check()?;
        let path = self.paths.object_path(name);
        let object = self
            .get(&path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;

        let decoded = codec::decode(
            Box::new(Cursor::new(object.data)),
            self.config.compression(),
            &self.config.hooks,
        );
        Ok(ObjectReader::new(decoded, path, cx))
    }

    async fn write_object(
        &self,
        cx: &CallContext,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<()> {
        let path = self.paths.object_path(name);
        if !self.config.overwrite() && self.get(&path).is_some() {
            debug!(path = %path, trace_id = cx.trace_id(), "object exists and overwrite is off, skipping write");
            return Ok(());
        }

        let mut encoded = Vec::new();
        cx.run(async {
            codec::encode(source, &mut encoded, self.config.compression(), &self.config.hooks)
                .await?;
            Ok(())
        })
        .await?;

        let mut map = self.objects.write().expect("lock poisoned");
        // Re-check under the lock: a concurrent writer may have won.
        if !self.config.overwrite() && map.contains_key(&path) {
            return Ok(());
        }
        map.insert(
            path,
            MemoryObject {
                data: Bytes::from(encoded),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn file_exists(&self, cx: &CallContext, name: &str) -> StoreResult<bool> {
        cx.check()?;
        Ok(self.get(&self.paths.object_path(name)).is_some())
    }

    async fn object_attributes(
        &self,
        cx: &CallContext,
        name: &str,
    ) -> StoreResult<ObjectAttributes> {
        cx.check()?;
        let path = self.paths.object_path(name);
        let object = self.get(&path).ok_or(StoreError::NotFound(path))?;
        Ok(ObjectAttributes::new(object.data.len() as u64, object.modified))
    }

    async fn delete_object(&self, cx: &CallContext, name: &str) -> StoreResult<()> {
        cx.check()?;
        let path = self.paths.object_path(name);
        let mut map = self.objects.write().expect("lock poisoned");
        match map.remove(&path) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(path)),
        }
    }

    async fn walk_from(
        &self,
        cx: &CallContext,
        prefix: &str,
        starting_point: &str,
        visit: Visitor<'_>,
    ) -> StoreResult<()> {
        check_starting_point(prefix, starting_point)?;
        let target = self.paths.prefix_path(prefix);
        // Every name at or above the starting point maps to a key at or
        // above its path, so the scan can begin there.
        let lower = if starting_point.is_empty() {
            target.clone()
        } else {
            self.paths.prefix_path(starting_point)
        };

        let mut names: Vec<String> = {
            let map = self.objects.read().expect("lock poisoned");
            map.range(lower..)
                .map(|(key, _)| key)
                .take_while(|key| key.starts_with(target.as_str()))
                .map(|key| self.paths.to_base_name(key))
                .filter(|name| {
                    !name.is_empty() && name.starts_with(prefix) && !before_start(name, starting_point)
                })
                .collect()
        };
        names.sort();

        for name in names {
            cx.check()?;
            if let ControlFlow::Break(()) = visit(&name)? {
                break;
            }
        }
        Ok(())
    }

    fn sub_store(&self, sub: &str) -> StoreResult<Box<dyn Store>> {
        Ok(Box::new(self.derive(self.paths.join(sub)?, self.config.clone())?))
    }

    fn reconfigure(&self, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        let paths = self.paths.with_extension(config.extension());
        Ok(Box::new(self.derive(paths, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::config::StoreOptions;
    use crate::traits::{read_bytes, write_bytes};

    fn store(options: StoreOptions) -> MemoryStore {
        MemoryStore::new("base", StoreConfig::new(options)).unwrap()
    }

    #[tokio::test]
    async fn stores_encoded_bytes() {
        let store = store(StoreOptions::jsonl());
        let cx = CallContext::new();
        let payload = vec![b'{'; 4096];

        write_bytes(&store, &cx, "a", &payload).await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.total_bytes() < payload.len() as u64);
        assert_eq!(read_bytes(&store, &cx, "a").await.unwrap(), payload);
        assert_eq!(store.object_path("a"), "base/a.jsonl.gz");
    }

    #[tokio::test]
    async fn attributes_report_stored_size() {
        let store = store(StoreOptions::simple());
        let cx = CallContext::new();
        write_bytes(&store, &cx, "a", b"12345").await.unwrap();

        let attrs = store.object_attributes(&cx, "a").await.unwrap();
        assert_eq!(attrs.size, 5);
        assert!(attrs.last_modified <= Utc::now());
        assert!(store.object_attributes(&cx, "b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn sub_store_shares_objects() {
        let store = store(StoreOptions::simple());
        let cx = CallContext::new();
        let sub = store.sub_store("nested").unwrap();

        write_bytes(sub.as_ref(), &cx, "x", b"1").await.unwrap();

        assert!(store.file_exists(&cx, "nested/x").await.unwrap());
        assert_eq!(sub.list_files(&cx, "", -1).await.unwrap(), ["x"]);
        assert_eq!(sub.base_url().as_str(), "memory://base/nested");
    }

    #[tokio::test]
    async fn scopes_do_not_leak_into_siblings() {
        let store = store(StoreOptions::simple());
        let cx = CallContext::new();
        let a = store.sub_store("a").unwrap();
        let ab = store.sub_store("ab").unwrap();

        write_bytes(a.as_ref(), &cx, "1", b"x").await.unwrap();
        write_bytes(ab.as_ref(), &cx, "2", b"x").await.unwrap();

        assert_eq!(a.list_files(&cx, "", -1).await.unwrap(), ["1"]);
        assert_eq!(ab.list_files(&cx, "", -1).await.unwrap(), ["2"]);
    }

    #[tokio::test]
    async fn reconfigure_changes_codec_not_data() {
        let store = store(StoreOptions::simple());
        let cx = CallContext::new();
        let zstd = store
            .reconfigure(StoreConfig::new(StoreOptions::new("zst", Compression::Zstd, true)))
            .unwrap();

        write_bytes(zstd.as_ref(), &cx, "a", b"compressed").await.unwrap();

        assert!(store.file_exists(&cx, "a.zst").await.unwrap());
        assert_eq!(read_bytes(zstd.as_ref(), &cx, "a").await.unwrap(), b"compressed");
    }

    #[tokio::test]
    async fn clear_empties_shared_map() {
        let store = store(StoreOptions::simple());
        let cx = CallContext::new();
        write_bytes(&store, &cx, "a", b"x").await.unwrap();
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
        assert!(store.delete_object(&cx, "a").await.unwrap_err().is_not_found());
    }
}
