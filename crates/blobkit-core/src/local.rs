//! Filesystem-backed store.
//!
//! Objects live at `root/name.ext`. Writes stream into a random `.tmp`
//! sibling that is committed with a rename (or a hard link when overwrite
//! is off), so readers only ever see complete files. Walks run `walkdir`
//! on a blocking thread and stream names back over a channel.

use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;
use walkdir::{DirEntry, WalkDir};

use crate::attributes::ObjectAttributes;
use crate::codec::{self, ObjectBody};
use crate::config::StoreConfig;
use crate::context::CallContext;
use crate::error::{StoreError, StoreResult};
use crate::path::PathResolver;
use crate::traits::{ObjectReader, Store};
use crate::walk::{before_start, check_starting_point, Visitor};
use crate::writer::{is_temp_file, temp_path};

/// Store rooted at a local directory.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
    paths: PathResolver,
    base_url: Url,
    config: StoreConfig,
}

/// Names buffered between the directory walker and the visitor.
const WALK_BUFFER: usize = 256;

/// Wrap a filesystem failure with the operation and path it hit.
fn io_context(action: &str, path: &Path, err: std::io::Error) -> StoreError {
    StoreError::upstream(format!("{action} {}", path.display()), err)
}

impl LocalStore {
    /// Open (creating if needed) the directory at `root`.
    pub async fn open(root: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        let mut root = root.into();
        if root.as_os_str().is_empty() {
            root = PathBuf::from(".");
        }

        match fs::metadata(&root).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(StoreError::invalid_usage(format!(
                    "base path {} is a file, expected a directory",
                    root.display()
                )))
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&root)
                    .await
                    .map_err(|err| io_context("creating directory", &root, err))?;
                debug!(root = %root.display(), "created store directory");
            }
            Err(err) => return Err(io_context("inspecting base path", &root, err)),
        }

        let absolute = fs::canonicalize(&root)
            .await
            .map_err(|err| io_context("resolving base path", &root, err))?;
        let base_url = Url::from_file_path(&absolute).map_err(|()| {
            StoreError::invalid_usage(format!("cannot express {} as a URL", root.display()))
        })?;
        let base = root.to_str().ok_or_else(|| {
            StoreError::invalid_usage(format!("base path {} is not valid UTF-8", root.display()))
        })?;
        let paths = PathResolver::new(base, config.extension())?;

        Ok(Self {
            root,
            paths,
            base_url,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> PathBuf {
        PathBuf::from(self.paths.object_path(name))
    }

    async fn write_temp(
        &self,
        temp: &Path,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<()> {
        let file = File::create(temp)
            .await
            .map_err(|err| io_context("creating temporary file", temp, err))?;
        let mut out = BufWriter::new(file);
        codec::encode(source, &mut out, self.config.compression(), &self.config.hooks)
            .await
            .map_err(|err| io_context("writing temporary file", temp, err))?;
        out.flush()
            .await
            .map_err(|err| io_context("flushing temporary file", temp, err))?;
        out.into_inner()
            .sync_all()
            .await
            .map_err(|err| io_context("syncing temporary file", temp, err))?;
        Ok(())
    }

    async fn commit(&self, temp: &Path, destination: &Path) -> StoreResult<()> {
        if self.config.overwrite() {
            return fs::rename(temp, destination)
                .await
                .map_err(|err| io_context("renaming temporary file to", destination, err));
        }

        // A hard link fails instead of replacing an existing destination.
        match fs::hard_link(temp, destination).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %destination.display(), "object appeared during write, keeping existing");
            }
            Err(err) => return Err(io_context("linking temporary file to", destination, err)),
        }
        fs::remove_file(temp)
            .await
            .map_err(|err| io_context("removing temporary file", temp, err))
    }
}

/// One walk over the local tree, executed on a blocking thread.
struct LocalWalk {
    root: PathBuf,
    /// Deepest directory the prefix fully names, relative to the root.
    start_dir: String,
    prefix: String,
    starting_point: String,
    paths: PathResolver,
}

impl LocalWalk {
    /// Send every matching name, in logical order, until the receiver hangs
    /// up or an error has been sent.
    fn run(self, names: mpsc::Sender<StoreResult<String>>) {
        let dir = self.root.join(&self.start_dir);
        let paths = self.paths.clone();
        let entries = WalkDir::new(&dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by(move |a, b| sort_key(&paths, a).cmp(&sort_key(&paths, b)))
            .into_iter()
            .filter_entry(|entry| self.descend(entry));

        for entry in entries {
            let item = match entry {
                Ok(entry) => match self.name_of(&entry) {
                    Some(name) => Ok(name),
                    None => continue,
                },
                Err(err) if err.depth() == 0 && is_not_found(&err) => return,
                Err(err) => {
                    let path = err.path().unwrap_or(dir.as_path()).to_path_buf();
                    Err(StoreError::upstream(
                        format!("walking directory {}", path.display()),
                        err,
                    ))
                }
            };
            let failed = item.is_err();
            if names.blocking_send(item).is_err() || failed {
                return;
            }
        }
    }

    /// Key of `path` relative to the root, `/`-separated.
    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|part| part.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    /// Whether the walker should enter `entry`. Only directories are pruned:
    /// those that cannot hold names under the prefix, and those sorting
    /// entirely below the starting point.
    fn descend(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return true;
        }
        let Some(key) = self.relative_key(entry.path()) else {
            trace!(path = %entry.path().display(), "skipping non UTF-8 directory");
            return false;
        };
        let key = format!("{key}/");
        let overlaps = key.starts_with(&self.prefix) || self.prefix.starts_with(key.as_str());
        let below_start =
            before_start(&key, &self.starting_point) && !self.starting_point.starts_with(key.as_str());
        overlaps && !below_start
    }

    fn name_of(&self, entry: &DirEntry) -> Option<String> {
        if entry.file_type().is_dir() || entry.file_name().to_str().map_or(true, is_temp_file) {
            return None;
        }
        let relative = self.relative_key(entry.path())?;
        let name = self.paths.strip_extension(&relative);
        if name.is_empty() || !name.starts_with(&self.prefix) || before_start(name, &self.starting_point) {
            return None;
        }
        Some(name.to_string())
    }
}

/// Sort siblings the way their names compare: directories as `dir/`, files
/// without the extension.
fn sort_key(paths: &PathResolver, entry: &DirEntry) -> String {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        format!("{name}/")
    } else {
        paths.strip_extension(&name).to_string()
    }
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error().map(|err| err.kind()) == Some(ErrorKind::NotFound)
}

#[async_trait]
impl Store for LocalStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn paths(&self) -> &PathResolver {
        &self.paths
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.paths.relative_path(name).trim_start_matches('/')
        )
    }

    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    async fn open_object(&self, cx: &CallContext, name: &str) -> StoreResult<ObjectReader> {
        let path = self.paths.object_path(name);
        debug!(path = %path, trace_id = cx.trace_id(), "opening local object");

        let file = cx
            .run(async {
                match File::open(&path).await {
                    Ok(file) => Ok(file),
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        Err(StoreError::NotFound(path.clone()))
                    }
                    Err(err) => Err(StoreError::upstream(format!("opening {path}"), err)),
                }
            })
            .await?;

        let body: ObjectBody = Box::new(BufReader::new(file));
        let decoded = codec::decode(body, self.config.compression(), &self.config.hooks);
        Ok(ObjectReader::new(decoded, path, cx))
    }

    async fn write_object(
        &self,
        cx: &CallContext,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<()> {
        cx.check()?;
        let destination = self.file_path(name);

        if !self.config.overwrite() {
            let exists = fs::try_exists(&destination)
                .await
                .map_err(|err| io_context("checking", &destination, err))?;
            if exists {
                debug!(
                    path = %destination.display(),
                    trace_id = cx.trace_id(),
                    "object exists and overwrite is off, skipping write"
                );
                return Ok(());
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_context("creating directory", parent, err))?;
        }

        let temp = temp_path(&destination);
        let res = cx
            .run(async {
                self.write_temp(&temp, source).await?;
                self.commit(&temp, &destination).await
            })
            .await;

        if let Err(err) = &res {
            debug!(
                path = %destination.display(),
                trace_id = cx.trace_id(),
                error = %err,
                "write failed, removing temporary file"
            );
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    debug!(
                        path = %temp.display(),
                        error = %cleanup,
                        "failed to remove temporary file"
                    );
                }
            }
        } else {
            trace!(path = %destination.display(), trace_id = cx.trace_id(), "wrote local object");
        }
        res
    }

    async fn file_exists(&self, cx: &CallContext, name: &str) -> StoreResult<bool> {
        cx.check()?;
        let path = self.file_path(name);
        fs::try_exists(&path)
            .await
            .map_err(|err| io_context("checking", &path, err))
    }

    async fn object_attributes(
        &self,
        cx: &CallContext,
        name: &str,
    ) -> StoreResult<ObjectAttributes> {
        cx.check()?;
        let path = self.paths.object_path(name);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(ObjectAttributes::from(&meta)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path)),
            Err(err) => Err(StoreError::upstream(format!("reading attributes of {path}"), err)),
        }
    }

    async fn delete_object(&self, cx: &CallContext, name: &str) -> StoreResult<()> {
        cx.check()?;
        let path = self.paths.object_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path)),
            Err(err) => Err(StoreError::upstream(format!("deleting {path}"), err)),
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

        // Start at the deepest directory the prefix fully names; the rest of
        // the prefix is matched against entry names.
        let start_dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        debug!(
            root = %self.root.display(),
            prefix,
            starting_point,
            trace_id = cx.trace_id(),
            "walking local store"
        );

        let walk = LocalWalk {
            root: self.root.clone(),
            start_dir: start_dir.to_string(),
            prefix: prefix.to_string(),
            starting_point: starting_point.to_string(),
            paths: self.paths.clone(),
        };
        let (sender, mut names) = mpsc::channel(WALK_BUFFER);
        let walker = tokio::task::spawn_blocking(move || walk.run(sender));

        // Returning early drops the receiver, which stops the walker.
        while let Some(name) = cx.run(async { Ok(names.recv().await) }).await? {
            if let ControlFlow::Break(()) = visit(&name?)? {
                return Ok(());
            }
        }
        walker.await.map_err(|err| {
            StoreError::upstream(format!("walking {}", self.root.display()), err)
        })
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
            root: PathBuf::from(paths.base()),
            paths,
            base_url,
            config: self.config.clone(),
        }))
    }

    fn reconfigure(&self, config: StoreConfig) -> StoreResult<Box<dyn Store>> {
        Ok(Box::new(Self {
            root: self.root.clone(),
            paths: self.paths.with_extension(config.extension()),
            base_url: self.base_url.clone(),
            config,
        }))
    }
}
