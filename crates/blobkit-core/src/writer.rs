//! Write-then-commit helpers shared by the backends.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::debug;

use crate::context::CallContext;
use crate::error::StoreResult;
use crate::traits::Store;

/// Suffix of in-flight temporary files. Walks never surface these.
pub const TEMP_SUFFIX: &str = ".tmp";

const TEMP_TAG_LEN: usize = 8;

pub fn is_temp_file(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Unique sibling of `destination` to stream into before the commit.
///
/// The random tag keeps concurrent writers of the same name apart.
pub fn temp_path(destination: &Path) -> PathBuf {
    let mut rng = rand::thread_rng();
    let tag: String = (0..TEMP_TAG_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();

    let mut name = OsString::from(destination.as_os_str());
    name.push(".");
    name.push(tag);
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Upload `local` as `name`, optionally confirm visibility, then delete
/// `local`.
///
/// The local file is only removed once the write succeeded and, when a
/// verify delay is configured, the object was seen (rewriting it once if
/// it was not).
pub async fn push_and_verify<S>(
    store: &S,
    cx: &CallContext,
    local: &Path,
    name: &str,
) -> StoreResult<()>
where
    S: Store + ?Sized,
{
    push_once(store, cx, local, name).await?;

    if let Some(delay) = store.config().retry().push_verify_delay() {
        cx.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await?;

        let visible = store.file_exists(cx, name).await.inspect_err(|err| {
            debug!(
                object = name,
                trace_id = cx.trace_id(),
                error = %err,
                "cannot confirm pushed object"
            );
        })?;

        if !visible {
            debug!(
                object = name,
                trace_id = cx.trace_id(),
                delay_ms = delay.as_millis() as u64,
                "pushed object not visible yet, pushing again"
            );
            push_once(store, cx, local, name).await?;
        }
    }

    tokio::fs::remove_file(local).await?;
    debug!(
        local = %local.display(),
        path = %store.object_path(name),
        trace_id = cx.trace_id(),
        "pushed local file"
    );
    Ok(())
}

async fn push_once<S>(store: &S, cx: &CallContext, local: &Path, name: &str) -> StoreResult<()>
where
    S: Store + ?Sized,
{
    let mut file = tokio::fs::File::open(local).await?;
    store.write_object(cx, name, &mut file).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_unique_sibling() {
        let dest = Path::new("/data/blocks/0001.dbin.zst");
        let a = temp_path(dest);
        let b = temp_path(dest);

        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("0001.dbin.zst."));
        assert!(is_temp_file(name));
        assert_eq!(name.len(), "0001.dbin.zst.".len() + TEMP_TAG_LEN + TEMP_SUFFIX.len());
    }
}
