use crate::error::{StoreError, StoreResult};

/// Translates logical object names to physical paths (or keys) and back.
///
/// `base` is the store's scope, either a filesystem directory or a key
/// prefix inside a bucket; it may be empty for a bucket root. Names are
/// joined verbatim, so nested names keep their separators and
/// [`to_base_name`](Self::to_base_name) is the exact inverse of
/// [`object_path`](Self::object_path).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathResolver {
    base: String,
    extension: String,
}

impl PathResolver {
    pub fn new(base: impl Into<String>, extension: impl Into<String>) -> StoreResult<Self> {
        let base = base.into();
        if base.ends_with('/') {
            return Err(StoreError::invalid_usage(format!(
                "base location {base:?} must not end with '/'"
            )));
        }
        Ok(Self {
            base,
            extension: extension.into(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `base/name.ext`, or `base/name` without an extension.
    pub fn object_path(&self, name: &str) -> String {
        self.prefix_path(&self.relative_path(name))
    }

    /// `name.ext`, relative to the base.
    pub fn relative_path(&self, name: &str) -> String {
        if self.extension.is_empty() {
            name.to_string()
        } else {
            format!("{name}.{}", self.extension)
        }
    }

    /// `base/prefix`, with no extension. Used to scope listings.
    pub fn prefix_path(&self, prefix: &str) -> String {
        if self.base.is_empty() {
            prefix.to_string()
        } else {
            format!("{}/{}", self.base, prefix)
        }
    }

    /// Strip the base scope and the extension suffix from a physical path.
    pub fn to_base_name(&self, path: &str) -> String {
        let relative = if self.base.is_empty() {
            path
        } else {
            path.strip_prefix(self.base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(path)
        };
        self.strip_extension(relative).to_string()
    }

    /// Drop the `.ext` suffix from a name relative to the base.
    pub fn strip_extension<'a>(&self, relative: &'a str) -> &'a str {
        if self.extension.is_empty() {
            return relative;
        }
        relative
            .strip_suffix(self.extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(relative)
    }

    /// Resolver scoped one level deeper, at `base/sub`.
    pub fn join(&self, sub: &str) -> StoreResult<Self> {
        if sub.is_empty() {
            return Err(StoreError::invalid_usage("sub-store path must not be empty"));
        }
        Self::new(self.prefix_path(sub.trim_start_matches('/')), self.extension.clone())
    }

    pub fn with_extension(&self, extension: impl Into<String>) -> Self {
        Self {
            base: self.base.clone(),
            extension: extension.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn joins_base_name_and_extension() {
        let paths = PathResolver::new("/data/blocks", "dbin.zst").unwrap();
        assert_eq!(paths.object_path("0001/a"), "/data/blocks/0001/a.dbin.zst");
        assert_eq!(paths.to_base_name("/data/blocks/0001/a.dbin.zst"), "0001/a");
    }

    #[test]
    fn empty_base_is_bucket_root() {
        let paths = PathResolver::new("", "").unwrap();
        assert_eq!(paths.object_path("a/b"), "a/b");
        assert_eq!(paths.prefix_path("a"), "a");
        assert_eq!(paths.to_base_name("a/b"), "a/b");
    }

    #[test]
    fn rejects_trailing_separator() {
        assert!(matches!(
            PathResolver::new("bucket/path/", ""),
            Err(StoreError::InvalidUsage(_))
        ));
    }

    #[test]
    fn join_nests_base() {
        let paths = PathResolver::new("root", "gz").unwrap();
        let nested = paths.join("sub/dir").unwrap();
        assert_eq!(nested.object_path("x"), "root/sub/dir/x.gz");
        assert!(paths.join("").is_err());
        assert!(paths.join("sub/").is_err());
    }

    #[test]
    fn strip_extension_leaves_foreign_names() {
        let paths = PathResolver::new("b", "jsonl.gz").unwrap();
        assert_eq!(paths.strip_extension("a.jsonl.gz"), "a");
        assert_eq!(paths.strip_extension("a.txt"), "a.txt");
        assert_eq!(paths.strip_extension("ajsonl.gz"), "ajsonl.gz");
    }

    proptest! {
        #[test]
        fn base_name_inverts_object_path(
            base in "(/?[a-z0-9]{1,8}(/[a-z0-9._-]{1,8}){0,3})?",
            ext in "([a-z]{1,4}(\\.[a-z]{1,4})?)?",
            name in "[a-zA-Z0-9._/-]{1,24}",
        ) {
            let paths = PathResolver::new(base, ext).unwrap();
            prop_assert_eq!(paths.to_base_name(&paths.object_path(&name)), name);
        }
    }
}
