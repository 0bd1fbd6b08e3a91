use std::fmt;

use blobkit_core::walk::start_after_marker;

use crate::client::StartBound;

/// Cloud provider family, and the native primitives each one offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloudKind {
    S3,
    Gcs,
    Azure,
}

impl CloudKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gs",
            Self::Azure => "az",
        }
    }

    /// Whether uploads accept a create-if-absent precondition. Without it
    /// overwrite protection is a racy existence check before the upload.
    pub fn conditional_put(&self) -> bool {
        matches!(self, Self::Gcs)
    }

    /// Listing start for resuming at `starting_point`.
    ///
    /// `relative` is the starting point with the walked prefix removed and
    /// `to_key` maps a name prefix to its physical key. S3 only takes an
    /// exclusive marker, so the start is truncated by one character; Azure
    /// has no start parameter and is gated client-side.
    pub fn list_start(
        &self,
        prefix: &str,
        relative: &str,
        to_key: impl Fn(&str) -> String,
    ) -> Option<StartBound> {
        if relative.is_empty() {
            return None;
        }
        match self {
            Self::S3 => start_after_marker(relative)
                .map(|marker| StartBound::Exclusive(to_key(&format!("{prefix}{marker}")))),
            Self::Gcs => Some(StartBound::Inclusive(to_key(&format!("{prefix}{relative}")))),
            Self::Azure => None,
        }
    }
}

impl fmt::Display for CloudKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> String {
        format!("base/{name}")
    }

    #[test]
    fn s3_truncates_relative_start() {
        assert_eq!(
            CloudKind::S3.list_start("0000/", "0002", key),
            Some(StartBound::Exclusive("base/0000/000".into()))
        );
        assert_eq!(CloudKind::S3.list_start("", "b", key), None);
        assert_eq!(CloudKind::S3.list_start("", "", key), None);
    }

    #[test]
    fn gcs_uses_inclusive_offset() {
        assert_eq!(
            CloudKind::Gcs.list_start("a", "b", key),
            Some(StartBound::Inclusive("base/ab".into()))
        );
    }

    #[test]
    fn azure_has_no_start() {
        assert_eq!(CloudKind::Azure.list_start("", "00000002", key), None);
        assert!(!CloudKind::Azure.conditional_put());
        assert!(CloudKind::Gcs.conditional_put());
    }
}
