use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an object's metadata at retrieval time.
///
/// `size` is the stored (possibly compressed) length in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl ObjectAttributes {
    pub fn new(size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            size,
            last_modified,
        }
    }
}

impl From<&std::fs::Metadata> for ObjectAttributes {
    fn from(meta: &std::fs::Metadata) -> Self {
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Self::new(meta.len(), last_modified)
    }
}
