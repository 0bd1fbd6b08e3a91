//! Location descriptors: the URL-like strings naming a store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::{StoreError, StoreResult};

/// Parsed store location, one variant per backend family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// Filesystem directory, from a bare path or a `file://` URL.
    Local(PathBuf),
    /// Process-local in-memory store, `memory://[path]`.
    Memory(String),
    S3(S3Location),
    Gcs(GcsLocation),
    Azure(AzureLocation),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Location {
    pub url: Url,
    pub bucket: String,
    /// Key prefix inside the bucket, without leading or trailing `/`.
    pub path: String,
    pub region: String,
    /// Endpoint override (with scheme); addressing is path-style when set.
    pub endpoint: Option<String>,
    pub credentials: Option<StaticCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcsLocation {
    pub url: Url,
    pub bucket: String,
    pub path: String,
    /// Billing project for requester-pays buckets.
    pub project: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureLocation {
    pub url: Url,
    pub account: String,
    pub container: String,
    pub path: String,
}

impl Location {
    pub fn parse(input: &str) -> StoreResult<Self> {
        if input.ends_with('/') && !input.ends_with("://") {
            return Err(StoreError::invalid_usage(format!(
                "location {input:?} must not end with '/'"
            )));
        }
        if !input.contains("://") {
            return Ok(Self::Local(PathBuf::from(input)));
        }

        let url = Url::parse(input)
            .map_err(|e| StoreError::invalid_usage(format!("location {input:?}: {e}")))?;

        match url.scheme() {
            "file" => url.to_file_path().map(Self::Local).map_err(|()| {
                StoreError::invalid_usage(format!("location {input:?} is not a valid file URL"))
            }),
            "memory" => {
                let host = url.host_str().unwrap_or("");
                let path = format!("{host}{}", url.path());
                Ok(Self::Memory(path.trim_matches('/').to_string()))
            }
            "s3" => parse_s3(url).map(Self::S3),
            "gs" => parse_gcs(url).map(Self::Gcs),
            "az" => parse_azure(url).map(Self::Azure),
            other => Err(StoreError::invalid_usage(format!(
                "unsupported scheme {other:?}, expected a path or one of file://, memory://, s3://, gs://, az://"
            ))),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Local(_) => "file",
            Self::Memory(_) => "memory",
            Self::S3(_) => "s3",
            Self::Gcs(_) => "gs",
            Self::Azure(_) => "az",
        }
    }
}

impl FromStr for Location {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn required_host(url: &Url, what: &str) -> StoreResult<String> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(StoreError::invalid_usage(format!(
            "location {url} is missing the {what}"
        ))),
    }
}

/// A port, or a dotted host unless `infer_aws_endpoint` is set, means the
/// host is an endpoint and the bucket is the first path segment.
fn has_custom_endpoint(url: &Url) -> bool {
    if url.port().is_some() {
        return true;
    }
    match url.host_str() {
        Some(host) if host.contains('.') => query_param(url, "infer_aws_endpoint").is_none(),
        _ => false,
    }
}

fn parse_s3(url: Url) -> StoreResult<S3Location> {
    let region = query_param(&url, "region").ok_or_else(|| {
        StoreError::invalid_usage("specify the s3 region like: s3://bucket/path?region=us-east-1")
    })?;

    let host = required_host(&url, "bucket")?;
    let trimmed = url.path().trim_matches('/');

    let (bucket, path, endpoint) = if has_custom_endpoint(&url) {
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let scheme = if query_param(&url, "insecure").is_some() {
            "http"
        } else {
            "https"
        };
        let (bucket, path) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if bucket.is_empty() {
            return Err(StoreError::invalid_usage(format!(
                "location {url} names an endpoint but no bucket"
            )));
        }
        (
            bucket.to_string(),
            path.to_string(),
            Some(format!("{scheme}://{authority}")),
        )
    } else {
        (host, trimmed.to_string(), None)
    };

    let credentials = match (
        query_param(&url, "access_key_id"),
        query_param(&url, "secret_access_key"),
    ) {
        (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
            access_key_id,
            secret_access_key,
        }),
        _ => None,
    };

    Ok(S3Location {
        url,
        bucket,
        path,
        region,
        endpoint,
        credentials,
    })
}

fn parse_gcs(url: Url) -> StoreResult<GcsLocation> {
    let bucket = required_host(&url, "bucket")?;
    let path = url.path().trim_matches('/').to_string();
    let project = query_param(&url, "project");
    Ok(GcsLocation {
        url,
        bucket,
        path,
        project,
    })
}

fn parse_azure(url: Url) -> StoreResult<AzureLocation> {
    let host = required_host(&url, "account and container")?;
    let (account, container) = match host.split('.').collect::<Vec<_>>().as_slice() {
        [account, container] if !account.is_empty() && !container.is_empty() => {
            (account.to_string(), container.to_string())
        }
        _ => {
            return Err(StoreError::invalid_usage(format!(
                "azure location {url} must look like az://account.container/path"
            )))
        }
    };
    let path = url.path().trim_matches('/').to_string();
    Ok(AzureLocation {
        url,
        account,
        container,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3(input: &str) -> S3Location {
        match Location::parse(input).unwrap() {
            Location::S3(loc) => loc,
            other => panic!("expected s3 location, got {other:?}"),
        }
    }

    #[test]
    fn bare_path_is_local() {
        assert_eq!(
            Location::parse("./data/blocks").unwrap(),
            Location::Local(PathBuf::from("./data/blocks"))
        );
        assert_eq!(
            Location::parse("file:///tmp/blocks").unwrap(),
            Location::Local(PathBuf::from("/tmp/blocks"))
        );
    }

    #[test]
    fn trailing_separator_is_rejected() {
        for input in ["/tmp/data/", "s3://bucket/path/", "gs://bucket/"] {
            assert!(matches!(
                Location::parse(input),
                Err(StoreError::InvalidUsage(_))
            ));
        }
    }

    #[test]
    fn memory_location_keeps_path() {
        assert_eq!(Location::parse("memory://").unwrap(), Location::Memory(String::new()));
        assert_eq!(
            Location::parse("memory://tests/a").unwrap(),
            Location::Memory("tests/a".into())
        );
    }

    #[test]
    fn s3_plain_bucket() {
        let loc = s3("s3://my-bucket/some/prefix?region=us-east-1");
        assert_eq!(loc.bucket, "my-bucket");
        assert_eq!(loc.path, "some/prefix");
        assert_eq!(loc.region, "us-east-1");
        assert!(loc.endpoint.is_none());
        assert!(loc.credentials.is_none());
    }

    #[test]
    fn s3_requires_region() {
        assert!(matches!(
            Location::parse("s3://bucket/path"),
            Err(StoreError::InvalidUsage(_))
        ));
    }

    #[test]
    fn s3_endpoint_with_port_is_path_style() {
        let loc = s3("s3://localhost:9000/bucket/a/b?region=none&insecure=true&access_key_id=k&secret_access_key=s");
        assert_eq!(loc.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(loc.bucket, "bucket");
        assert_eq!(loc.path, "a/b");
        let creds = loc.credentials.unwrap();
        assert_eq!(creds.access_key_id, "k");
        assert!(!format!("{creds:?}").contains("\"s\""));
    }

    #[test]
    fn s3_dotted_host_is_endpoint_unless_inferred() {
        let loc = s3("s3://storage.example.com/bucket?region=eu");
        assert_eq!(loc.endpoint.as_deref(), Some("https://storage.example.com"));
        assert_eq!(loc.bucket, "bucket");
        assert_eq!(loc.path, "");

        let loc = s3("s3://my.dotted.bucket/path?region=eu&infer_aws_endpoint=true");
        assert!(loc.endpoint.is_none());
        assert_eq!(loc.bucket, "my.dotted.bucket");
    }

    #[test]
    fn gcs_and_azure() {
        match Location::parse("gs://bucket/a/b?project=billing").unwrap() {
            Location::Gcs(loc) => {
                assert_eq!(loc.bucket, "bucket");
                assert_eq!(loc.path, "a/b");
                assert_eq!(loc.project.as_deref(), Some("billing"));
            }
            other => panic!("unexpected {other:?}"),
        }

        match Location::parse("az://acct.container/x").unwrap() {
            Location::Azure(loc) => {
                assert_eq!(loc.account, "acct");
                assert_eq!(loc.container, "container");
                assert_eq!(loc.path, "x");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Location::parse("az://noaccount/x").is_err());
    }

    #[test]
    fn unknown_scheme_is_invalid_usage() {
        let err = Location::parse("ftp://host/path").unwrap_err();
        assert!(matches!(err, StoreError::InvalidUsage(_)));
    }
}
