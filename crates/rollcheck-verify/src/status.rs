//! Cluster status surface
//!
//! A single aggregate endpoint advertising the server and cluster versions:
//!
//! ```text
//! GET /version
//! {"etcdserver":"3.6.0","etcdcluster":"3.6.0"}
//! ```

use crate::error::StatusError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Well-known path of the version document
pub const VERSION_PATH: &str = "/version";

/// Version document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version of the member that answered
    #[serde(rename = "etcdserver")]
    pub server: String,
    /// Version the cluster as a whole has agreed on
    #[serde(rename = "etcdcluster")]
    pub cluster: String,
}

/// Major.minor cluster version for a full release version.
///
/// `"3.6.0"` becomes `"3.6"`; anything without a minor component is returned as is.
#[must_use]
pub fn cluster_version(release: &str) -> String {
    let mut parts = release.trim_start_matches('v').splitn(3, '.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => release.to_string(),
    }
}

/// Whether a reported cluster version satisfies `target`.
///
/// Matches on equality, or when `reported` extends `target` with more
/// dot-separated components (`"3.6.0"` satisfies `"3.6"`, `"3.60"` does not).
#[must_use]
pub fn version_matches(reported: &str, target: &str) -> bool {
    reported == target
        || reported
            .strip_prefix(target)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Cluster status surface
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync + fmt::Debug {
    /// Fetch the current version document.
    ///
    /// # Errors
    /// [`StatusError`] when the surface cannot be queried.
    async fn version(&self) -> Result<VersionInfo, StatusError>;
}

/// Queries `<endpoint>/version` over HTTP
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusSource {
    /// Create for one member's client URL
    ///
    /// # Errors
    /// [`StatusError::Request`] when the HTTP client cannot be built or the
    /// CA bundle cannot be read.
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        ca_file: Option<&Path>,
    ) -> Result<Self, StatusError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(ca_file) = ca_file {
            let pem = std::fs::read(ca_file)
                .map_err(|e| StatusError::Request(format!("reading {}: {e}", ca_file.display())))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| StatusError::Request(format!("parsing CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| StatusError::Request(format!("building client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{VERSION_PATH}", endpoint.trim_end_matches('/')),
        })
    }

    /// Full URL queried
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl StatusSource for HttpStatusSource {
    async fn version(&self) -> Result<VersionInfo, StatusError> {
        debug!(url = %self.url, "querying version");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StatusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StatusError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StatusError::Request(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| StatusError::Decode(format!("{e}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_version_drops_patch() {
        assert_eq!(cluster_version("3.6.0"), "3.6");
        assert_eq!(cluster_version("v3.5.17"), "3.5");
        assert_eq!(cluster_version("3.6.0-alpha.0"), "3.6");
        assert_eq!(cluster_version("3"), "3");
    }

    #[test]
    fn version_matching_respects_component_boundaries() {
        assert!(version_matches("3.6.0", "3.6"));
        assert!(version_matches("3.6", "3.6"));
        assert!(!version_matches("3.5.0", "3.6"));
        assert!(!version_matches("3.60.0", "3.6"));
        assert!(!version_matches("", "3.6"));
    }

    #[test]
    fn version_document_decodes() {
        let info: VersionInfo =
            serde_json::from_str(r#"{"etcdserver":"3.6.1","etcdcluster":"3.6.0"}"#).unwrap();
        assert_eq!(info.server, "3.6.1");
        assert_eq!(info.cluster, "3.6.0");
    }

    #[test]
    fn url_appends_version_path() {
        let source =
            HttpStatusSource::new("http://localhost:20000/", Duration::from_secs(1), None).unwrap();
        assert_eq!(source.url(), "http://localhost:20000/version");
    }

    #[test]
    fn missing_ca_bundle_is_reported() {
        let err = HttpStatusSource::new(
            "https://localhost:20000",
            Duration::from_secs(1),
            Some(Path::new("/nonexistent/ca.pem")),
        )
        .unwrap_err();
        assert!(matches!(err, StatusError::Request(_)));
    }
}
