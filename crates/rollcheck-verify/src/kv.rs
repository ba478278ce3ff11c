//! Key-value client surface
//!
//! The harness writes and reads probe records through [`KvClient`] and never
//! depends on how the client reaches the cluster.

use crate::error::KvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Key/value pair used as a durability probe
///
/// Created before any restart and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValueRecord {
    key: String,
    value: String,
}

impl KeyValueRecord {
    /// Create a record
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Record key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for KeyValueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// `count` records `{prefix}0..{prefix}{count-1}`, all holding `value`
#[must_use]
pub fn probe_records(prefix: &str, count: usize, value: &str) -> Vec<KeyValueRecord> {
    (0..count)
        .map(|i| KeyValueRecord::new(format!("{prefix}{i}"), value))
        .collect()
}

/// Read/write consistency requested from the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Served only after a majority agrees
    #[default]
    Quorum,
    /// Served from whichever member answers
    Serializable,
}

impl Consistency {
    /// From a quorum flag
    #[inline]
    #[must_use]
    pub fn from_quorum(quorum: bool) -> Self {
        if quorum {
            Self::Quorum
        } else {
            Self::Serializable
        }
    }
}

/// Client-side TLS material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTls {
    /// CA bundle used to verify members
    pub ca_file: PathBuf,
    /// Client certificate
    pub cert_file: PathBuf,
    /// Client key
    pub key_file: PathBuf,
}

/// Connection options for a [`KvClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// How long to wait for a connection to any member
    pub dial_timeout: Duration,
    /// Whether reads and writes require quorum
    pub consistency: Consistency,
    /// Upper bound on one request, including the dial
    pub request_timeout: Duration,
    /// Client TLS, when the cluster serves TLS
    pub tls: Option<ClientTls>,
}

impl ClientOptions {
    /// With dial timeout; the request timeout follows at twice the dial
    #[must_use]
    pub fn with_dial_timeout(mut self, dial: Duration) -> Self {
        self.dial_timeout = dial;
        self.request_timeout = dial * 2;
        self
    }

    /// With consistency
    #[must_use]
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// With client TLS
    #[must_use]
    pub fn with_tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(7),
            consistency: Consistency::Quorum,
            request_timeout: Duration::from_secs(14),
            tls: None,
        }
    }
}

/// Key-value client surface
#[async_trait::async_trait]
pub trait KvClient: Send + Sync + fmt::Debug {
    /// Write `value` under `key`.
    ///
    /// # Errors
    /// [`KvError`] when the write is rejected or not acknowledged in time.
    async fn put(&self, key: &str, value: &str, consistency: Consistency) -> Result<(), KvError>;

    /// Read `key`; `Ok(None)` when it does not exist.
    ///
    /// # Errors
    /// [`KvError`] when the read cannot be served.
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<String>, KvError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_records_are_numbered_from_zero() {
        let records = probe_records("foo", 5, "bar");
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], KeyValueRecord::new("foo0", "bar"));
        assert_eq!(records[4].key(), "foo4");
        assert!(records.iter().all(|r| r.value() == "bar"));
    }

    #[test]
    fn dial_timeout_scales_request_timeout() {
        let opts = ClientOptions::default().with_dial_timeout(Duration::from_secs(3));
        assert_eq!(opts.request_timeout, Duration::from_secs(6));
    }

    #[test]
    fn quorum_flag_maps_to_consistency() {
        assert_eq!(Consistency::from_quorum(true), Consistency::Quorum);
        assert_eq!(Consistency::from_quorum(false), Consistency::Serializable);
    }
}
