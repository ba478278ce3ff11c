//! Read/write durability probes
//!
//! Seeds records before any restart and checks them afterwards. Both steps
//! are idempotent: re-seeding writes the same values, re-verifying only reads.

use crate::error::VerifyError;
use crate::kv::{Consistency, KeyValueRecord, KvClient};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writes and checks [`KeyValueRecord`]s through a [`KvClient`]
#[derive(Debug, Clone)]
pub struct Verifier {
    client: Arc<dyn KvClient>,
    consistency: Consistency,
}

impl Verifier {
    /// Create with the given consistency for every request
    #[must_use]
    pub fn new(client: Arc<dyn KvClient>, consistency: Consistency) -> Self {
        Self {
            client,
            consistency,
        }
    }

    /// Consistency used for requests
    #[inline]
    #[must_use]
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Write every record, stopping at the first failure.
    ///
    /// # Errors
    /// [`VerifyError::Write`] naming the record that could not be written.
    pub async fn seed(&self, records: &[KeyValueRecord]) -> Result<(), VerifyError> {
        for record in records {
            debug!(key = record.key(), "seeding");
            self.client
                .put(record.key(), record.value(), self.consistency)
                .await
                .map_err(|source| VerifyError::Write {
                    key: record.key().to_string(),
                    source,
                })?;
        }
        info!(records = records.len(), "seeded records");
        Ok(())
    }

    /// Read every record back, stopping at the first failure.
    ///
    /// # Errors
    /// [`VerifyError::Read`] when a read fails outright, or
    /// [`VerifyError::Mismatch`] when a key is missing or holds another value.
    pub async fn verify(&self, records: &[KeyValueRecord]) -> Result<(), VerifyError> {
        for record in records {
            let actual = self
                .client
                .get(record.key(), self.consistency)
                .await
                .map_err(|source| VerifyError::Read {
                    key: record.key().to_string(),
                    source,
                })?;

            if actual.as_deref() != Some(record.value()) {
                warn!(key = record.key(), expected = record.value(), ?actual, "record mismatch");
                return Err(VerifyError::Mismatch {
                    key: record.key().to_string(),
                    expected: record.value().to_string(),
                    actual,
                });
            }
        }
        debug!(records = records.len(), "verified records");
        Ok(())
    }
}
