//! rollcheck verification
//!
//! Everything the harness checks about a cluster, independent of how the
//! cluster was launched:
//! - [`Verifier`]: seeds probe records and reads them back
//! - [`ConvergencePoller`]: waits for the advertised cluster version
//! - [`KvClient`] / [`StatusSource`]: the client and status surfaces, with
//!   [`EtcdctlClient`] and [`HttpStatusSource`] for real clusters
//! - [`Retry`]: the bounded retry combinator both are built on

#![warn(unreachable_pub)]

pub mod convergence;
pub mod ctl;
pub mod error;
pub mod kv;
pub mod retry;
pub mod status;
pub mod verifier;

pub use convergence::{Converged, ConvergencePoller, ConvergenceTarget};
pub use ctl::EtcdctlClient;
pub use error::{ConvergenceError, KvError, StatusError, VerifyError};
pub use kv::{probe_records, ClientOptions, ClientTls, Consistency, KeyValueRecord, KvClient};
pub use retry::{retry, Exhausted, Retry, Succeeded};
pub use status::{
    cluster_version, version_matches, HttpStatusSource, StatusSource, VersionInfo, VERSION_PATH,
};
pub use verifier::Verifier;
