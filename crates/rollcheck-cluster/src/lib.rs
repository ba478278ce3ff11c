//! rollcheck cluster control
//!
//! Launches a multi-member server cluster as local processes and drives the
//! per-member stop / reconfigure / restart operations an upgrade test needs:
//! - [`ClusterConfig`] / [`NodeProcessConfig`]: cluster and per-member launch descriptors
//! - [`ProcessControl`]: the process control surface, with [`OsProcessControl`] for real binaries
//! - [`ClusterHandle`]: owns every member and releases them on every exit path
//! - [`LifecycleController`]: stop, `upgrade_config`, restart, and concurrent restart groups
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcheck_cluster::prelude::*;
//!
//! let control = Arc::new(OsProcessControl::default());
//! let mut cluster = ClusterHandle::start(ClusterConfig::no_tls(), &bins, control).await?;
//! let lifecycle = LifecycleController::for_cluster(&cluster);
//!
//! lifecycle.stop(&mut cluster, 0).await?;
//! lifecycle.upgrade_config(&mut cluster, 0, &bins.etcd)?;
//! lifecycle.restart(&mut cluster, 0).await?;
//! cluster.close().await?;
//! ```

#![warn(unreachable_pub)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod os;
pub mod process;

pub use cluster::{ClusterHandle, Member};
pub use config::{
    BinPaths, BinaryVersion, ClusterConfig, NodeProcessConfig, Scheme, TlsFiles, TlsMode,
};
pub use error::ClusterError;
pub use lifecycle::{LifecycleController, RestartGroup, RestartSummary};
pub use os::{OsProcessControl, READY_MARKER};
pub use process::{ProcessControl, ProcessHandle, ProcessState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a cluster
    pub use crate::{
        BinPaths, BinaryVersion, ClusterConfig, ClusterError, ClusterHandle, LifecycleController,
        OsProcessControl, ProcessControl,
    };
    pub use std::sync::Arc;
}
