//! Testing utilities for rollcheck workspace
//!
//! [`SimCluster`] is an in-memory cluster that stands in for real server
//! processes, the command-line client and the status endpoint at once.
//! Every member keeps its own replica so a restart that drops data is
//! observable; faults are injected per member.

#![allow(missing_docs)]

use dashmap::DashMap;
use parking_lot::Mutex;
use rollcheck_cluster::{
    BinPaths, ClusterConfig, ClusterError, ClusterHandle, NodeProcessConfig, ProcessControl,
    ProcessHandle,
};
use rollcheck_core::{Backend, HarnessConfig, ScenarioError};
use rollcheck_verify::{
    ClientOptions, Consistency, KvClient, KvError, StatusError, StatusSource, VersionInfo,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const OLD_VERSION: &str = "3.5.0";
pub const NEW_VERSION: &str = "3.6.0";
pub const TARGET: &str = "3.6";

/// Binaries under a directory that does not exist; the simulation never execs them
pub fn sim_bins() -> BinPaths {
    BinPaths::from_dir("/sim/bin")
}

/// Harness configuration pointing at [`sim_bins`] with a short convergence interval
pub fn sim_config() -> HarnessConfig {
    HarnessConfig::new()
        .with_binaries(sim_bins())
        .with_target_version(TARGET)
        .with_convergence_budget(7, Duration::from_millis(10))
}

/// Something the simulation observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Started {
        node: usize,
        exec: PathBuf,
        keep_data: bool,
    },
    Stopped {
        node: usize,
    },
    Put {
        key: String,
    },
    Get {
        key: String,
        running: usize,
    },
    Polled {
        cluster: String,
    },
}

#[derive(Debug, Default)]
struct Replica {
    running: bool,
    exec: PathBuf,
    launches: u32,
    started_seq: u64,
    data: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_restart: HashSet<usize>,
    unkillable: HashSet<usize>,
    restart_delay: HashMap<usize, Duration>,
    drop_on_restart: HashMap<usize, String>,
    corrupt_on_restart: HashMap<usize, (String, String)>,
    reject_writes: bool,
    convergence_polls: u32,
    status_down: bool,
}

#[derive(Debug)]
struct SimState {
    new_binary: PathBuf,
    replicas: DashMap<usize, Replica>,
    faults: Mutex<Faults>,
    events: Mutex<Vec<SimEvent>>,
    seq: AtomicU64,
    polls_after_upgrade: AtomicU64,
}

/// In-memory cluster implementing process control, the client and the status surface
#[derive(Debug, Clone)]
pub struct SimCluster {
    state: Arc<SimState>,
}

impl SimCluster {
    /// Members running the binary at `new_binary` report [`NEW_VERSION`]
    pub fn new(new_binary: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(SimState {
                new_binary: new_binary.into(),
                replicas: DashMap::new(),
                faults: Mutex::new(Faults::default()),
                events: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
                polls_after_upgrade: AtomicU64::new(0),
            }),
        }
    }

    /// Simulation for [`sim_bins`]
    pub fn for_sim_bins() -> Self {
        Self::new(sim_bins().etcd)
    }

    pub fn fail_restart(&self, node: usize) -> &Self {
        self.state.faults.lock().fail_restart.insert(node);
        self
    }

    pub fn unkillable(&self, node: usize) -> &Self {
        self.state.faults.lock().unkillable.insert(node);
        self
    }

    pub fn restart_delay(&self, node: usize, delay: Duration) -> &Self {
        self.state.faults.lock().restart_delay.insert(node, delay);
        self
    }

    /// `node` comes back from its next restart without `key`
    pub fn drop_key_on_restart(&self, node: usize, key: &str) -> &Self {
        self.state
            .faults
            .lock()
            .drop_on_restart
            .insert(node, key.to_string());
        self
    }

    /// `node` comes back from its next restart with `key` holding `value`
    pub fn corrupt_key_on_restart(&self, node: usize, key: &str, value: &str) -> &Self {
        self.state
            .faults
            .lock()
            .corrupt_on_restart
            .insert(node, (key.to_string(), value.to_string()));
        self
    }

    pub fn reject_writes(&self) -> &Self {
        self.state.faults.lock().reject_writes = true;
        self
    }

    /// Cluster version moves only after `polls` queries once every member is upgraded
    pub fn converge_after(&self, polls: u32) -> &Self {
        self.state.faults.lock().convergence_polls = polls;
        self
    }

    pub fn never_converge(&self) -> &Self {
        self.converge_after(u32::MAX)
    }

    pub fn status_down(&self) -> &Self {
        self.state.faults.lock().status_down = true;
        self
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.events.lock().clone()
    }

    /// Running-member counts observed by every read, in order
    pub fn running_at_reads(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Get { running, .. } => Some(running),
                _ => None,
            })
            .collect()
    }

    pub fn running(&self) -> usize {
        self.state.replicas.iter().filter(|r| r.running).count()
    }

    pub fn is_running(&self, node: usize) -> bool {
        self.state.replicas.get(&node).is_some_and(|r| r.running)
    }

    pub fn exec_of(&self, node: usize) -> Option<PathBuf> {
        self.state.replicas.get(&node).map(|r| r.exec.clone())
    }

    pub fn replica_value(&self, node: usize, key: &str) -> Option<String> {
        self.state
            .replicas
            .get(&node)
            .and_then(|r| r.data.get(key).cloned())
    }

    fn record(&self, event: SimEvent) {
        self.state.events.lock().push(event);
    }

    fn quorum(&self) -> usize {
        self.state.replicas.len() / 2 + 1
    }

    fn all_upgraded(&self) -> bool {
        !self.state.replicas.is_empty()
            && self
                .state
                .replicas
                .iter()
                .all(|r| r.running && r.exec == self.state.new_binary)
    }
}

#[async_trait::async_trait]
impl ProcessControl for SimCluster {
    async fn start(&self, config: &NodeProcessConfig) -> Result<ProcessHandle, ClusterError> {
        let node = config.index();
        let relaunch = self
            .state
            .replicas
            .get(&node)
            .is_some_and(|r| r.launches > 0);

        if relaunch {
            let delay = self.state.faults.lock().restart_delay.get(&node).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.faults.lock().fail_restart.contains(&node) {
                return Err(ClusterError::restart(node, "simulated launch failure"));
            }
        }

        let (dropped, corrupted) = if relaunch {
            let mut faults = self.state.faults.lock();
            (
                faults.drop_on_restart.remove(&node),
                faults.corrupt_on_restart.remove(&node),
            )
        } else {
            (None, None)
        };

        {
            let mut replica = self.state.replicas.entry(node).or_default();
            if !config.keep_data_dir() {
                replica.data.clear();
            }
            if let Some(key) = dropped {
                replica.data.remove(&key);
            }
            if let Some((key, value)) = corrupted {
                replica.data.insert(key, value);
            }
            replica.running = true;
            replica.exec = config.exec_path().to_path_buf();
            replica.launches += 1;
            replica.started_seq = self.state.seq.fetch_add(1, Ordering::SeqCst);
        }

        self.record(SimEvent::Started {
            node,
            exec: config.exec_path().to_path_buf(),
            keep_data: config.keep_data_dir(),
        });

        let mut handle = ProcessHandle::starting(node, config.name());
        handle.mark_running()?;
        Ok(handle)
    }

    async fn stop(&self, handle: &mut ProcessHandle) -> Result<(), ClusterError> {
        let node = handle.node();
        if !handle.is_running() {
            return Ok(());
        }
        if self.state.faults.lock().unkillable.contains(&node) {
            return Err(ClusterError::stop(node, "simulated process ignored SIGTERM"));
        }
        handle.mark_stopped()?;
        if let Some(mut replica) = self.state.replicas.get_mut(&node) {
            replica.running = false;
        }
        self.record(SimEvent::Stopped { node });
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvClient for SimCluster {
    async fn put(&self, key: &str, value: &str, _: Consistency) -> Result<(), KvError> {
        if self.state.faults.lock().reject_writes {
            return Err(KvError::Rejected("simulated write rejection".into()));
        }
        if self.running() < self.quorum() {
            return Err(KvError::Unavailable("no quorum".into()));
        }
        for mut replica in self.state.replicas.iter_mut() {
            if replica.running {
                replica.data.insert(key.to_string(), value.to_string());
            }
        }
        self.record(SimEvent::Put {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<String>, KvError> {
        let running = self.running();
        self.record(SimEvent::Get {
            key: key.to_string(),
            running,
        });
        if consistency == Consistency::Quorum && running < self.quorum() {
            return Err(KvError::Unavailable("no quorum".into()));
        }
        // served by the most recently started member
        let value = self
            .state
            .replicas
            .iter()
            .filter(|r| r.running)
            .max_by_key(|r| r.started_seq)
            .map(|r| r.data.get(key).cloned());
        value.ok_or_else(|| KvError::Unavailable("no member running".into()))
    }
}

#[async_trait::async_trait]
impl StatusSource for SimCluster {
    async fn version(&self) -> Result<VersionInfo, StatusError> {
        if self.state.faults.lock().status_down || self.running() == 0 {
            return Err(StatusError::Request("connection refused".into()));
        }
        let server = if self.exec_of(0).as_deref() == Some(self.state.new_binary.as_path()) {
            NEW_VERSION
        } else {
            OLD_VERSION
        };
        let cluster = if self.all_upgraded() {
            let polls = self.state.polls_after_upgrade.fetch_add(1, Ordering::SeqCst);
            let needed = u64::from(self.state.faults.lock().convergence_polls);
            if polls >= needed {
                NEW_VERSION
            } else {
                OLD_VERSION
            }
        } else {
            OLD_VERSION
        };
        self.record(SimEvent::Polled {
            cluster: cluster.to_string(),
        });
        Ok(VersionInfo {
            server: server.to_string(),
            cluster: cluster.to_string(),
        })
    }
}

/// [`Backend`] serving every surface from one [`SimCluster`]
#[derive(Debug, Clone)]
pub struct SimBackend {
    sim: SimCluster,
    missing: HashSet<PathBuf>,
}

impl SimBackend {
    /// Every binary considered installed
    pub fn new(sim: SimCluster) -> Self {
        Self {
            sim,
            missing: HashSet::new(),
        }
    }

    /// Treat `path` as absent from the host
    #[must_use]
    pub fn without_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing.insert(path.into());
        self
    }

    pub fn sim(&self) -> &SimCluster {
        &self.sim
    }
}

impl Backend for SimBackend {
    fn process_control(&self) -> Arc<dyn ProcessControl> {
        Arc::new(self.sim.clone())
    }

    fn kv_client(
        &self,
        _: &ClusterHandle,
        _: &ClientOptions,
    ) -> Result<Arc<dyn KvClient>, ScenarioError> {
        Ok(Arc::new(self.sim.clone()))
    }

    fn status_source(
        &self,
        _: &ClusterHandle,
        _: &ClientOptions,
    ) -> Result<Arc<dyn StatusSource>, ScenarioError> {
        Ok(Arc::new(self.sim.clone()))
    }

    fn binary_exists(&self, path: &Path) -> bool {
        !self.missing.contains(path)
    }
}

/// Cluster descriptor for simulation tests, rooted in the system temp dir
pub fn sim_cluster_config(size: usize) -> ClusterConfig {
    ClusterConfig::no_tls().with_size(size)
}
