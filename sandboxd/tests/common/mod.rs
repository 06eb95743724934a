/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

#![allow(dead_code)]

//! In-process stand-ins for the kernel, the CNI plugin and the low-level
//! runtime. They keep their state outside the controller so a test can
//! drop a controller and recover a new one, the way a restarted daemon
//! would.

use async_trait::async_trait;
use sandboxd::{
    network::{NamespaceManager, NetNamespaces, NetworkPlugin, PluginError},
    sandbox::{SandboxController, SandboxId},
    task::{
        ContainerRecord, Labels, RuntimeError, TaskAdapter, TaskInfo,
        TaskRuntime, TaskStatus,
    },
    SandboxdConfig, TeardownRetry,
};
use oci_spec::runtime::Spec;
use std::{
    collections::{HashMap, HashSet},
    io::{self, ErrorKind},
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use test_helpers::TempDir;

/// Namespaces are plain files. "Open" is tracked separately so a test can
/// detach a namespace out-of-band and leave the file behind, like
/// `umount` without `rm`.
#[derive(Debug, Default)]
pub struct FakeNetNamespaces {
    open: Mutex<HashSet<PathBuf>>,
}

impl FakeNetNamespaces {
    pub fn detach(&self, path: &Path) {
        let _ = self.open.lock().expect("lock").remove(path);
    }

    /// Pins an open namespace at `path` without going through the engine.
    pub fn pin(&self, path: &Path) {
        std::fs::write(path, b"").expect("write netns file");
        let _ = self.open.lock().expect("lock").insert(path.to_path_buf());
    }

    pub fn is_attached(&self, path: &Path) -> bool {
        self.open.lock().expect("lock").contains(path)
    }
}

impl NetNamespaces for FakeNetNamespaces {
    fn create(&self, path: &Path) -> io::Result<()> {
        if path.exists() {
            return Err(io::Error::from(ErrorKind::AlreadyExists));
        }
        std::fs::write(path, b"")?;
        let _ = self.open.lock().expect("lock").insert(path.to_path_buf());
        Ok(())
    }

    fn is_open(&self, path: &Path) -> io::Result<bool> {
        Ok(path.exists() && self.is_attached(path))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.detach(path);
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Host-local style IPAM: one file per allocated address, named by the
/// address and holding the owning sandbox id.
#[derive(Debug)]
pub struct FakePlugin {
    ipam_dir: PathBuf,
    next_host: AtomicU32,
    releases: Mutex<HashMap<SandboxId, usize>>,
    fail_teardowns: AtomicUsize,
    fail_setup: Mutex<bool>,
    hang_setup: Mutex<bool>,
}

impl FakePlugin {
    pub fn new(ipam_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&ipam_dir).expect("create ipam dir");
        Self {
            ipam_dir,
            next_host: AtomicU32::new(2),
            releases: Mutex::new(HashMap::new()),
            fail_teardowns: AtomicUsize::new(0),
            fail_setup: Mutex::new(false),
            hang_setup: Mutex::new(false),
        }
    }

    pub fn record_path(&self, ip: IpAddr) -> PathBuf {
        self.ipam_dir.join(ip.to_string())
    }

    pub fn has_record(&self, ip: IpAddr) -> bool {
        self.record_path(ip).exists()
    }

    pub fn record_count(&self) -> usize {
        std::fs::read_dir(&self.ipam_dir).expect("read ipam dir").count()
    }

    /// How many times an allocation of `sandbox_id` was actually released.
    pub fn releases(&self, sandbox_id: &SandboxId) -> usize {
        self.releases
            .lock()
            .expect("lock")
            .get(sandbox_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn fail_next_teardowns(&self, count: usize) {
        self.fail_teardowns.store(count, Ordering::SeqCst);
    }

    pub fn fail_setup(&self, fail: bool) {
        *self.fail_setup.lock().expect("lock") = fail;
    }

    /// Setup writes the allocation record and then never returns, like a
    /// plugin that hangs after the IPAM step.
    pub fn hang_setup(&self, hang: bool) {
        *self.hang_setup.lock().expect("lock") = hang;
    }

    fn records_of(&self, sandbox_id: &SandboxId) -> Vec<PathBuf> {
        std::fs::read_dir(&self.ipam_dir)
            .expect("read ipam dir")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                std::fs::read_to_string(path)
                    .map(|owner| owner == sandbox_id.as_str())
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl NetworkPlugin for FakePlugin {
    async fn setup(
        &self,
        sandbox_id: &SandboxId,
        netns: &Path,
    ) -> Result<IpAddr, PluginError> {
        if *self.fail_setup.lock().expect("lock") || !netns.exists() {
            return Err(PluginError::PluginFailed {
                plugin: "fake".into(),
                code: 11,
                msg: "setup refused".into(),
            });
        }
        let host = self.next_host.fetch_add(1, Ordering::SeqCst);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 88, 0, host as u8));
        std::fs::write(self.record_path(ip), sandbox_id.as_str())
            .expect("write ipam record");
        let hang = *self.hang_setup.lock().expect("lock");
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(ip)
    }

    async fn teardown(
        &self,
        sandbox_id: &SandboxId,
        _netns: Option<&Path>,
    ) -> Result<(), PluginError> {
        if self
            .fail_teardowns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
        {
            return Err(PluginError::PluginFailed {
                plugin: "fake".into(),
                code: 11,
                msg: "teardown refused".into(),
            });
        }
        for record in self.records_of(sandbox_id) {
            std::fs::remove_file(record).expect("remove ipam record");
            *self
                .releases
                .lock()
                .expect("lock")
                .entry(sandbox_id.clone())
                .or_default() += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: Spec,
    labels: Labels,
    task: Option<TaskInfo>,
}

/// A runtime whose containers live as long as the [FakeRuntime] does,
/// independent of any controller.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<SandboxId, FakeContainer>>,
    next_pid: AtomicU32,
    task_deletes: AtomicUsize,
    fail_starts: Mutex<bool>,
    hang_starts: Mutex<bool>,
}

impl FakeRuntime {
    /// Kills the task the way an external actor would. The runtime still
    /// knows about it, as stopped.
    pub fn kill_task(&self, id: &SandboxId) {
        let mut containers = self.containers.lock().expect("lock");
        let task = containers
            .get_mut(id)
            .and_then(|c| c.task.as_mut())
            .expect("task to kill");
        task.status = TaskStatus::Stopped;
    }

    /// Drops the task entirely, as if it was killed and reaped.
    pub fn reap_task(&self, id: &SandboxId) {
        let mut containers = self.containers.lock().expect("lock");
        if let Some(container) = containers.get_mut(id) {
            container.task = None;
        }
    }

    pub fn has_container(&self, id: &SandboxId) -> bool {
        self.containers.lock().expect("lock").contains_key(id)
    }

    pub fn task_deletes(&self) -> usize {
        self.task_deletes.load(Ordering::SeqCst)
    }

    pub fn fail_starts(&self, fail: bool) {
        *self.fail_starts.lock().expect("lock") = fail;
    }

    /// Task starts never return.
    pub fn hang_starts(&self, hang: bool) {
        *self.hang_starts.lock().expect("lock") = hang;
    }

    /// Inserts a container without going through a controller.
    pub fn insert_raw(&self, id: SandboxId, spec: Spec, labels: Labels) {
        let _ = self
            .containers
            .lock()
            .expect("lock")
            .insert(id, FakeContainer { spec, labels, task: None });
    }
}

#[async_trait]
impl TaskRuntime for FakeRuntime {
    async fn create_container(
        &self,
        id: &SandboxId,
        spec: &Spec,
        labels: &Labels,
    ) -> sandboxd::task::Result<()> {
        let mut containers = self.containers.lock().expect("lock");
        if containers.contains_key(id) {
            return Err(RuntimeError::ContainerExists { id: id.clone() });
        }
        let _ = containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                labels: labels.clone(),
                task: None,
            },
        );
        Ok(())
    }

    async fn start_task(&self, id: &SandboxId) -> sandboxd::task::Result<u32> {
        let hang = *self.hang_starts.lock().expect("lock");
        if hang {
            std::future::pending::<()>().await;
        }
        if *self.fail_starts.lock().expect("lock") {
            return Err(RuntimeError::Runtime {
                id: id.clone(),
                source: anyhow::anyhow!("pause binary missing"),
            });
        }
        let mut containers = self.containers.lock().expect("lock");
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.clone() })?;
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        container.task = Some(TaskInfo { pid, status: TaskStatus::Running });
        Ok(pid)
    }

    async fn load_task(
        &self,
        id: &SandboxId,
    ) -> sandboxd::task::Result<TaskInfo> {
        self.containers
            .lock()
            .expect("lock")
            .get(id)
            .and_then(|c| c.task)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.clone() })
    }

    async fn delete_task(
        &self,
        id: &SandboxId,
        _force_kill: bool,
    ) -> sandboxd::task::Result<()> {
        let mut containers = self.containers.lock().expect("lock");
        match containers.get_mut(id).and_then(|c| c.task.take()) {
            Some(_) => {
                let _ = self.task_deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RuntimeError::TaskNotFound { id: id.clone() }),
        }
    }

    async fn update_labels(
        &self,
        id: &SandboxId,
        labels: &Labels,
    ) -> sandboxd::task::Result<()> {
        let mut containers = self.containers.lock().expect("lock");
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.clone() })?;
        container.labels = labels.clone();
        Ok(())
    }

    async fn list_containers(
        &self,
    ) -> sandboxd::task::Result<Vec<ContainerRecord>> {
        Ok(self
            .containers
            .lock()
            .expect("lock")
            .iter()
            .map(|(id, c)| ContainerRecord {
                id: id.clone(),
                spec: c.spec.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn delete_container(
        &self,
        id: &SandboxId,
    ) -> sandboxd::task::Result<()> {
        match self.containers.lock().expect("lock").remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::ContainerNotFound { id: id.clone() }),
        }
    }
}

/// Everything outside the controller. Dropping a controller and calling
/// [Harness::controller] again simulates a daemon restart.
#[derive(Debug)]
pub struct Harness {
    pub dir: TempDir,
    pub namespaces: Arc<FakeNetNamespaces>,
    pub plugin: Arc<FakePlugin>,
    pub runtime: Arc<FakeRuntime>,
    pub config: SandboxdConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new("sandboxd-it");
        let netns_dir = dir.join("netns");
        std::fs::create_dir_all(&netns_dir).expect("create netns dir");

        let config = SandboxdConfig {
            root_dir: dir.join("state"),
            bundle_dir: dir.join("bundles"),
            netns_dir,
            cni_bin_dir: dir.join("cni/bin"),
            cni_conf_dir: dir.join("cni/net.d"),
            pause_rootfs: dir.join("pause"),
            pause_command: "/pause".into(),
            teardown_retry: TeardownRetry::none(),
        };

        Self {
            namespaces: Arc::new(FakeNetNamespaces::default()),
            plugin: Arc::new(FakePlugin::new(dir.join("ipam"))),
            runtime: Arc::new(FakeRuntime::default()),
            config,
            dir,
        }
    }

    pub fn with_teardown_retry(mut self, retry: TeardownRetry) -> Self {
        self.config.teardown_retry = retry;
        self
    }

    pub fn namespace_manager(&self) -> NamespaceManager {
        NamespaceManager::new(
            self.config.netns_dir.clone(),
            self.namespaces.clone(),
            self.plugin.clone(),
        )
    }

    /// Starts a controller the way the daemon does, recovering whatever the
    /// runtime still knows about.
    pub async fn controller(&self) -> SandboxController {
        SandboxController::recover(
            &self.config,
            self.namespace_manager(),
            TaskAdapter::new(self.runtime.clone()),
        )
        .await
        .expect("recover controller")
    }
}
