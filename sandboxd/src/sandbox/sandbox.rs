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

use super::{oci::network_namespace_path, SandboxError, SandboxId};
use crate::task::{ContainerRecord, Labels};
use chrono::{DateTime, Utc};
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

const LABEL_NAME: &str = "io.aurae.sandbox.name";
const LABEL_NAMESPACE: &str = "io.aurae.sandbox.namespace";
const LABEL_ATTEMPT: &str = "io.aurae.sandbox.attempt";
const LABEL_IP: &str = "io.aurae.sandbox.ip";
const LABEL_CREATED_AT: &str = "io.aurae.sandbox.created-at";
const LABEL_NETWORK_RELEASED: &str = "io.aurae.sandbox.network-released";
const USER_LABEL_PREFIX: &str = "io.aurae.sandbox.label/";

/// Immutable creation parameters of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl SandboxConfig {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            attempt: 0,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SandboxError> {
        if self.name.trim().is_empty() {
            return Err(SandboxError::InvalidConfig {
                reason: "name must not be empty".into(),
            });
        }
        if self.namespace.trim().is_empty() {
            return Err(SandboxError::InvalidConfig {
                reason: "namespace must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    /// The placeholder task runs and the namespace is attached.
    Ready,
    /// The task or the namespace is gone, or never fully came up.
    NotReady,
}

/// The authoritative record of one sandbox.
///
/// There is no "removed" state, removal drops the record. The state only
/// ever moves from [SandboxState::Ready] to [SandboxState::NotReady].
// The fields stay private so the transitions above cannot be bypassed.
#[derive(Debug, Clone)]
pub struct Sandbox {
    id: SandboxId,
    config: SandboxConfig,
    state: SandboxState,
    netns_path: PathBuf,
    ip: Option<IpAddr>,
    pid: u32,
    runtime_spec: Spec,
    created_at: DateTime<Utc>,
    network_released: bool,
}

impl Sandbox {
    pub(crate) fn new(
        id: SandboxId,
        config: SandboxConfig,
        netns_path: PathBuf,
        runtime_spec: Spec,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            config,
            state: SandboxState::Ready,
            netns_path,
            ip: None,
            pid: 0,
            runtime_spec,
            created_at,
            network_released: false,
        }
    }

    /// Rebuilds a record from what the runtime persisted for it.
    ///
    /// The record comes back [SandboxState::Ready] unless its network was
    /// already released, and still has to go through reconciliation.
    pub(crate) fn from_container(
        container: ContainerRecord,
    ) -> Result<Self, SandboxError> {
        let ContainerRecord { id, spec, labels } = container;
        let invalid = |reason: String| SandboxError::InvalidMetadata {
            sandbox_id: id.clone(),
            reason,
        };

        let label = |key: &str| {
            labels
                .get(key)
                .cloned()
                .ok_or_else(|| invalid(format!("missing label '{key}'")))
        };

        let mut config =
            SandboxConfig::new(label(LABEL_NAME)?, label(LABEL_NAMESPACE)?);
        config.attempt = match labels.get(LABEL_ATTEMPT) {
            Some(attempt) => attempt.parse().map_err(|e| {
                invalid(format!("bad label '{LABEL_ATTEMPT}': {e}"))
            })?,
            None => 0,
        };
        config.labels = labels
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(USER_LABEL_PREFIX)
                    .map(|k| (k.to_string(), v.clone()))
            })
            .collect();

        let ip = match labels.get(LABEL_IP) {
            Some(ip) => Some(ip.parse::<IpAddr>().map_err(|e| {
                invalid(format!("bad label '{LABEL_IP}': {e}"))
            })?),
            None => None,
        };

        let created_at =
            DateTime::parse_from_rfc3339(&label(LABEL_CREATED_AT)?)
                .map_err(|e| {
                    invalid(format!("bad label '{LABEL_CREATED_AT}': {e}"))
                })?
                .with_timezone(&Utc);

        let network_released = labels
            .get(LABEL_NETWORK_RELEASED)
            .map_or(false, |v| v == "true");

        let netns_path =
            network_namespace_path(&spec).map(Path::to_path_buf).ok_or_else(
                || invalid("runtime spec has no network namespace path".into()),
            )?;

        let state = if network_released {
            SandboxState::NotReady
        } else {
            SandboxState::Ready
        };

        Ok(Self {
            id,
            config,
            state,
            netns_path,
            ip,
            pid: 0,
            runtime_spec: spec,
            created_at,
            network_released,
        })
    }

    /// Everything needed to rebuild this record after a restart, except what
    /// is already in the runtime spec.
    pub(crate) fn labels(&self) -> Labels {
        let mut labels = Labels::new();
        let _ = labels.insert(LABEL_NAME.into(), self.config.name.clone());
        let _ = labels
            .insert(LABEL_NAMESPACE.into(), self.config.namespace.clone());
        let _ = labels
            .insert(LABEL_ATTEMPT.into(), self.config.attempt.to_string());
        if let Some(ip) = self.ip {
            let _ = labels.insert(LABEL_IP.into(), ip.to_string());
        }
        let _ = labels
            .insert(LABEL_CREATED_AT.into(), self.created_at.to_rfc3339());
        if self.network_released {
            let _ = labels.insert(LABEL_NETWORK_RELEASED.into(), "true".into());
        }
        for (k, v) in &self.config.labels {
            let _ = labels.insert(format!("{USER_LABEL_PREFIX}{k}"), v.clone());
        }
        labels
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn netns_path(&self) -> &Path {
        &self.netns_path
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn runtime_spec(&self) -> &Spec {
        &self.runtime_spec
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True once the IP allocation was released and the namespace removed.
    pub fn network_released(&self) -> bool {
        self.network_released
    }

    pub(crate) fn set_ip(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    pub(crate) fn set_pid(&mut self, pid: u32) {
        self.pid = pid;
    }

    pub(crate) fn mark_not_ready(&mut self) {
        self.state = SandboxState::NotReady;
    }

    pub(crate) fn mark_network_released(&mut self) {
        self.network_released = true;
    }
}

#[cfg(test)]
impl Sandbox {
    pub(crate) fn new_for_tests() -> Self {
        Self::for_tests_with(SandboxConfig::new("web", "default"))
    }

    pub(crate) fn for_tests_with(config: SandboxConfig) -> Self {
        let id = SandboxId::new();
        let netns_path = PathBuf::from(format!("/var/run/netns/sandbox-{id}"));
        let spec = super::SandboxSpecBuilder::new("/pause-rootfs", "/pause")
            .network_namespace(&netns_path)
            .build()
            .expect("spec");
        let mut sandbox = Self::new(id, config, netns_path, spec, Utc::now());
        sandbox.set_ip("10.88.0.2".parse().expect("ip literal"));
        sandbox
    }
}
