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

use super::{Sandbox, SandboxConfig, SandboxId, SandboxState};
use chrono::{DateTime, Utc};
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::PathBuf;

/// Key under which the verbose [SandboxInfo] is published.
pub const INFO_KEY: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodSandboxNetworkStatus {
    pub ip: Option<IpAddr>,
}

/// The reconciled view of a sandbox handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSandboxStatus {
    pub id: SandboxId,
    pub config: SandboxConfig,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub network: PodSandboxNetworkStatus,
    /// Only populated for verbose requests.
    pub info: HashMap<String, String>,
}

impl PodSandboxStatus {
    pub(crate) fn new(sandbox: &Sandbox) -> Self {
        Self {
            id: sandbox.id().clone(),
            config: sandbox.config().clone(),
            state: sandbox.state(),
            created_at: sandbox.created_at(),
            network: PodSandboxNetworkStatus {
                // A released address may already belong to another sandbox.
                ip: sandbox.ip().filter(|_| !sandbox.network_released()),
            },
            info: HashMap::new(),
        }
    }

    /// Decodes the verbose info, if present.
    pub fn sandbox_info(&self) -> Option<serde_json::Result<SandboxInfo>> {
        self.info.get(INFO_KEY).map(|raw| serde_json::from_str(raw))
    }
}

/// Verbose details of a sandbox, published as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub pid: u32,
    pub runtime_spec: Spec,
    pub net_namespace_path: PathBuf,
    pub net_namespace_closed: bool,
    pub config: SandboxConfig,
}

impl SandboxInfo {
    pub(crate) fn new(sandbox: &Sandbox, netns_open: bool) -> Self {
        Self {
            pid: sandbox.pid(),
            runtime_spec: sandbox.runtime_spec().clone(),
            net_namespace_path: sandbox.netns_path().to_path_buf(),
            net_namespace_closed: !netns_open,
            config: sandbox.config().clone(),
        }
    }
}

/// Narrows a sandbox listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxFilter {
    pub id: Option<SandboxId>,
    pub state: Option<SandboxState>,
    /// Every pair must be present in the sandbox's labels.
    pub labels: BTreeMap<String, String>,
}

impl SandboxFilter {
    pub fn by_id(id: SandboxId) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    pub fn by_state(state: SandboxState) -> Self {
        Self { state: Some(state), ..Default::default() }
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    pub(crate) fn matches(&self, status: &PodSandboxStatus) -> bool {
        if self.id.as_ref().map_or(false, |id| *id != status.id) {
            return false;
        }
        if self.state.map_or(false, |state| state != status.state) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| status.config.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filter_matches_on_every_set_field() {
        let sandbox = Sandbox::for_tests_with(
            SandboxConfig::new("web", "default").with_label("app", "web"),
        );
        let status = PodSandboxStatus::new(&sandbox);

        assert!(SandboxFilter::default().matches(&status));
        assert!(SandboxFilter::by_id(status.id.clone()).matches(&status));
        assert!(!SandboxFilter::by_id(SandboxId::new()).matches(&status));
        assert!(SandboxFilter::by_state(SandboxState::Ready).matches(&status));
        assert!(!SandboxFilter::by_state(SandboxState::NotReady)
            .matches(&status));
        assert!(SandboxFilter::default()
            .with_label("app", "web")
            .matches(&status));
        assert!(!SandboxFilter::default()
            .with_label("app", "db")
            .matches(&status));
    }

    #[test]
    fn released_network_hides_the_ip() {
        let mut sandbox = Sandbox::new_for_tests();
        assert!(PodSandboxStatus::new(&sandbox).network.ip.is_some());

        sandbox.mark_network_released();
        assert_eq!(PodSandboxStatus::new(&sandbox).network.ip, None);
    }

    #[test]
    fn info_uses_camel_case_keys() {
        let sandbox = Sandbox::new_for_tests();
        let info = SandboxInfo::new(&sandbox, false);

        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["netNamespaceClosed"], serde_json::json!(true));
        assert_eq!(
            json["netNamespacePath"],
            serde_json::json!(sandbox.netns_path())
        );
        assert!(json.get("runtimeSpec").is_some());
    }
}
