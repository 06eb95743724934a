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

use super::error::PluginError;
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    fmt::Debug,
    io::ErrorKind,
    net::IpAddr,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, trace};

type Result<T> = std::result::Result<T, PluginError>;

const DEFAULT_IFNAME: &str = "eth0";

/// The network plugin attaches an interface to a namespace and owns the IP
/// allocation for it.
///
/// The allocation is recorded durably by the plugin itself (host-local IPAM
/// writes one file per IP) and only goes away on [NetworkPlugin::teardown].
#[async_trait]
pub trait NetworkPlugin: Send + Sync + Debug {
    async fn setup(&self, sandbox_id: &SandboxId, netns: &Path)
        -> Result<IpAddr>;

    /// Releases the allocation for `sandbox_id`. `netns` is [None] when the
    /// namespace is already closed; the plugin must still release its IPAM
    /// state in that case.
    async fn teardown(
        &self,
        sandbox_id: &SandboxId,
        netns: Option<&Path>,
    ) -> Result<()>;
}

/// Executes CNI plugin binaries, following the CNI calling convention.
#[derive(Debug, Clone)]
pub struct CniPlugin {
    bin_dir: PathBuf,
    conf_dir: PathBuf,
    ifname: String,
}

#[derive(Debug, Clone, PartialEq)]
struct NetworkConfigList {
    name: String,
    cni_version: String,
    plugins: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CniResult {
    #[serde(default)]
    ips: Vec<CniIp>,
}

#[derive(Debug, Deserialize)]
struct CniIp {
    address: String,
}

#[derive(Debug, Default, Deserialize)]
struct CniErrorResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

impl CniPlugin {
    pub fn new(bin_dir: PathBuf, conf_dir: PathBuf) -> Self {
        Self { bin_dir, conf_dir, ifname: DEFAULT_IFNAME.to_string() }
    }

    /// Loads the lexically first `.conf`, `.conflist` or `.json` file.
    async fn load_config(&self) -> Result<NetworkConfigList> {
        let read_err = |source| PluginError::FailedToReadConfig {
            path: self.conf_dir.clone(),
            source,
        };

        let mut entries =
            tokio::fs::read_dir(&self.conf_dir).await.map_err(read_err)?;

        let mut candidates = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            let is_config = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("conf" | "conflist" | "json")
            );
            if is_config {
                candidates.push(path);
            }
        }
        candidates.sort();

        let Some(path) = candidates.into_iter().next() else {
            return Err(PluginError::NoNetworkConfig {
                dir: self.conf_dir.clone(),
            });
        };

        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            PluginError::FailedToReadConfig { path: path.clone(), source }
        })?;

        parse_config(&path, &bytes)
    }

    async fn exec(
        &self,
        command: &str,
        sandbox_id: &SandboxId,
        netns: Option<&Path>,
        config: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let plugin = config
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let stdin = serde_json::to_vec(config).map_err(|source| {
            PluginError::InvalidResult { plugin: plugin.clone(), source }
        })?;

        trace!("cni {command} {plugin} for sandbox {sandbox_id}");

        let mut child = Command::new(self.bin_dir.join(&plugin))
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", sandbox_id.as_str())
            .env("CNI_NETNS", netns.map(Path::as_os_str).unwrap_or_default())
            .env("CNI_IFNAME", &self.ifname)
            .env("CNI_PATH", &self.bin_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PluginError::FailedToExecute {
                plugin: plugin.clone(),
                source,
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            match pipe.write_all(&stdin).await {
                // the plugin does not have to read its config
                Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                    return Err(PluginError::FailedToExecute {
                        plugin,
                        source: e,
                    })
                }
                _ => {}
            }
        }

        let output = child.wait_with_output().await.map_err(|source| {
            PluginError::FailedToExecute { plugin: plugin.clone(), source }
        })?;

        if !output.status.success() {
            let err: CniErrorResult =
                serde_json::from_slice(&output.stdout).unwrap_or_default();
            let msg = match (err.msg.is_empty(), err.details.is_empty()) {
                (true, _) => String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
                (false, true) => err.msg,
                (false, false) => format!("{}: {}", err.msg, err.details),
            };
            return Err(PluginError::PluginFailed {
                plugin,
                code: err.code,
                msg,
            });
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&output.stdout)
            .map(Some)
            .map_err(|source| PluginError::InvalidResult { plugin, source })
    }
}

#[async_trait]
impl NetworkPlugin for CniPlugin {
    #[tracing::instrument(skip(self))]
    async fn setup(
        &self,
        sandbox_id: &SandboxId,
        netns: &Path,
    ) -> Result<IpAddr> {
        let list = self.load_config().await?;

        let mut prev_result: Option<Value> = None;
        let mut last_plugin = String::new();
        for plugin in &list.plugins {
            let config = list.plugin_config(plugin, prev_result.as_ref());
            last_plugin = plugin_type(plugin);
            if let Some(result) =
                self.exec("ADD", sandbox_id, Some(netns), &config).await?
            {
                prev_result = Some(result);
            }
        }

        let ip = prev_result
            .ok_or_else(|| PluginError::NoAddress {
                plugin: last_plugin.clone(),
            })
            .and_then(|result| first_ip(&last_plugin, result))?;

        info!("network '{}' assigned {ip} to sandbox {sandbox_id}", list.name);
        Ok(ip)
    }

    #[tracing::instrument(skip(self))]
    async fn teardown(
        &self,
        sandbox_id: &SandboxId,
        netns: Option<&Path>,
    ) -> Result<()> {
        let list = self.load_config().await?;

        for plugin in list.plugins.iter().rev() {
            let config = list.plugin_config(plugin, None);
            let _ = self.exec("DEL", sandbox_id, netns, &config).await?;
        }

        info!("network '{}' released sandbox {sandbox_id}", list.name);
        Ok(())
    }
}

impl NetworkConfigList {
    /// Builds the stdin payload for a single plugin invocation.
    fn plugin_config(
        &self,
        plugin: &Map<String, Value>,
        prev_result: Option<&Value>,
    ) -> Map<String, Value> {
        let mut config = plugin.clone();
        let _ = config.insert("name".into(), Value::from(self.name.clone()));
        let _ = config
            .insert("cniVersion".into(), Value::from(self.cni_version.clone()));
        if let Some(prev) = prev_result {
            let _ = config.insert("prevResult".into(), prev.clone());
        }
        config
    }
}

fn plugin_type(plugin: &Map<String, Value>) -> String {
    plugin.get("type").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parse_config(path: &Path, bytes: &[u8]) -> Result<NetworkConfigList> {
    let root: Map<String, Value> =
        serde_json::from_slice(bytes).map_err(|source| {
            PluginError::InvalidConfig { path: path.to_path_buf(), source }
        })?;

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let cni_version = root
        .get("cniVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // A .conflist carries a "plugins" array, a plain .conf is a single plugin.
    let plugins = match root.get("plugins") {
        Some(Value::Array(plugins)) => plugins
            .iter()
            .filter_map(|p| p.as_object().cloned())
            .collect::<Vec<_>>(),
        _ => vec![root.clone()],
    };

    if plugins.is_empty() {
        return Err(PluginError::EmptyPluginList { path: path.to_path_buf() });
    }

    Ok(NetworkConfigList { name, cni_version, plugins })
}

fn first_ip(plugin: &str, result: Value) -> Result<IpAddr> {
    let result: CniResult =
        serde_json::from_value(result).map_err(|source| {
            PluginError::InvalidResult { plugin: plugin.to_string(), source }
        })?;

    result
        .ips
        .iter()
        .find_map(|ip| {
            let addr = ip.address.split('/').next().unwrap_or_default();
            addr.parse::<IpAddr>().ok()
        })
        .ok_or_else(|| PluginError::NoAddress { plugin: plugin.to_string() })
}
