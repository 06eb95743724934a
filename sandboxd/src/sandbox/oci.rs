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

use oci_spec::runtime::{
    LinuxBuilder, LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType,
    MountBuilder, ProcessBuilder, RootBuilder, Spec, SpecBuilder, UserBuilder,
};
use oci_spec::OciSpecError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const OCI_VERSION: &str = "1.0.2-dev";

/// Builds the runtime spec of a sandbox's placeholder task.
///
/// The pause process gets its own pid, ipc, uts and mount namespaces. The
/// network namespace is the one pinned by the namespace manager, joined by
/// path.
#[derive(Debug, Clone)]
pub struct SandboxSpecBuilder {
    rootfs: PathBuf,
    command: String,
    hostname: Option<String>,
    netns_path: Option<PathBuf>,
    annotations: HashMap<String, String>,
}

impl SandboxSpecBuilder {
    pub fn new(rootfs: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            rootfs: rootfs.into(),
            command: command.into(),
            hostname: None,
            netns_path: None,
            annotations: HashMap::new(),
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn network_namespace(mut self, path: impl Into<PathBuf>) -> Self {
        self.netns_path = Some(path.into());
        self
    }

    pub fn annotation(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Spec, OciSpecError> {
        let mut namespaces = vec![
            namespace(LinuxNamespaceType::Pid, None)?,
            namespace(LinuxNamespaceType::Ipc, None)?,
            namespace(LinuxNamespaceType::Uts, None)?,
            namespace(LinuxNamespaceType::Mount, None)?,
        ];
        namespaces.push(namespace(
            LinuxNamespaceType::Network,
            self.netns_path.clone(),
        )?);

        let process = ProcessBuilder::default()
            .terminal(false)
            .user(UserBuilder::default().uid(0u32).gid(0u32).build()?)
            .args(vec![self.command.clone()])
            .env(vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
                    .to_string(),
            ])
            .cwd("/")
            .no_new_privileges(true)
            .build()?;

        let mut builder = SpecBuilder::default()
            .version(OCI_VERSION)
            .root(
                RootBuilder::default()
                    .path(self.rootfs)
                    .readonly(true)
                    .build()?,
            )
            .process(process)
            .mounts(vec![
                MountBuilder::default()
                    .destination("/proc")
                    .typ("proc")
                    .source("proc")
                    .build()?,
                MountBuilder::default()
                    .destination("/dev")
                    .typ("tmpfs")
                    .source("tmpfs")
                    .options(vec![
                        "nosuid".to_string(),
                        "strictatime".to_string(),
                        "mode=755".to_string(),
                        "size=65536k".to_string(),
                    ])
                    .build()?,
                MountBuilder::default()
                    .destination("/dev/shm")
                    .typ("tmpfs")
                    .source("shm")
                    .options(vec![
                        "nosuid".to_string(),
                        "noexec".to_string(),
                        "nodev".to_string(),
                        "mode=1777".to_string(),
                        "size=65536k".to_string(),
                    ])
                    .build()?,
            ])
            .linux(LinuxBuilder::default().namespaces(namespaces).build()?)
            .annotations(self.annotations);

        if let Some(hostname) = self.hostname {
            builder = builder.hostname(hostname);
        }

        builder.build()
    }
}

fn namespace(
    typ: LinuxNamespaceType,
    path: Option<PathBuf>,
) -> Result<LinuxNamespace, OciSpecError> {
    let mut builder = LinuxNamespaceBuilder::default().typ(typ);
    if let Some(path) = path {
        builder = builder.path(path);
    }
    builder.build()
}

/// Locates the network namespace path in a runtime spec by namespace type.
pub fn network_namespace_path(spec: &Spec) -> Option<&Path> {
    spec.linux()
        .as_ref()?
        .namespaces()
        .as_ref()?
        .iter()
        .find(|ns| ns.typ() == LinuxNamespaceType::Network)?
        .path()
        .as_deref()
}
