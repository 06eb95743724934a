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

#![warn(clippy::unwrap_used)]

use anyhow::Context;
use clap::Parser;
use sandboxd::{
    network::{CniPlugin, LinuxNetNamespaces, NamespaceManager},
    sandbox::{SandboxController, SandboxFilter},
    task::{LibcontainerRuntime, TaskAdapter},
    SandboxdConfig,
};
use std::{path::PathBuf, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, trace};

const EXIT_OKAY: i32 = 0;
const EXIT_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct SandboxdOptions {
    #[clap(long, value_parser, default_value = "/run/sandboxd")]
    root_dir: PathBuf,

    #[clap(long, value_parser, default_value = "/var/lib/sandboxd/bundles")]
    bundle_dir: PathBuf,

    #[clap(long, value_parser, default_value = "/var/run/netns")]
    netns_dir: PathBuf,

    #[clap(long, value_parser, default_value = "/opt/cni/bin")]
    cni_bin_dir: PathBuf,

    #[clap(long, value_parser, default_value = "/etc/cni/net.d")]
    cni_conf_dir: PathBuf,

    #[clap(long, value_parser, default_value = "/var/lib/sandboxd/pause")]
    pause_rootfs: PathBuf,

    #[clap(long, value_parser, default_value = "/pause")]
    pause_command: String,

    #[clap(short, long)]
    verbose: bool,
}

impl From<SandboxdOptions> for SandboxdConfig {
    fn from(options: SandboxdOptions) -> Self {
        Self {
            root_dir: options.root_dir,
            bundle_dir: options.bundle_dir,
            netns_dir: options.netns_dir,
            cni_bin_dir: options.cni_bin_dir,
            cni_conf_dir: options.cni_conf_dir,
            pause_rootfs: options.pause_rootfs,
            pause_command: options.pause_command,
            ..Default::default()
        }
    }
}

async fn run(config: SandboxdConfig) -> anyhow::Result<()> {
    for dir in [&config.root_dir, &config.bundle_dir, &config.netns_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let namespaces = NamespaceManager::new(
        config.netns_dir.clone(),
        Arc::new(LinuxNetNamespaces),
        Arc::new(CniPlugin::new(
            config.cni_bin_dir.clone(),
            config.cni_conf_dir.clone(),
        )),
    );
    let tasks = TaskAdapter::new(Arc::new(LibcontainerRuntime::new(
        config.root_dir.clone(),
        config.bundle_dir.clone(),
    )));

    let controller = SandboxController::recover(&config, namespaces, tasks)
        .await
        .context("startup recovery failed")?;

    for status in controller.list(&SandboxFilter::default()).await? {
        info!(
            "sandbox {} ({}/{}) is {:?}",
            status.id, status.config.namespace, status.config.name, status.state
        );
    }
    info!("sandboxd ready");

    let mut sigterm = signal(SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt())
        .context("failed to register SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    // Sandboxes outlive the daemon. The next start recovers them.
    info!("sandboxd shutting down");
    Ok(())
}

async fn daemon() -> i32 {
    let options = SandboxdOptions::parse();

    if let Err(e) = sandboxd::logging::init(options.verbose) {
        eprintln!("failed to initialize logging: {e}");
        return EXIT_ERROR;
    }
    trace!("**Logging: Verbose Mode**");

    match run(options.into()).await {
        Ok(()) => EXIT_OKAY,
        Err(e) => {
            error!("{e:?}");
            EXIT_ERROR
        }
    }
}

#[tokio::main]
async fn main() {
    let exit_code = daemon().await;
    std::process::exit(exit_code);
}
