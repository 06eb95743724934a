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

use common::Harness;
use pretty_assertions::assert_eq;
use sandboxd::sandbox::{
    ErrorKind, SandboxConfig, SandboxFilter, SandboxId, SandboxSpecBuilder,
    SandboxState,
};
use sandboxd::task::Labels;
use std::time::Duration;

mod common;

fn netns_entries(harness: &Harness) -> usize {
    std::fs::read_dir(&harness.config.netns_dir)
        .expect("read netns dir")
        .count()
}

#[tokio::test]
async fn recovery_must_keep_ip_record_until_stop() {
    let harness = Harness::new();
    let (id, ip) = {
        let controller = harness.controller().await;
        let id = controller
            .create(SandboxConfig::new("web", "ns1"))
            .await
            .expect("create");
        let ip = controller
            .status(&id, false)
            .await
            .expect("status")
            .network
            .ip
            .expect("ip");
        // the daemon dies after the task was killed, before any teardown
        harness.runtime.kill_task(&id);
        (id, ip)
    };

    let controller = harness.controller().await;

    let statuses = controller
        .list(&SandboxFilter::by_id(id.clone()))
        .await
        .expect("list");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, SandboxState::NotReady);
    assert!(harness.plugin.has_record(ip));
    assert_eq!(harness.plugin.releases(&id), 0);

    let err = controller.remove(&id).await.expect_err("remove must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(harness.plugin.has_record(ip));

    controller.stop(&id).await.expect("stop");
    assert!(!harness.plugin.has_record(ip));
    assert_eq!(harness.plugin.releases(&id), 1);

    controller.remove(&id).await.expect("remove");
    assert!(!harness.runtime.has_container(&id));
}

#[tokio::test]
async fn recovery_must_clean_up_detached_namespace_without_releasing_ip() {
    let harness = Harness::new();
    let (id, ip, netns_path) = {
        let controller = harness.controller().await;
        let id = controller
            .create(SandboxConfig::new("web", "ns1"))
            .await
            .expect("create");
        let status = controller.status(&id, true).await.expect("status");
        let ip = status.network.ip.expect("ip");
        let netns_path = status
            .sandbox_info()
            .expect("info")
            .expect("decode")
            .net_namespace_path;
        // the task dies and the namespace is unmounted while the daemon is
        // down, the file stays behind
        harness.runtime.kill_task(&id);
        harness.namespaces.detach(&netns_path);
        (id, ip, netns_path)
    };
    assert!(netns_path.exists());

    let controller = harness.controller().await;

    let status = controller.status(&id, false).await.expect("status");
    assert_eq!(status.state, SandboxState::NotReady);
    assert!(!netns_path.exists());
    assert!(harness.plugin.has_record(ip));
    assert_eq!(harness.plugin.releases(&id), 0);

    controller.stop(&id).await.expect("stop");
    assert!(!harness.plugin.has_record(ip));
    assert_eq!(harness.plugin.releases(&id), 1);

    controller.remove(&id).await.expect("remove");
    assert!(!harness.runtime.has_container(&id));
}

#[tokio::test]
async fn recovery_must_find_create_interrupted_before_the_task_started() {
    let harness = Harness::new();
    {
        let controller = harness.controller().await;
        harness.runtime.hang_starts(true);
        let interrupted = tokio::time::timeout(
            Duration::from_millis(200),
            controller.create(SandboxConfig::new("web", "ns1")),
        )
        .await;
        assert!(interrupted.is_err());
    }
    harness.runtime.hang_starts(false);
    assert_eq!(harness.plugin.record_count(), 1);

    let controller = harness.controller().await;

    let statuses = controller
        .list(&SandboxFilter::default())
        .await
        .expect("list");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, SandboxState::NotReady);
    assert!(statuses[0].network.ip.is_some());
    let id = statuses[0].id.clone();

    controller.stop(&id).await.expect("stop");
    assert_eq!(harness.plugin.record_count(), 0);
    assert_eq!(harness.plugin.releases(&id), 1);
    assert_eq!(netns_entries(&harness), 0);

    controller.remove(&id).await.expect("remove");
    assert!(!harness.runtime.has_container(&id));
}

#[tokio::test]
async fn recovery_must_find_create_interrupted_during_ip_allocation() {
    let harness = Harness::new();
    {
        let controller = harness.controller().await;
        harness.plugin.hang_setup(true);
        let interrupted = tokio::time::timeout(
            Duration::from_millis(200),
            controller.create(SandboxConfig::new("web", "ns1")),
        )
        .await;
        assert!(interrupted.is_err());
    }
    harness.plugin.hang_setup(false);
    // allocated, but the address never made it into the record
    assert_eq!(harness.plugin.record_count(), 1);

    let controller = harness.controller().await;

    let statuses = controller
        .list(&SandboxFilter::default())
        .await
        .expect("list");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, SandboxState::NotReady);
    assert_eq!(statuses[0].network.ip, None);
    let id = statuses[0].id.clone();

    controller.stop(&id).await.expect("stop");
    assert_eq!(harness.plugin.record_count(), 0);
    assert_eq!(harness.plugin.releases(&id), 1);
    assert_eq!(netns_entries(&harness), 0);

    controller.remove(&id).await.expect("remove");
}

#[tokio::test]
async fn recovery_must_keep_healthy_sandboxes_ready() {
    let harness = Harness::new();
    let (id, config) = {
        let controller = harness.controller().await;
        let config = SandboxConfig::new("web", "ns1")
            .with_attempt(1)
            .with_label("tier", "frontend");
        let id = controller.create(config.clone()).await.expect("create");
        (id, config)
    };

    let controller = harness.controller().await;
    let status = controller.status(&id, false).await.expect("status");
    assert_eq!(status.state, SandboxState::Ready);
    assert_eq!(status.config, config);
    assert!(status.network.ip.is_some());
}

#[tokio::test]
async fn recovery_must_remember_a_completed_stop() {
    let harness = Harness::new();
    let id = {
        let controller = harness.controller().await;
        let id = controller
            .create(SandboxConfig::new("web", "ns1"))
            .await
            .expect("create");
        controller.stop(&id).await.expect("stop");
        id
    };

    let controller = harness.controller().await;
    controller.stop(&id).await.expect("stop after restart");
    assert_eq!(harness.plugin.releases(&id), 1);

    controller.remove(&id).await.expect("remove");
}

#[tokio::test]
async fn recovery_must_skip_containers_it_cannot_understand() {
    let harness = Harness::new();
    let foreign = SandboxId::new();
    let spec = SandboxSpecBuilder::new("/rootfs", "/pause")
        .network_namespace("/var/run/netns/foreign")
        .build()
        .expect("spec");
    harness.runtime.insert_raw(foreign.clone(), spec, Labels::new());

    let controller = harness.controller().await;

    let all = controller
        .list(&SandboxFilter::default())
        .await
        .expect("list");
    assert!(all.is_empty());
    assert_eq!(
        controller.status(&foreign, false).await.expect_err("unknown").kind(),
        ErrorKind::NotFound
    );
    // left alone for whoever owns it
    assert!(harness.runtime.has_container(&foreign));
}
