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
use sandboxd::sandbox::{ErrorKind, SandboxConfig, SandboxError, SandboxState};

mod common;

#[tokio::test]
async fn remove_must_fail_while_sandbox_is_ready() {
    let harness = Harness::new();
    let controller = harness.controller().await;

    let id = controller
        .create(SandboxConfig::new("web", "ns1"))
        .await
        .expect("create");

    let err = controller.remove(&id).await.expect_err("remove must fail");
    assert!(matches!(err, SandboxError::SandboxReady { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // nothing was torn down by the refused remove
    let status = controller.status(&id, false).await.expect("status");
    assert_eq!(status.state, SandboxState::Ready);
    let ip = status.network.ip.expect("ip");
    assert!(harness.plugin.has_record(ip));
    assert!(harness.runtime.has_container(&id));
}

#[tokio::test]
async fn remove_must_fail_for_unknown_sandbox() {
    let harness = Harness::new();
    let controller = harness.controller().await;

    let err = controller
        .remove(&sandboxd::sandbox::SandboxId::new())
        .await
        .expect_err("remove must fail");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
