//! `kube9-ops normalize-node-ports` (spec.md §6): re-derives each
//! node's sandbox port from `NODE_SANDBOX_BASE_PORT + node_id` and
//! writes it back if it has drifted, e.g. after the control plane
//! restarted against a stopped-and-restarted Docker daemon that
//! remapped published ports.

use anyhow::{Context, Result};
use kube9_store::Store;
use kube9_store::postgres::PostgresStore;
use kube9_types::SandboxHandle;

use crate::args::NormalizeArgs;

pub async fn run(args: NormalizeArgs) -> Result<()> {
    let pool = kube9_common::postgres::create_pool(args.postgres).await;
    let store = PostgresStore::new(pool);

    let nodes = store.list_nodes().await.context("failed to list nodes")?;

    let mut normalized = 0usize;
    for node in nodes {
        let Some(handle) = &node.sandbox else { continue };
        let expected_port = SandboxHandle::port_for(node.id);
        if handle.port == expected_port {
            continue;
        }

        tracing::info!(
            node_id = node.id,
            from = handle.port,
            to = expected_port,
            dry_run = args.dry_run,
            "node sandbox port drifted"
        );

        if !args.dry_run {
            let fixed = SandboxHandle {
                sandbox_id: handle.sandbox_id.clone(),
                host: handle.host.clone(),
                port: expected_port,
            };
            store
                .set_node_sandbox(node.id, Some(fixed))
                .await
                .with_context(|| format!("failed to normalize node {} port", node.id))?;
        }
        normalized += 1;
    }

    tracing::info!(normalized, dry_run = args.dry_run, "node port normalization complete");
    Ok(())
}
