//! `kube9-ops reap-pod-networks` (spec.md §6): removes sandbox networks
//! named `pod-network-*` that no pod row references any more. Talks
//! only to the store and the sandbox driver, never to Docker directly.

use std::collections::HashSet;

use anyhow::{Context, Result};
use kube9_sandbox::{BollardSandboxDriver, SandboxDriver};
use kube9_store::Store;
use kube9_store::postgres::PostgresStore;

use crate::args::ReapArgs;

const POD_NETWORK_PREFIX: &str = "pod-network-";

pub async fn run(args: ReapArgs) -> Result<()> {
    let pool = kube9_common::postgres::create_pool(args.postgres).await;
    let store = PostgresStore::new(pool);

    let sandbox = BollardSandboxDriver::connect(
        args.sandbox.docker_host.as_deref(),
        args.sandbox.node_network_name.clone(),
        args.sandbox.node_sandbox_image.clone(),
    )
    .context("failed to connect to docker engine")?;

    let pods = store.list_pods().await.context("failed to list pods")?;
    let in_use: HashSet<String> = pods.into_iter().filter_map(|p| p.network_handle).collect();

    let networks = sandbox
        .list_networks_with_prefix(POD_NETWORK_PREFIX)
        .await
        .context("failed to list pod networks")?;

    let mut reaped = 0usize;
    for network in &networks {
        if in_use.contains(network) {
            continue;
        }
        if args.dry_run {
            tracing::info!(network = %network, "would remove stale pod network (dry run)");
        } else {
            sandbox
                .remove_network(network)
                .await
                .with_context(|| format!("failed to remove network {network}"))?;
            tracing::info!(network = %network, "removed stale pod network");
        }
        reaped += 1;
    }

    tracing::info!(
        found = networks.len(),
        reaped,
        dry_run = args.dry_run,
        "pod network reap complete"
    );
    Ok(())
}
