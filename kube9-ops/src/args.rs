use clap::{Parser, Subcommand};
use kube9_common::args::{PostgresArgs, SandboxArgs};

#[derive(Parser, Debug)]
#[command(name = "kube9-ops")]
#[command(about = "Operational maintenance utilities for a kube9 cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove stale per-pod networks with no owning pod left in the store
    ReapPodNetworks(ReapArgs),
    /// Re-derive each node's sandbox host:port and write back any drift
    NormalizeNodePorts(NormalizeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ReapArgs {
    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub sandbox: SandboxArgs,

    /// Only print what would be removed, without removing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct NormalizeArgs {
    #[clap(flatten)]
    pub postgres: PostgresArgs,

    /// Only print what would change, without writing anything
    #[arg(long)]
    pub dry_run: bool,
}
