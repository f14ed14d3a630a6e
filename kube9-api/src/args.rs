use clap::{Parser, Subcommand};
use kube9_common::args::{PostgresArgs, SandboxArgs};

#[derive(Parser, Debug)]
#[command(name = "kube9-api")]
#[command(about = "Kube-9 control plane API server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane HTTP server and background control loops
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port the control plane API listens on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Host/IP advertised to sandboxes and clients for reaching this server
    #[arg(long, env = "ADVERTISE_HOST", default_value = "localhost")]
    pub advertise_host: String,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub sandbox: SandboxArgs,
}
