use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "kube9")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,

    #[arg(long, env = "POSTGRES_SSL_MODE", default_value = "prefer")]
    pub postgres_ssl_mode: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SandboxArgs {
    /// Docker Engine API endpoint the sandbox driver connects to.
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Bridge network created for node sandboxes (spec.md §4.B).
    #[arg(long, env = "NODE_NETWORK_NAME", default_value = "kube9-node-network")]
    pub node_network_name: String,

    /// Image used to build node sandbox containers when absent.
    #[arg(long, env = "NODE_SANDBOX_IMAGE", default_value = "kube9-node-simulator")]
    pub node_sandbox_image: String,
}
