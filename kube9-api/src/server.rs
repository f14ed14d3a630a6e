use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use kube9_common::shutdown::shutdown_signal;
use kube9_control::rescheduler::RescheduleSignal;
use kube9_control::supervisor::{self, ControlIntervals};
use kube9_sandbox::{BollardSandboxDriver, SandboxDriver};
use kube9_scheduler::{PodIpAllocator, RandomPodIpAllocator};
use kube9_store::Store;
use kube9_store::postgres::PostgresStore;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::args::ServerArgs;
use crate::handlers;

/// Shared application state handed to every handler (spec.md §6).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sandbox: Arc<dyn SandboxDriver>,
    pub http: reqwest::Client,
    pub api_server: String,
    pub reschedule_signal: Arc<RescheduleSignal>,
    pub pod_ip_allocator: Arc<dyn PodIpAllocator>,
}

/// Runs the control plane: HTTP ingress plus the four background
/// control loops (spec.md §4.D/E/F, §5), sharing one cancellation token
/// so a single SIGINT/SIGTERM brings everything down together.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    let pool = kube9_common::postgres::create_pool(args.postgres).await;
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool));
    store
        .init_schema()
        .await
        .context("failed to initialize cluster store schema")?;

    let sandbox: Arc<dyn SandboxDriver> = Arc::new(
        BollardSandboxDriver::connect(
            args.sandbox.docker_host.as_deref(),
            args.sandbox.node_network_name.clone(),
            args.sandbox.node_sandbox_image.clone(),
        )
        .context("failed to connect to docker engine")?,
    );
    sandbox
        .ensure_node_network()
        .await
        .context("failed to ensure node bridge network")?;

    let signal = Arc::new(RescheduleSignal::new());
    let http = reqwest::Client::new();
    let pod_ip_allocator: Arc<dyn PodIpAllocator> = Arc::new(RandomPodIpAllocator);
    let cancel = CancellationToken::new();
    let _control_loops = supervisor::spawn(
        store.clone(),
        sandbox.clone(),
        http.clone(),
        pod_ip_allocator.clone(),
        signal.clone(),
        ControlIntervals::default(),
        cancel.clone(),
    );

    let state = AppState {
        store,
        sandbox,
        http,
        api_server: format!("http://{}:{}", args.advertise_host, args.port),
        reschedule_signal: signal,
        pod_ip_allocator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::health))
        .route("/nodes", post(handlers::create_node).get(handlers::list_nodes))
        .route(
            "/nodes/{id}",
            get(handlers::get_node).delete(handlers::delete_node),
        )
        .route("/nodes/{id}/heartbeat", post(handlers::node_heartbeat))
        .route(
            "/nodes/{id}/simulate/failure",
            post(handlers::simulate_node_failure),
        )
        .route("/nodes/{id}/deregister", post(handlers::deregister_node))
        .route(
            "/nodes/{id}/force_cleanup",
            post(handlers::force_cleanup_node),
        )
        .route("/pods", post(handlers::create_pod).get(handlers::list_pods))
        .route("/pods/{id}", get(handlers::get_pod).delete(handlers::delete_pod))
        .route("/pods/{id}/health", get(handlers::pod_health))
        .layer(axum::middleware::from_fn(kube9_common::access_log::public))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    tracing::info!(%addr, "starting kube9 control plane HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    kube9_common::signal_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
        .await?;

    tracing::info!("server stopped gracefully");
    Ok(())
}
