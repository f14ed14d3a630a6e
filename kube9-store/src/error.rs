#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {source}")]
    Postgres {
        #[from]
        source: tokio_postgres::Error,
    },

    #[error("failed to get pooled connection: {source}")]
    Pool {
        #[from]
        source: deadpool_postgres::PoolError,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("node {0} not found")]
    NodeNotFound(i64),

    #[error("pod {0} not found")]
    PodNotFound(i64),

    #[error("node {node_id} has insufficient cpu: requested {requested}, available {available}")]
    InsufficientCpu {
        node_id: i64,
        requested: i32,
        available: i32,
    },

    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
