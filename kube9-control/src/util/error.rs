#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {source}")]
    Store {
        #[from]
        source: kube9_store::StoreError,
    },

    #[error("sandbox error: {source}")]
    Sandbox {
        #[from]
        source: kube9_sandbox::SandboxError,
    },

    #[error("node {0} not found")]
    NodeNotFound(kube9_types::NodeId),

    #[error("pod {0} not found")]
    PodNotFound(kube9_types::PodId),
}

pub type Result<T> = std::result::Result<T, Error>;
