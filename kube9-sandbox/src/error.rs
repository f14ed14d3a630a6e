#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("docker engine error: {source}")]
    Docker {
        #[from]
        source: bollard::errors::Error,
    },

    #[error("sandbox {0} not found")]
    NotFound(String),

    #[error("sandbox image build failed: {0}")]
    ImageBuild(String),

    #[error("http probe failed: {source}")]
    Probe {
        #[from]
        source: reqwest::Error,
    },
}

impl SandboxError {
    /// Mirrors the distinction the heartbeat/recovery loops need
    /// (spec.md §4.E): a transient failure is worth retrying, a fatal
    /// one means the sandbox is gone and recovery should escalate
    /// straight to `permanently_failed`.
    pub fn is_transient(&self) -> bool {
        match self {
            SandboxError::Docker { source } => !matches!(
                source,
                bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == 404
            ),
            SandboxError::NotFound(_) => false,
            SandboxError::ImageBuild(_) => false,
            SandboxError::Probe { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
