//! The Sandbox Driver (spec.md §4.B): wraps the Docker Engine API
//! (`bollard`) behind a trait so the control loops never import bollard
//! directly. Grounded in `docker_service.py`'s `DockerService`.

pub mod bollard_driver;
pub mod driver;
pub mod error;
pub mod fake;

pub use bollard_driver::BollardSandboxDriver;
pub use driver::{ContainerInfo, ContainerSpec, NodeSandboxSpec, RuntimeStatus, SandboxDriver};
pub use error::{Result, SandboxError};
