pub mod docker;
pub mod provider;

pub use docker::DockerRuntime;
pub use provider::{ContainerRequest, ContainerRuntime, CreatedContainer, PortBinding};
