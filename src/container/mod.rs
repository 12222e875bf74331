//! Container runtime abstraction and lifecycle management.

mod docker;
mod lifecycle;
mod runtime;

pub use docker::DockerRuntime;
pub use lifecycle::{tail_lines, ContainerLifecycleManager, PollPolicy};
pub use runtime::{BindMount, ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};
