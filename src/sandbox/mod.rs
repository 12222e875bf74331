//! Per-layer container sandboxes.
//!
//! Each [`Sandbox`] binds a [`ContainerLifecycleManager`](crate::container::ContainerLifecycleManager)
//! to a fixed workspace and container identity, and rebuilds from scratch
//! on every `execute`.

mod layers;
mod provider;

pub use layers::{ContentSandbox, DatabaseCredentials, DatabaseSandbox, ServiceSandbox};
pub use provider::{Sandbox, SandboxState};
