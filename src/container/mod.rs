//! Fixture container configuration, state and lifecycle.

pub mod configuration;
mod orchestrator;
pub mod probe;
mod state;

pub use configuration::{ContainerConfiguration, ContainerConfigurationBuilder, DEFAULT_TAG};
pub use orchestrator::{Container, ContainerHandle, FIXTURE_LABEL};
pub use probe::{FnProbe, ProbeError, ReadinessProbe, TcpProbe};
pub use state::{HostBinding, Inspection, LifecycleState, PortBindings};
