//! Container engine client.
//!
//! [`EngineClient`] is the narrow surface the orchestrator needs from a
//! container engine. [`DockerEngine`] implements it over bollard; tests use
//! [`StubEngine`](crate::testing::StubEngine).
//!
//! The client is constructed once and shared by reference (`Arc`) with every
//! [`Container`](crate::container::Container), so implementations must be
//! safe for concurrent use.

mod docker;
pub mod endpoint;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use docker::DockerEngine;
pub use endpoint::{EndpointScheme, EngineEndpoint};

use crate::container::Inspection;
use crate::error::EngineError;

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Container name; the engine picks one when `None`.
    pub name: Option<String>,
    pub image: String,
    pub tag: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub cmd: Vec<String>,
    /// Publish every exposed port on a random host port.
    pub publish_all_ports: bool,
    pub labels: Vec<(String, String)>,
}

impl CreateRequest {
    /// `image:tag`.
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Operations the orchestrator performs against a container engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Endpoint this client talks to; drives host resolution.
    fn endpoint(&self) -> &EngineEndpoint;

    /// Check the engine responds.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Pull `name:tag`, completing when the image is available locally.
    async fn pull_image(&self, name: &str, tag: &str) -> Result<(), EngineError>;

    /// Create a container and return its id.
    async fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError>;

    /// Start a container. `Ok(false)` means it was already running.
    async fn start_container(&self, id: &str) -> Result<bool, EngineError>;

    /// Follow the container's stdout/stderr, one entry per line.
    fn stream_logs(&self, id: &str) -> BoxStream<'static, Result<String, EngineError>>;

    /// Inspect a container's state and network settings.
    async fn inspect_container(&self, id: &str) -> Result<Inspection, EngineError>;

    /// Stop a container. `Ok(false)` means it was not running.
    async fn stop_container(&self, id: &str) -> Result<bool, EngineError>;

    /// Remove a container (forcefully, with anonymous volumes).
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;
}
