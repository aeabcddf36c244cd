//! Disposable Docker containers for integration tests.
//!
//! A [`Container`] pulls an image, creates and starts a container with every
//! exposed port published on a random host port, waits until the engine (and
//! optionally the service itself) reports ready, and tears everything down on
//! [`Container::stop`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockfix::{Container, ContainerConfiguration, DockerEngine, FixtureSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = FixtureSettings::resolve()?;
//! let engine = Arc::new(DockerEngine::connect(settings.endpoint.clone(), settings.engine_timeout)?);
//!
//! let config = ContainerConfiguration::builder()
//!     .with_image("nginx")
//!     .with_exposed_ports([80])
//!     .build()?;
//! let mut nginx = Container::new(engine, config).with_settings(&settings);
//! nginx.start().await?;
//! println!("nginx at {}", nginx.connection_string(80)?);
//! nginx.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod host;
pub mod retry;
pub mod testing;

pub use config::FixtureSettings;
pub use container::{Container, ContainerConfiguration, LifecycleState};
pub use engine::{DockerEngine, EngineClient, EngineEndpoint};
pub use error::{FixtureError, Result};
pub use host::{HostResolver, ServiceAddress};
pub use retry::RetryPolicy;
