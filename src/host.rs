//! Host address resolution for published container ports.
//!
//! Which host a client should dial depends on how the engine is reached:
//!
//! | Endpoint scheme         | Process on the host | Process in a container |
//! |-------------------------|---------------------|------------------------|
//! | `http`, `https`, `tcp`  | endpoint host       | endpoint host          |
//! | `unix`, `npipe`         | `localhost`         | container gateway      |
//!
//! `localhost` inside a container does not route to ports published on the
//! engine host, so a containerised test runner must go through the gateway
//! of the fixture container's network instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::container::Inspection;
use crate::engine::{EndpointScheme, EngineEndpoint};
use crate::error::{FixtureError, Result};

/// Marker file Docker creates at the root of every container filesystem.
pub const CONTAINER_MARKER: &str = "/.dockerenv";

const LOCALHOST: &str = "localhost";

/// A resolved `host:port` clients can connect to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    /// `host:port`.
    pub fn connection_string(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How the resolver decides whether this process runs inside a container.
type ContainerDetector = Arc<dyn Fn() -> bool + Send + Sync>;

/// Turns an engine endpoint plus an inspection snapshot into a client address.
#[derive(Clone)]
pub struct HostResolver {
    in_container: ContainerDetector,
}

impl HostResolver {
    /// Resolver that detects containerised execution via [`CONTAINER_MARKER`].
    pub fn new() -> Self {
        Self::with_marker(CONTAINER_MARKER)
    }

    /// Resolver that checks for the given marker file.
    pub fn with_marker(marker: impl Into<PathBuf>) -> Self {
        let marker = marker.into();
        Self::with_detector(move || marker_present(&marker))
    }

    /// Resolver with a custom in-container predicate.
    pub fn with_detector(detector: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            in_container: Arc::new(detector),
        }
    }

    pub fn in_container(&self) -> bool {
        (self.in_container)()
    }

    /// Host a client should dial to reach ports published by `endpoint`.
    pub fn external_host(&self, endpoint: &EngineEndpoint, inspection: &Inspection) -> String {
        match endpoint.scheme() {
            EndpointScheme::Http | EndpointScheme::Https | EndpointScheme::Tcp => endpoint
                .host()
                .map(str::to_string)
                .unwrap_or_else(|| LOCALHOST.to_string()),
            EndpointScheme::Unix | EndpointScheme::NamedPipe => {
                if !self.in_container() {
                    return LOCALHOST.to_string();
                }
                match inspection.gateway.as_deref() {
                    Some(gateway) if !gateway.is_empty() => gateway.to_string(),
                    _ => {
                        tracing::warn!(
                            "Running inside a container but the engine reported no gateway; using {}",
                            LOCALHOST
                        );
                        LOCALHOST.to_string()
                    }
                }
            }
        }
    }

    /// Host port the engine published `container_port` on.
    pub fn mapped_port(
        exposed: &[u16],
        inspection: &Inspection,
        container_port: u16,
        container_id: &str,
    ) -> Result<u16> {
        if exposed.is_empty() || !exposed.contains(&container_port) {
            return Err(FixtureError::PortNotExposed {
                port: container_port,
            });
        }

        inspection
            .ports
            .tcp(container_port)
            .first()
            .map(|b| b.host_port)
            .ok_or_else(|| FixtureError::PortBindingMissing {
                port: container_port,
                container_id: container_id.to_string(),
            })
    }

    /// Resolve the client address for `container_port`.
    pub fn resolve(
        &self,
        endpoint: &EngineEndpoint,
        exposed: &[u16],
        inspection: &Inspection,
        container_port: u16,
        container_id: &str,
    ) -> Result<ServiceAddress> {
        let port = Self::mapped_port(exposed, inspection, container_port, container_id)?;
        Ok(ServiceAddress {
            host: self.external_host(endpoint, inspection),
            port,
        })
    }
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver").finish_non_exhaustive()
    }
}

fn marker_present(marker: &Path) -> bool {
    marker.exists()
}
