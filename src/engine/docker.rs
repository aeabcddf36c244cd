//! Docker engine client over bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::container::{HostBinding, Inspection, PortBindings};
use crate::engine::{CreateRequest, EndpointScheme, EngineClient, EngineEndpoint};
use crate::error::EngineError;

/// Seconds the engine waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 10;

/// [`EngineClient`] backed by a Docker-compatible daemon.
#[derive(Clone, Debug)]
pub struct DockerEngine {
    docker: Docker,
    endpoint: EngineEndpoint,
}

impl DockerEngine {
    /// Connect to the engine at `endpoint`. Does not contact the daemon;
    /// call [`EngineClient::ping`] to check it is reachable.
    pub fn connect(endpoint: EngineEndpoint, timeout: Duration) -> Result<Self, EngineError> {
        let secs = timeout.as_secs().max(1);
        let version = bollard::API_DEFAULT_VERSION;

        let docker = match endpoint.scheme() {
            #[cfg(unix)]
            EndpointScheme::Unix => {
                Docker::connect_with_unix(endpoint.path().unwrap_or_default(), secs, version)
            }
            #[cfg(windows)]
            EndpointScheme::NamedPipe => {
                Docker::connect_with_named_pipe(endpoint.path().unwrap_or_default(), secs, version)
            }
            EndpointScheme::Tcp | EndpointScheme::Http => {
                let address = endpoint.http_address().ok_or_else(|| {
                    EngineError::Unsupported(format!("{endpoint} has no host"))
                })?;
                Docker::connect_with_http(&address, secs, version)
            }
            other => {
                return Err(EngineError::Unsupported(format!(
                    "{other} endpoints are not supported on this platform: {endpoint}"
                )));
            }
        }
        .map_err(|e| EngineError::Transport(e.to_string()))?;

        tracing::debug!("Connected engine client to {}", endpoint);
        Ok(Self { docker, endpoint })
    }

    /// Wrap an existing bollard client.
    pub fn from_docker(docker: Docker, endpoint: EngineEndpoint) -> Self {
        Self { docker, endpoint }
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    async fn pull_image(&self, name: &str, tag: &str) -> Result<(), EngineError> {
        let reference = format!("{name}:{tag}");
        tracing::info!("Pulling image: {}", reference);

        let options = CreateImageOptions {
            from_image: name.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(map_error(&reference, e)),
            }
        }

        tracing::info!("Pulled image: {}", reference);
        Ok(())
    }

    async fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let image = request.image_reference();

        // bollard expects HashMap<String, HashMap<(), ()>>
        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .exposed_ports
            .iter()
            .map(|port| (format!("{}/tcp", port), HashMap::new()))
            .collect();

        let labels: HashMap<String, String> = request.labels.iter().cloned().collect();

        let host_config = HostConfig {
            publish_all_ports: Some(request.publish_all_ports),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.clone()),
            env: (!request.env.is_empty()).then(|| request.env.clone()),
            cmd: (!request.cmd.is_empty()).then(|| request.cmd.clone()),
            exposed_ports: Some(exposed_ports),
            labels: (!labels.is_empty()).then_some(labels),
            tty: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = request.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| map_error(&image, e))?;

        for warning in &response.warnings {
            tracing::warn!("Engine warning creating {}: {}", image, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<bool, EngineError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(true),
            // 304: already started
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(false),
            Err(e) => Err(map_error(id, e)),
        }
    }

    fn stream_logs(&self, id: &str) -> BoxStream<'static, Result<String, EngineError>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let id = id.to_string();

        self.docker
            .logs(&id, Some(options))
            .map(move |item| {
                item.map(|output| output.to_string().trim_end().to_string())
                    .map_err(|e| map_error(&id, e))
            })
            .boxed()
    }

    async fn inspect_container(&self, id: &str) -> Result<Inspection, EngineError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(id, e))?;
        Ok(inspection_from(info))
    }

    async fn stop_container(&self, id: &str) -> Result<bool, EngineError> {
        let options = StopContainerOptions {
            t: STOP_GRACE_SECS,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(true),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(false),
            Err(e) => Err(map_error(id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_error(id, e))
    }
}

/// Map a bollard error, naming `resource` when the engine reports it missing.
fn map_error(resource: &str, e: bollard::errors::Error) -> EngineError {
    match EngineError::from(e) {
        EngineError::NotFound { message, .. } => EngineError::NotFound {
            resource: resource.to_string(),
            message,
        },
        other => other,
    }
}

/// Reduce an inspect response to what readiness and host resolution need.
fn inspection_from(info: ContainerInspectResponse) -> Inspection {
    let state = info.state.unwrap_or_default();
    let settings = info.network_settings.unwrap_or_default();

    // Older engines only fill the per-network gateway.
    let gateway = settings
        .gateway
        .filter(|g| !g.is_empty())
        .or_else(|| {
            settings.networks.as_ref().and_then(|networks| {
                networks
                    .values()
                    .find_map(|n| n.gateway.clone().filter(|g| !g.is_empty()))
            })
        });

    let mut ports = PortBindings::new();
    for (key, bindings) in settings.ports.unwrap_or_default() {
        let bindings = bindings
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| {
                let host_port = b.host_port?.parse().ok()?;
                Some(HostBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port,
                })
            })
            .collect();
        ports.insert_raw(key, bindings);
    }

    Inspection {
        running: state.running.unwrap_or(false),
        status: state.status.map(|s| s.to_string()),
        gateway,
        ports,
    }
}
