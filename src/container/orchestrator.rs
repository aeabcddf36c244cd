//! Fixture container lifecycle.
//!
//! ```text
//!   start()
//!     │
//!     ▼
//!   ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────────────┐   ┌───────────────┐
//!   │ Pull Image │──▶│ Create     │──▶│ Start      │──▶│ Poll Inspect     │──▶│ Service Probe │
//!   │            │   │ (Created)  │   │ (Starting) │   │ until running    │   │ (optional)    │
//!   └────────────┘   └────────────┘   └────────────┘   └──────────────────┘   └───────────────┘
//!                                                                                     │
//!                                                                                     ▼
//!                                                      stop() ◀──── resolve_address ─ Running
//!                                                        │
//!                                                        ▼
//!                                               Stop + Remove (Stopped)
//! ```
//!
//! Any step before `Running` moves the handle to `Failed`. A failed start
//! leaves whatever the engine created in place; call [`Container::stop`] to
//! clean it up.

use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use crate::config::FixtureSettings;
use crate::container::configuration::ContainerConfiguration;
use crate::container::probe::{ProbeError, ReadinessProbe};
use crate::container::state::{Inspection, LifecycleState};
use crate::engine::{CreateRequest, EngineClient};
use crate::error::{EngineError, FixtureError, Result, StartupStage, short_id};
use crate::host::{HostResolver, ServiceAddress};
use crate::retry::RetryPolicy;

/// Label set on every container this crate creates.
pub const FIXTURE_LABEL: &str = "dockfix.fixture";

/// In-memory record of one container's identity and last-known state.
#[derive(Debug, Clone, Default)]
pub struct ContainerHandle {
    id: Option<String>,
    name: String,
    state: LifecycleState,
    inspection: Option<Inspection>,
    removed: bool,
}

impl ContainerHandle {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Engine-assigned id; present once the container was created.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Last successful inspection.
    pub fn inspection(&self) -> Option<&Inspection> {
        self.inspection.as_ref()
    }

    /// Whether the engine confirmed the container is gone.
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// A disposable container run as a test fixture.
///
/// Lifecycle calls take `&mut self`; one `Container` is driven by one task.
/// Independent containers share only the engine client.
pub struct Container {
    engine: Arc<dyn EngineClient>,
    configuration: ContainerConfiguration,
    resolver: HostResolver,
    readiness: RetryPolicy,
    probe: Option<Arc<dyn ReadinessProbe>>,
    stream_logs: bool,
    handle: ContainerHandle,
}

impl Container {
    /// Create an orchestrator for `configuration` with default policies.
    pub fn new(engine: Arc<dyn EngineClient>, configuration: ContainerConfiguration) -> Self {
        let name = format!("dockfix-{}", Uuid::new_v4().simple());
        Self {
            engine,
            configuration,
            resolver: HostResolver::new(),
            readiness: RetryPolicy::engine_default(),
            probe: None,
            stream_logs: false,
            handle: ContainerHandle::named(name),
        }
    }

    /// Apply readiness and log settings resolved from the environment.
    pub fn with_settings(mut self, settings: &FixtureSettings) -> Self {
        self.readiness = settings.readiness_policy();
        self.stream_logs = settings.stream_logs;
        self
    }

    /// Policy for the "engine reports running" wait.
    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Add a service-level check run after the engine reports running.
    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn with_resolver(mut self, resolver: HostResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Forward container stdout/stderr to tracing once started.
    pub fn with_log_streaming(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }

    /// Override the generated container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.handle.name = name.into();
        self
    }

    pub fn configuration(&self) -> &ContainerConfiguration {
        &self.configuration
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    pub fn container_id(&self) -> Option<&str> {
        self.handle.id()
    }

    /// Current lifecycle state; `Unknown` before anything happened.
    pub fn state(&self) -> LifecycleState {
        self.handle.state
    }

    pub fn is_running(&self) -> bool {
        self.handle.state.is_running()
    }

    pub fn inspection(&self) -> Option<&Inspection> {
        self.handle.inspection()
    }

    /// Create, start and wait for the container to become ready.
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.state != LifecycleState::Unknown {
            return Err(FixtureError::InvalidState {
                operation: "start",
                state: self.handle.state,
            });
        }

        let image = self.configuration.image_reference();
        tracing::info!("Starting fixture container {} ({})", self.handle.name, image);

        if let Err(e) = self
            .engine
            .pull_image(self.configuration.image_name(), self.configuration.tag())
            .await
        {
            return Err(self.fail(
                StartupStage::PullImage,
                FixtureError::engine("pull_image", None, e),
            ));
        }

        let request = self.create_request();
        let id = match self.engine.create_container(&request).await {
            Ok(id) => id,
            Err(e) => {
                return Err(self.fail(
                    StartupStage::CreateContainer,
                    FixtureError::engine("create_container", None, e),
                ));
            }
        };
        self.handle.id = Some(id.clone());
        self.transition(LifecycleState::Created);

        match self.engine.start_container(&id).await {
            Ok(started) => {
                if started && self.stream_logs {
                    self.spawn_log_consumer(&id);
                }
            }
            Err(e) => {
                return Err(self.fail(
                    StartupStage::StartContainer,
                    FixtureError::engine("start_container", Some(&id), e),
                ));
            }
        }
        self.transition(LifecycleState::Starting);

        match self.wait_until_running(&id).await {
            Ok(inspection) => self.handle.inspection = Some(inspection),
            Err(e) => return Err(self.fail(StartupStage::WaitForRunning, e)),
        }

        if let Some(probe) = self.probe.clone()
            && let Err(e) = self.wait_for_service(probe.as_ref(), &id).await
        {
            return Err(self.fail(StartupStage::ServiceProbe, e));
        }

        self.transition(LifecycleState::Running);
        tracing::info!(
            "Fixture container {} ({}) ready",
            self.handle.name,
            short_id(&id)
        );
        Ok(())
    }

    /// Stop and remove the container.
    ///
    /// A no-op when nothing was created or it was already removed. Stop
    /// failures are logged and removal is attempted anyway; only a failed
    /// removal is reported, and calling `stop()` again retries it.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(id) = self.handle.id.clone() else {
            return Ok(());
        };
        if self.handle.removed {
            return Ok(());
        }
        if self.handle.state != LifecycleState::Stopped {
            self.stop_engine_container(&id).await;
        }

        match self.engine.remove_container(&id).await {
            Ok(()) => {
                tracing::info!("Removed fixture container {}", self.handle.name);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} already removed", short_id(&id));
            }
            Err(source) => {
                return Err(FixtureError::TeardownFailed {
                    container_id: id,
                    source,
                });
            }
        }
        self.handle.removed = true;
        Ok(())
    }

    async fn stop_engine_container(&mut self, id: &str) {
        tracing::info!("Stopping fixture container {}", self.handle.name);

        match self.engine.stop_container(id).await {
            Ok(true) => tracing::debug!("Stopped container {}", short_id(id)),
            Ok(false) => tracing::debug!("Container {} was not running", short_id(id)),
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} already gone", short_id(id))
            }
            Err(e) => tracing::warn!(
                "Failed to stop container {}, removing anyway: {}",
                short_id(id),
                e
            ),
        }

        self.transition(LifecycleState::Stopped);
        if let Some(inspection) = self.handle.inspection.as_mut() {
            inspection.running = false;
        }
    }

    /// Address a client should use to reach `container_port`.
    pub fn resolve_address(&self, container_port: u16) -> Result<ServiceAddress> {
        if !self.configuration.exposes(container_port) {
            return Err(FixtureError::PortNotExposed {
                port: container_port,
            });
        }
        if !self.handle.state.is_running() {
            return Err(FixtureError::NotReady);
        }
        self.resolve_unchecked(container_port)
    }

    /// `host:port` for `container_port`.
    pub fn connection_string(&self, container_port: u16) -> Result<String> {
        self.resolve_address(container_port)
            .map(|address| address.connection_string())
    }

    fn resolve_unchecked(&self, container_port: u16) -> Result<ServiceAddress> {
        let (Some(id), Some(inspection)) = (self.handle.id(), self.handle.inspection()) else {
            return Err(FixtureError::NotReady);
        };
        self.resolver.resolve(
            self.engine.endpoint(),
            self.configuration.exposed_ports(),
            inspection,
            container_port,
            id,
        )
    }

    fn create_request(&self) -> CreateRequest {
        CreateRequest {
            name: Some(self.handle.name.clone()),
            image: self.configuration.image_name().to_string(),
            tag: self.configuration.tag().to_string(),
            env: self.configuration.env_strings(),
            exposed_ports: self.configuration.exposed_ports().to_vec(),
            cmd: self.configuration.command().to_vec(),
            publish_all_ports: true,
            labels: vec![
                (FIXTURE_LABEL.to_string(), "true".to_string()),
                (
                    format!("{FIXTURE_LABEL}.image"),
                    self.configuration.image_reference(),
                ),
            ],
        }
    }

    /// Poll inspect until the container runs with all exposed ports bound.
    /// Only the predicate is retried; an inspect error ends the wait.
    async fn wait_until_running(&self, id: &str) -> Result<Inspection> {
        let engine = &self.engine;
        let exposed = self.configuration.exposed_ports();

        self.readiness
            .run(
                move || engine.inspect_container(id),
                |inspection: &Inspection| inspection.is_ready(exposed),
                |_: &EngineError| false,
            )
            .await
            .map_err(|e| {
                e.into_fixture_error(|e| FixtureError::engine("inspect_container", Some(id), e))
            })
    }

    async fn wait_for_service(&self, probe: &dyn ReadinessProbe, id: &str) -> Result<()> {
        let address = self.resolve_unchecked(probe.port())?;
        tracing::info!(
            "Waiting for service in container {} at {}",
            short_id(id),
            address
        );

        let address = &address;
        probe
            .policy()
            .run(
                move || probe.check(address),
                |_| true,
                ProbeError::is_retryable,
            )
            .await
            .map_err(|e| {
                e.into_fixture_error(|e| FixtureError::ProbeFailed {
                    reason: e.to_string(),
                })
            })
    }

    fn spawn_log_consumer(&self, id: &str) {
        let mut logs = self.engine.stream_logs(id);
        let container = short_id(id).to_string();

        tokio::spawn(async move {
            while let Some(line) = logs.next().await {
                match line {
                    Ok(line) => tracing::trace!(
                        target: "dockfix::container_logs",
                        container = %container,
                        "{}",
                        line
                    ),
                    Err(e) => {
                        tracing::debug!("Log stream for {} ended: {}", container, e);
                        break;
                    }
                }
            }
        });
    }

    fn transition(&mut self, target: LifecycleState) {
        debug_assert!(
            self.handle.state.can_transition_to(target),
            "invalid transition {} -> {}",
            self.handle.state,
            target
        );
        tracing::debug!(
            "Container {}: {} -> {}",
            self.handle.name,
            self.handle.state,
            target
        );
        self.handle.state = target;
    }

    fn fail(&mut self, stage: StartupStage, cause: FixtureError) -> FixtureError {
        self.transition(LifecycleState::Failed);
        tracing::warn!(
            "Fixture container {} failed during {}: {}",
            self.handle.name,
            stage,
            cause
        );
        FixtureError::StartupFailed {
            stage,
            container_id: self.handle.id.clone(),
            cause: Box::new(cause),
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("configuration", &self.configuration)
            .field("endpoint", self.engine.endpoint())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.handle.state.is_running() {
            tracing::warn!(
                "Container '{}' dropped without stop(), it may remain running",
                self.handle.name
            );
        }
    }
}
