//! In-memory engine for tests.
//!
//! Provides [`StubEngine`], an [`EngineClient`] that keeps containers in a
//! map instead of talking to a daemon. It records every call and can be told
//! to fail at specific steps.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockfix::container::{Container, ContainerConfiguration};
//! use dockfix::testing::StubEngine;
//!
//! # async fn example() -> dockfix::Result<()> {
//! let engine = Arc::new(StubEngine::new());
//! let config = ContainerConfiguration::builder()
//!     .with_image("redis:7")
//!     .with_exposed_ports([6379])
//!     .build()?;
//! let mut container = Container::new(engine.clone(), config);
//! container.start().await?;
//! assert_eq!(engine.running_containers(), 1);
//! container.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::container::{HostBinding, Inspection, PortBindings};
use crate::engine::{CreateRequest, EngineClient, EngineEndpoint};
use crate::error::EngineError;

/// First host port handed out by the stub.
pub const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug, Clone)]
struct StubContainer {
    running: bool,
    inspections: u32,
    host_ports: Vec<(u16, u16)>,
}

#[derive(Debug, Default)]
struct StubState {
    next_id: u32,
    next_host_port: u16,
    containers: HashMap<String, StubContainer>,
    missing_images: HashSet<String>,
    calls: Vec<&'static str>,
    requests: Vec<CreateRequest>,
}

/// A configurable engine stub.
///
/// Supports:
/// - Images reported missing on pull ([`with_missing_image`](Self::with_missing_image))
/// - Containers that never report running ([`never_running`](Self::never_running))
/// - Port bindings that appear only after N inspections
///   ([`with_binding_delay`](Self::with_binding_delay))
/// - Start and remove failures toggled at runtime
pub struct StubEngine {
    endpoint: EngineEndpoint,
    gateway: Option<String>,
    log_lines: Vec<String>,
    binding_delay: u32,
    never_running: AtomicBool,
    fail_start: AtomicBool,
    fail_remove: AtomicBool,
    inspect_errors: AtomicU32,
    state: Mutex<StubState>,
}

impl StubEngine {
    /// A stub reached over the platform's local socket.
    pub fn new() -> Self {
        Self {
            endpoint: EngineEndpoint::local_default(),
            gateway: Some("172.17.0.1".to_string()),
            log_lines: Vec::new(),
            binding_delay: 0,
            never_running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            inspect_errors: AtomicU32::new(0),
            state: Mutex::new(StubState {
                next_host_port: FIRST_HOST_PORT,
                ..Default::default()
            }),
        }
    }

    pub fn with_endpoint(mut self, endpoint: EngineEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_gateway(mut self, gateway: Option<&str>) -> Self {
        self.gateway = gateway.map(str::to_string);
        self
    }

    /// Pulling `reference` (`name:tag`) fails with not-found.
    pub fn with_missing_image(self, reference: &str) -> Self {
        self.lock().missing_images.insert(reference.to_string());
        self
    }

    /// Report running but leave port bindings empty for the first `n` inspections.
    pub fn with_binding_delay(mut self, n: u32) -> Self {
        self.binding_delay = n;
        self
    }

    /// Lines yielded by `stream_logs`.
    pub fn with_log_lines(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Containers never report running.
    pub fn never_running(self) -> Self {
        self.never_running.store(true, Ordering::Relaxed);
        self
    }

    /// Fail the next `n` inspections with a transport error.
    pub fn fail_inspections(&self, n: u32) {
        self.inspect_errors.store(n, Ordering::Relaxed);
    }

    /// Toggle whether `start_container` fails.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Relaxed);
    }

    /// Toggle whether `remove_container` fails.
    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::Relaxed);
    }

    /// Remove a container behind the orchestrator's back.
    pub fn vanish(&self, id: &str) {
        self.lock().containers.remove(id);
    }

    /// Number of calls to the named operation (e.g. `"inspect_container"`).
    pub fn calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    /// Operations in call order.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Every create request received.
    pub fn create_requests(&self) -> Vec<CreateRequest> {
        self.lock().requests.clone()
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.lock().containers.contains_key(id)
    }

    pub fn running_containers(&self) -> usize {
        self.lock().containers.values().filter(|c| c.running).count()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: &'static str) -> MutexGuard<'_, StubState> {
        let mut state = self.lock();
        state.calls.push(operation);
        state
    }

    fn note(&self, operation: &'static str) {
        self.lock().calls.push(operation);
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &str) -> EngineError {
    EngineError::NotFound {
        resource: id.to_string(),
        message: format!("No such container: {id}"),
    }
}

#[async_trait]
impl EngineClient for StubEngine {
    fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.note("ping");
        Ok(())
    }

    async fn pull_image(&self, name: &str, tag: &str) -> Result<(), EngineError> {
        let state = self.record("pull_image");
        let reference = format!("{name}:{tag}");
        if state.missing_images.contains(&reference) {
            return Err(EngineError::NotFound {
                resource: reference.clone(),
                message: format!("pull access denied for {name}, repository does not exist"),
            });
        }
        Ok(())
    }

    async fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let mut state = self.record("create_container");
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);

        let mut host_ports = Vec::new();
        if request.publish_all_ports {
            for port in &request.exposed_ports {
                host_ports.push((*port, state.next_host_port));
                // Wrap back into the ephemeral range instead of overflowing.
                state.next_host_port = state
                    .next_host_port
                    .checked_add(1)
                    .unwrap_or(FIRST_HOST_PORT);
            }
        }

        state.requests.push(request.clone());
        state.containers.insert(
            id.clone(),
            StubContainer {
                running: false,
                inspections: 0,
                host_ports,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.record("start_container");
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(EngineError::Api {
                status: 500,
                message: "cannot start container: exec format error".to_string(),
            });
        }
        let never_running = self.never_running.load(Ordering::Relaxed);
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        if container.running {
            return Ok(false);
        }
        container.running = !never_running;
        Ok(true)
    }

    fn stream_logs(&self, _id: &str) -> BoxStream<'static, Result<String, EngineError>> {
        self.note("stream_logs");
        futures::stream::iter(self.log_lines.clone().into_iter().map(Ok)).boxed()
    }

    async fn inspect_container(&self, id: &str) -> Result<Inspection, EngineError> {
        let mut state = self.record("inspect_container");

        let pending_errors = self.inspect_errors.load(Ordering::Relaxed);
        if pending_errors > 0 {
            self.inspect_errors.store(pending_errors - 1, Ordering::Relaxed);
            return Err(EngineError::Transport("connection reset by peer".to_string()));
        }

        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.inspections += 1;

        let mut ports = PortBindings::new();
        if container.running && container.inspections > self.binding_delay {
            for (container_port, host_port) in &container.host_ports {
                ports.insert_tcp(
                    *container_port,
                    HostBinding {
                        host_ip: "0.0.0.0".to_string(),
                        host_port: *host_port,
                    },
                );
            }
        }

        Ok(Inspection {
            running: container.running,
            status: Some(if container.running { "running" } else { "created" }.to_string()),
            gateway: self.gateway.clone(),
            ports,
        })
    }

    async fn stop_container(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.record("stop_container");
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        let was_running = container.running;
        container.running = false;
        Ok(was_running)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.record("remove_container");
        if self.fail_remove.load(Ordering::Relaxed) {
            return Err(EngineError::Api {
                status: 409,
                message: "removal of container is already in progress".to_string(),
            });
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }
}

impl std::fmt::Debug for StubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubEngine")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
