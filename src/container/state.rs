//! Lifecycle state and engine inspection snapshots.

use std::collections::HashMap;

use serde::Serialize;

/// Lifecycle state of a fixture container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing known yet; reports not-running.
    #[default]
    Unknown,
    /// Created on the engine, not started.
    Created,
    /// Start issued, waiting for readiness.
    Starting,
    /// Running and ready.
    Running,
    /// Stopped and removed. Terminal.
    Stopped,
    /// Startup failed.
    Failed,
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Check if the lifecycle allows moving to `target`.
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, target),
            (Unknown, Created) | (Unknown, Failed) |
            (Created, Starting) | (Created, Failed) |
            (Starting, Running) | (Starting, Failed) |
            // Teardown is allowed from anywhere but is final.
            (Unknown | Created | Starting | Running | Failed, Stopped)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One host-side binding of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostBinding {
    /// Host IP the port is published on (`0.0.0.0` for all interfaces).
    pub host_ip: String,
    pub host_port: u16,
}

/// Port-binding table keyed by `"<port>/<proto>"`, as the engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortBindings(HashMap<String, Vec<HostBinding>>);

impl PortBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding for a TCP container port.
    pub fn insert_tcp(&mut self, container_port: u16, binding: HostBinding) {
        self.0
            .entry(tcp_key(container_port))
            .or_default()
            .push(binding);
    }

    /// Record the bindings of a raw `"<port>/<proto>"` key.
    pub fn insert_raw(&mut self, key: impl Into<String>, bindings: Vec<HostBinding>) {
        self.0.insert(key.into(), bindings);
    }

    /// Bindings for `container_port/tcp`; empty if unbound.
    pub fn tcp(&self, container_port: u16) -> &[HostBinding] {
        self.0
            .get(&tcp_key(container_port))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns true if every listed port has at least one host binding.
    pub fn covers(&self, ports: &[u16]) -> bool {
        ports.iter().all(|p| !self.tcp(*p).is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

fn tcp_key(port: u16) -> String {
    format!("{port}/tcp")
}

/// What one `inspect` call reported about a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub running: bool,
    /// Engine status string (`created`, `running`, `exited`, ...).
    pub status: Option<String>,
    /// Gateway of the container's default network.
    pub gateway: Option<String>,
    pub ports: PortBindings,
}

impl Inspection {
    /// Running with a binding for each of `exposed`.
    ///
    /// Some engines report `running` before port bindings propagate, so a
    /// running container without them is not ready yet.
    pub fn is_ready(&self, exposed: &[u16]) -> bool {
        self.running && self.ports.covers(exposed)
    }
}
