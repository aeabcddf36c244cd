//! Error types for fixture containers.

use std::time::Duration;

use thiserror::Error;

/// Result type for fixture operations.
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Configuration errors raised while resolving settings from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The engine endpoint could not be parsed.
    #[error("Invalid engine endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as given.
        endpoint: String,
        /// Reason for rejection.
        reason: String,
    },
}

/// Errors reported by an [`EngineClient`](crate::engine::EngineClient).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced container or image does not exist.
    #[error("{resource} not found: {message}")]
    NotFound {
        /// Container id or image reference.
        resource: String,
        /// Engine message.
        message: String,
    },

    /// The engine answered with an error status.
    #[error("engine returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Engine message.
        message: String,
    },

    /// The engine could not be reached or the request failed in transit.
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The endpoint scheme is not supported on this platform.
    #[error("unsupported engine endpoint: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Returns true if the engine reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound {
                resource: "resource".to_string(),
                message,
            },
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Api {
                status: status_code,
                message,
            },
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// Step of [`Container::start`](crate::container::Container::start) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// Pulling the image; no container exists.
    PullImage,
    /// Creating the container; no container exists.
    CreateContainer,
    /// Starting the container; it exists but never ran.
    StartContainer,
    /// Waiting for the engine to report the container running.
    WaitForRunning,
    /// Waiting for the service inside the container to accept connections.
    ServiceProbe,
}

impl std::fmt::Display for StartupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PullImage => "image pull",
            Self::CreateContainer => "container create",
            Self::StartContainer => "container start",
            Self::WaitForRunning => "wait for running",
            Self::ServiceProbe => "service probe",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur while running a fixture container.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The container configuration is unusable.
    #[error("Invalid container configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for rejection.
        reason: String,
    },

    /// An engine call failed.
    #[error("Engine operation '{operation}' failed{}: {source}", fmt_container(.container_id))]
    Engine {
        /// Engine operation name.
        operation: &'static str,
        /// Container id, when one exists.
        container_id: Option<String>,
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// A readiness wait ran out of time.
    #[error("Not ready after {attempts} attempt(s) within {deadline:?}: {last}")]
    ReadinessTimeout {
        /// Overall deadline.
        deadline: Duration,
        /// Number of probes performed.
        attempts: u32,
        /// Last observation or error seen.
        last: String,
    },

    /// A readiness probe hit a non-retryable failure.
    #[error("Readiness probe failed: {reason}")]
    ProbeFailed {
        /// Reason for failure.
        reason: String,
    },

    /// `start()` failed; wraps the first failure.
    #[error("Container startup failed during {stage}{}: {cause}", fmt_container(.container_id))]
    StartupFailed {
        /// Step that failed.
        stage: StartupStage,
        /// Container id, if the container was created.
        container_id: Option<String>,
        /// First failure.
        #[source]
        cause: Box<FixtureError>,
    },

    /// The port was not declared in the configuration.
    #[error("Port {port} is not exposed by the container configuration")]
    PortNotExposed {
        /// Container port.
        port: u16,
    },

    /// The port is exposed but the engine reports no binding for it.
    #[error("Engine reports no host binding for port {port} of container {container_id}")]
    PortBindingMissing {
        /// Container port.
        port: u16,
        /// Container id.
        container_id: String,
    },

    /// Address resolution was requested before a successful start.
    #[error("Container is not running")]
    NotReady,

    /// Lifecycle call made in a state that does not allow it.
    #[error("Cannot {operation} container in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state.
        state: crate::container::LifecycleState,
    },

    /// Removing the container failed.
    #[error("Failed to remove container {container_id}: {source}")]
    TeardownFailed {
        /// Container id.
        container_id: String,
        /// Underlying engine error.
        #[source]
        source: EngineError,
    },

    /// Settings could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FixtureError {
    /// Wrap an engine error with its operation and container context.
    pub(crate) fn engine(
        operation: &'static str,
        container_id: Option<&str>,
        source: EngineError,
    ) -> Self {
        FixtureError::Engine {
            operation,
            container_id: container_id.map(str::to_string),
            source,
        }
    }

    /// Returns the wrapped cause of a startup failure, or `self` otherwise.
    pub fn root(&self) -> &FixtureError {
        match self {
            FixtureError::StartupFailed { cause, .. } => cause.root(),
            other => other,
        }
    }

    /// Returns true if this is, or wraps, a readiness timeout.
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self.root(), FixtureError::ReadinessTimeout { .. })
    }
}

fn fmt_container(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" (container {})", short_id(id)),
        None => String::new(),
    }
}

/// First 12 characters of a container id.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
