//! Service-level readiness probes.
//!
//! The engine reporting a container as running says nothing about the service
//! inside it. A [`ReadinessProbe`] is an extra check a fixture layers on top;
//! it runs under its own [`RetryPolicy`] once the engine check has passed.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::host::ServiceAddress;
use crate::retry::RetryPolicy;

/// Failure of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The service is not up yet; try again.
    #[error("not ready: {0}")]
    Retryable(String),
    /// The service can never become ready; stop waiting.
    #[error("{0}")]
    Fatal(String),
}

impl ProbeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Retryable(_))
    }

    /// Classify an I/O error: refused, reset and aborted connections are
    /// what a booting service looks like, everything else is fatal.
    pub fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut => ProbeError::Retryable(e.to_string()),
            _ => ProbeError::Fatal(e.to_string()),
        }
    }
}

/// Extra readiness check run after the engine reports the container running.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Port whose resolved address is passed to [`check`](Self::check).
    fn port(&self) -> u16;

    /// Deadline and interval for this probe.
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::service_default()
    }

    /// One attempt against the service.
    async fn check(&self, address: &ServiceAddress) -> Result<(), ProbeError>;
}

/// Succeeds once a TCP connection to the port is accepted.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    port: u16,
    policy: RetryPolicy,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            policy: RetryPolicy::service_default(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn port(&self) -> u16 {
        self.port
    }

    fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn check(&self, address: &ServiceAddress) -> Result<(), ProbeError> {
        let target = address.connection_string();
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::from_io(&e)),
            Err(_) => Err(ProbeError::Retryable(format!(
                "connect to {target} timed out"
            ))),
        }
    }
}

type CheckFn = dyn Fn(ServiceAddress) -> BoxFuture<'static, Result<(), ProbeError>> + Send + Sync;

/// Probe built from a closure.
///
/// ```rust,no_run
/// use dockfix::container::{FnProbe, ProbeError};
///
/// let probe = FnProbe::new(8080, |address| {
///     Box::pin(async move {
///         let _ = address;
///         Err(ProbeError::Retryable("warming up".to_string()))
///     })
/// });
/// ```
#[derive(Clone)]
pub struct FnProbe {
    port: u16,
    policy: RetryPolicy,
    check: Arc<CheckFn>,
}

impl FnProbe {
    pub fn new<F>(port: u16, check: F) -> Self
    where
        F: Fn(ServiceAddress) -> BoxFuture<'static, Result<(), ProbeError>> + Send + Sync + 'static,
    {
        Self {
            port,
            policy: RetryPolicy::service_default(),
            check: Arc::new(check),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ReadinessProbe for FnProbe {
    fn port(&self) -> u16 {
        self.port
    }

    fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn check(&self, address: &ServiceAddress) -> Result<(), ProbeError> {
        (self.check)(address.clone()).await
    }
}

impl std::fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProbe")
            .field("port", &self.port)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
