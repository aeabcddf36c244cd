//! Redis fixture.
//!
//! Starts a Redis image and only reports ready once the server answers
//! `PING`; the engine marks the container running well before Redis accepts
//! connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::container::{Container, ContainerConfiguration, ProbeError, ReadinessProbe};
use crate::engine::EngineClient;
use crate::error::Result;
use crate::host::ServiceAddress;
use crate::retry::RetryPolicy;

/// Image used by [`RedisContainer::new`].
pub const DEFAULT_IMAGE: &str = "redis:latest";

/// Port Redis listens on inside the container.
pub const REDIS_PORT: u16 = 6379;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends `PING` and expects `+PONG`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    policy: RetryPolicy,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::service_default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn ping(target: &str) -> std::result::Result<Vec<u8>, ProbeError> {
        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|e| ProbeError::from_io(&e))?;
        stream
            .write_all(b"PING\r\n")
            .await
            .map_err(|e| ProbeError::from_io(&e))?;

        let mut reply = vec![0u8; 64];
        let n = stream
            .read(&mut reply)
            .await
            .map_err(|e| ProbeError::from_io(&e))?;
        reply.truncate(n);
        Ok(reply)
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for PingProbe {
    fn port(&self) -> u16 {
        REDIS_PORT
    }

    fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn check(&self, address: &ServiceAddress) -> std::result::Result<(), ProbeError> {
        let target = address.connection_string();
        let reply = tokio::time::timeout(IO_TIMEOUT, Self::ping(&target))
            .await
            .map_err(|_| ProbeError::Retryable(format!("PING to {target} timed out")))??;

        classify_reply(&reply)
    }
}

fn classify_reply(reply: &[u8]) -> std::result::Result<(), ProbeError> {
    if reply.starts_with(b"+PONG") {
        return Ok(());
    }
    if reply.is_empty() {
        return Err(ProbeError::Retryable("connection closed before reply".to_string()));
    }

    let text = String::from_utf8_lossy(reply).trim_end().to_string();
    // Redis answers -LOADING while it replays its dataset.
    if text.starts_with("-LOADING") || text.starts_with("-BUSY") {
        Err(ProbeError::Retryable(text))
    } else {
        Err(ProbeError::Fatal(format!("unexpected reply to PING: {text}")))
    }
}

/// A Redis server running in a throwaway container.
#[derive(Debug)]
pub struct RedisContainer {
    container: Container,
}

impl RedisContainer {
    /// Fixture for [`DEFAULT_IMAGE`].
    pub fn new(engine: Arc<dyn EngineClient>) -> Result<Self> {
        Self::create(engine, DEFAULT_IMAGE)
    }

    /// Fixture for a specific Redis image reference.
    pub fn create(engine: Arc<dyn EngineClient>, image: &str) -> Result<Self> {
        Self::with_probe(engine, image, PingProbe::new())
    }

    /// Fixture with a custom PING policy.
    pub fn with_probe(engine: Arc<dyn EngineClient>, image: &str, probe: PingProbe) -> Result<Self> {
        let configuration = ContainerConfiguration::builder()
            .with_image(image)
            .with_exposed_ports([REDIS_PORT])
            .build()?;
        Ok(Self {
            container: Container::new(engine, configuration).with_probe(probe),
        })
    }

    /// Apply further orchestrator options.
    pub fn map(mut self, f: impl FnOnce(Container) -> Container) -> Self {
        self.container = f(self.container);
        self
    }

    pub async fn start(&mut self) -> Result<()> {
        self.container.start().await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.container.stop().await
    }

    /// `host:port` a Redis client should connect to.
    pub fn connection_string(&self) -> Result<String> {
        self.container.connection_string(REDIS_PORT)
    }

    pub fn container(&self) -> &Container {
        &self.container
    }
}
