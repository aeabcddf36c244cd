use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool, parse_value};
use crate::engine::EngineEndpoint;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Settings shared by every fixture container in a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureSettings {
    /// Engine endpoint (`DOCKER_HOST`, or the platform's local socket).
    pub endpoint: EngineEndpoint,
    /// Deadline for the engine to report a started container running.
    pub startup_timeout: Duration,
    /// Interval between inspect polls while waiting.
    pub poll_interval: Duration,
    /// Forward container output to tracing.
    pub stream_logs: bool,
    /// Request timeout of the engine client.
    pub engine_timeout: Duration,
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            endpoint: EngineEndpoint::local_default(),
            startup_timeout: RetryPolicy::ENGINE_DEADLINE,
            poll_interval: RetryPolicy::ENGINE_INTERVAL,
            stream_logs: false,
            engine_timeout: Duration::from_secs(120),
        }
    }
}

impl FixtureSettings {
    /// Resolve settings from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(optional_env)
    }

    /// Resolve settings from the process environment, with `host` taking the
    /// place of `DOCKER_HOST` when given.
    pub fn resolve_with_host(host: Option<&str>) -> Result<Self, ConfigError> {
        Self::resolve_with(host_override(host, optional_env))
    }

    /// Resolve settings through `lookup`, which returns the raw value of a
    /// variable or `None` when it is unset.
    pub fn resolve_with<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();

        let endpoint = match lookup("DOCKER_HOST")? {
            Some(raw) => EngineEndpoint::parse(&raw)?,
            None => defaults.endpoint,
        };

        let startup_secs = parse_value(
            "DOCKFIX_STARTUP_TIMEOUT_SECS",
            lookup("DOCKFIX_STARTUP_TIMEOUT_SECS")?,
            defaults.startup_timeout.as_secs(),
        )?;
        if startup_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKFIX_STARTUP_TIMEOUT_SECS".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        let poll_ms = parse_value(
            "DOCKFIX_POLL_INTERVAL_MS",
            lookup("DOCKFIX_POLL_INTERVAL_MS")?,
            defaults.poll_interval.as_millis() as u64,
        )?;
        if poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKFIX_POLL_INTERVAL_MS".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        Ok(Self {
            endpoint,
            startup_timeout: Duration::from_secs(startup_secs),
            poll_interval: Duration::from_millis(poll_ms),
            stream_logs: parse_bool(
                "DOCKFIX_STREAM_LOGS",
                lookup("DOCKFIX_STREAM_LOGS")?,
                defaults.stream_logs,
            )?,
            engine_timeout: Duration::from_secs(parse_value(
                "DOCKFIX_ENGINE_TIMEOUT_SECS",
                lookup("DOCKFIX_ENGINE_TIMEOUT_SECS")?,
                defaults.engine_timeout.as_secs(),
            )?),
        })
    }

    /// Retry policy for the engine readiness wait.
    pub fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.startup_timeout, self.poll_interval)
            .unwrap_or_else(|_| RetryPolicy::engine_default())
    }
}

/// Wrap `lookup` so `DOCKER_HOST` reads `host` when one is given.
fn host_override<'a, F>(
    host: Option<&'a str>,
    mut lookup: F,
) -> impl FnMut(&str) -> Result<Option<String>, ConfigError> + 'a
where
    F: FnMut(&str) -> Result<Option<String>, ConfigError> + 'a,
{
    move |key| match host {
        Some(host) if key == "DOCKER_HOST" => Ok(Some(host.to_string())),
        _ => lookup(key),
    }
}
