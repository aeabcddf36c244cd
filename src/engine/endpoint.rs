//! Engine endpoint discovery and parsing.
//!
//! The endpoint decides both how the engine client connects and which host a
//! test process must dial to reach published ports (see [`crate::host`]).

use std::sync::LazyLock;

use url::Url;

use crate::error::ConfigError;

#[cfg(windows)]
const LOCAL_DEFAULT: &str = "npipe:////./pipe/docker_engine";
#[cfg(not(windows))]
const LOCAL_DEFAULT: &str = "unix:///var/run/docker.sock";

static LOCAL_ENDPOINT: LazyLock<EngineEndpoint> = LazyLock::new(|| EngineEndpoint {
    scheme: EndpointScheme::local(),
    host: None,
    port: None,
    path: Some(local_path(LOCAL_DEFAULT).to_string()),
    raw: LOCAL_DEFAULT.to_string(),
});

/// Connection scheme of an engine endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScheme {
    /// Unix domain socket.
    Unix,
    /// Windows named pipe.
    NamedPipe,
    /// Plain TCP (`tcp://host:port`).
    Tcp,
    /// HTTP.
    Http,
    /// HTTPS.
    Https,
}

impl EndpointScheme {
    fn local() -> Self {
        if cfg!(windows) {
            EndpointScheme::NamedPipe
        } else {
            EndpointScheme::Unix
        }
    }

    /// Returns true for local-socket schemes (unix socket, named pipe).
    pub fn is_local_socket(&self) -> bool {
        matches!(self, EndpointScheme::Unix | EndpointScheme::NamedPipe)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointScheme::Unix => "unix",
            EndpointScheme::NamedPipe => "npipe",
            EndpointScheme::Tcp => "tcp",
            EndpointScheme::Http => "http",
            EndpointScheme::Https => "https",
        }
    }
}

impl std::fmt::Display for EndpointScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed container engine endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    scheme: EndpointScheme,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    raw: String,
}

impl EngineEndpoint {
    /// The platform's local engine socket, computed once per process.
    pub fn local_default() -> Self {
        LOCAL_ENDPOINT.clone()
    }

    /// Parse an endpoint such as `unix:///var/run/docker.sock`,
    /// `npipe:////./pipe/docker_engine` or `tcp://10.0.0.5:2375`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match url.scheme() {
            "unix" => EndpointScheme::Unix,
            "npipe" => EndpointScheme::NamedPipe,
            "tcp" => EndpointScheme::Tcp,
            "http" => EndpointScheme::Http,
            "https" => EndpointScheme::Https,
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        };

        if scheme.is_local_socket() {
            let path = local_path(raw);
            if path.is_empty() {
                return Err(invalid("missing socket path"));
            }
            return Ok(Self {
                scheme,
                host: None,
                port: None,
                path: Some(path.to_string()),
                raw: raw.to_string(),
            });
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;

        Ok(Self {
            scheme,
            host: Some(host.trim_matches(|c| c == '[' || c == ']').to_string()),
            port: url.port(),
            path: None,
            raw: raw.to_string(),
        })
    }

    pub fn scheme(&self) -> EndpointScheme {
        self.scheme
    }

    /// Host component for network endpoints; `None` for local sockets.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Socket or pipe path for local endpoints.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Address in the form bollard's HTTP connector expects (`host:port`).
    pub(crate) fn http_address(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let port = self.port.unwrap_or(match self.scheme {
            EndpointScheme::Https => 2376,
            _ => 2375,
        });
        Some(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Strip `scheme://` from a local socket endpoint, leaving the path.
fn local_path(raw: &str) -> &str {
    raw.split_once("://").map(|(_, rest)| rest).unwrap_or("")
}
