//! What to run: image, exposed ports, environment and command.

use crate::error::{FixtureError, Result};

/// Tag used when an image reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// Immutable description of a fixture container.
///
/// Built through [`ContainerConfiguration::builder`]; a built value is never
/// mutated, so it can be handed to a [`Container`](crate::container::Container)
/// and kept elsewhere at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfiguration {
    image_name: String,
    tag: String,
    exposed_ports: Vec<u16>,
    env: Vec<(String, String)>,
    command: Vec<String>,
}

impl ContainerConfiguration {
    pub fn builder() -> ContainerConfigurationBuilder {
        ContainerConfigurationBuilder::default()
    }

    /// Shorthand for a configuration with only an image.
    pub fn for_image(image: &str) -> Result<Self> {
        Self::builder().with_image(image).build()
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `name:tag`.
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image_name, self.tag)
    }

    pub fn exposed_ports(&self) -> &[u16] {
        &self.exposed_ports
    }

    pub fn exposes(&self, port: u16) -> bool {
        self.exposed_ports.contains(&port)
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Environment in the engine's `KEY=VALUE` form.
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

impl std::fmt::Display for ContainerConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image_name, self.tag)
    }
}

/// Chainable builder for [`ContainerConfiguration`].
///
/// Each `with_*` call consumes the builder and returns a new one; clone the
/// builder to branch off variants.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfigurationBuilder {
    image: Option<(String, String)>,
    exposed_ports: Vec<u16>,
    env: Vec<(String, String)>,
    command: Vec<String>,
}

impl ContainerConfigurationBuilder {
    /// Set the image from a reference like `redis`, `redis:7` or
    /// `registry:5000/team/app:1.2`.
    pub fn with_image(self, reference: &str) -> Self {
        self.with_optional_image(Some(reference))
    }

    /// Like [`with_image`](Self::with_image) but accepts an absent reference,
    /// which `build()` rejects.
    pub fn with_optional_image(mut self, reference: Option<&str>) -> Self {
        self.image = reference.map(parse_image_reference);
        self
    }

    /// Replace the exposed container ports. Duplicates are dropped.
    pub fn with_exposed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.exposed_ports.clear();
        for port in ports {
            if !self.exposed_ports.contains(&port) {
                self.exposed_ports.push(port);
            }
        }
        self
    }

    /// Replace the environment.
    pub fn with_environment<K, V>(mut self, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Append one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Replace the command arguments.
    pub fn with_command<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<ContainerConfiguration> {
        let Some((image_name, tag)) = self.image else {
            return Err(FixtureError::InvalidConfiguration {
                reason: "image name is required".to_string(),
            });
        };
        if image_name.trim().is_empty() {
            return Err(FixtureError::InvalidConfiguration {
                reason: "image name cannot be empty or whitespace".to_string(),
            });
        }

        Ok(ContainerConfiguration {
            image_name,
            tag,
            exposed_ports: self.exposed_ports,
            env: self.env,
            command: self.command,
        })
    }
}

/// Split an image reference into (name, tag) on the last `:`.
///
/// A `:` followed by a `/` belongs to a registry host (`localhost:5000/app`)
/// and is not a tag separator. A missing or empty tag becomes `latest`.
pub fn parse_image_reference(reference: &str) -> (String, String) {
    let reference = reference.trim();
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => {
            let tag = &reference[idx + 1..];
            let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
            (reference[..idx].to_string(), tag.to_string())
        }
        _ => (reference.to_string(), DEFAULT_TAG.to_string()),
    }
}
