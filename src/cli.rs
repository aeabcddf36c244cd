//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running a fixture container until interrupted (`run`)
//! - Checking the engine is reachable (`check`)

use std::sync::Arc;

use anyhow::Context;
use clap::{ColorChoice, Parser, Subcommand};
use serde::Serialize;

use dockfix::{
    Container, ContainerConfiguration, DockerEngine, EngineClient, FixtureSettings, ServiceAddress,
};

#[derive(Parser, Debug)]
#[command(name = "dockfix")]
#[command(about = "Run disposable Docker containers as test fixtures")]
#[command(
    long_about = "dockfix starts a container, publishes its ports and prints where to reach them.\nExamples:\n  dockfix run redis:7 -p 6379  # Start Redis until Ctrl-C\n  dockfix check  # Verify the engine is reachable"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Engine endpoint, overrides DOCKER_HOST
    #[arg(long, global = true, env = "DOCKER_HOST")]
    pub host: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a container and keep it running until Ctrl-C
    Run(RunArgs),

    /// Ping the engine and print the endpoint in use
    Check,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Image reference, e.g. `redis:7` or `nginx`
    pub image: String,

    /// Container port to publish (repeatable)
    #[arg(short = 'p', long = "port")]
    pub ports: Vec<u16>,

    /// Environment variable as KEY=VALUE (repeatable)
    #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Print addresses as JSON
    #[arg(long)]
    pub json: bool,

    /// Command to run instead of the image default
    #[arg(last = true)]
    pub command: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    id: Option<&'a str>,
    name: &'a str,
    image: String,
    addresses: Vec<PortReport>,
}

#[derive(Debug, Serialize)]
struct PortReport {
    container_port: u16,
    #[serde(flatten)]
    address: ServiceAddress,
}

/// Resolve settings, letting `--host` win over the environment.
pub fn resolve_settings(cli: &Cli) -> anyhow::Result<FixtureSettings> {
    FixtureSettings::resolve_with_host(cli.host.as_deref()).context("invalid configuration")
}

fn connect(settings: &FixtureSettings) -> anyhow::Result<Arc<DockerEngine>> {
    let engine = DockerEngine::connect(settings.endpoint.clone(), settings.engine_timeout)
        .with_context(|| format!("cannot connect to {}", settings.endpoint))?;
    Ok(Arc::new(engine))
}

pub async fn run_check_command(settings: &FixtureSettings) -> anyhow::Result<()> {
    let engine = connect(settings)?;
    engine
        .ping()
        .await
        .with_context(|| format!("engine at {} did not respond", settings.endpoint))?;
    println!("Engine reachable at {}", engine.endpoint());
    Ok(())
}

pub async fn run_fixture_command(args: RunArgs, settings: &FixtureSettings) -> anyhow::Result<()> {
    let configuration = ContainerConfiguration::builder()
        .with_image(&args.image)
        .with_exposed_ports(args.ports.iter().copied())
        .with_environment(args.env.clone())
        .with_command(args.command.clone())
        .build()?;

    let engine = connect(settings)?;
    let mut container = Container::new(engine, configuration).with_settings(settings);

    if let Err(e) = container.start().await {
        // Clean up whatever the engine created before failing.
        if let Err(stop_err) = container.stop().await {
            tracing::warn!("Cleanup after failed start also failed: {}", stop_err);
        }
        return Err(e.into());
    }

    let outcome = report(&container, &args).await;

    container.stop().await?;
    outcome
}

async fn report(container: &Container, args: &RunArgs) -> anyhow::Result<()> {
    let mut addresses = Vec::with_capacity(args.ports.len());
    for port in container.configuration().exposed_ports() {
        addresses.push(PortReport {
            container_port: *port,
            address: container.resolve_address(*port)?,
        });
    }

    if args.json {
        let report = RunReport {
            id: container.container_id(),
            name: container.handle().name(),
            image: container.configuration().image_reference(),
            addresses,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} running as {}",
            container.configuration().image_reference(),
            container.handle().name()
        );
        for entry in &addresses {
            println!("  {} -> {}", entry.container_port, entry.address);
        }
        println!("Press Ctrl-C to stop and remove the container.");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "dockfix", "run", "redis:7", "-p", "6379", "-e", "A=1", "-e", "B=x=y", "--json", "--",
            "redis-server", "--appendonly", "yes",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.image, "redis:7");
        assert_eq!(args.ports, vec![6379]);
        assert_eq!(
            args.env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string())
            ]
        );
        assert!(args.json);
        assert_eq!(args.command, vec!["redis-server", "--appendonly", "yes"]);
    }

    #[test]
    fn test_rejects_bad_env_pair() {
        assert!(parse_env_pair("NOVALUE").is_err());
        assert!(parse_env_pair("=1").is_err());
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
    }

    #[test]
    fn test_check_subcommand() {
        let cli = Cli::try_parse_from(["dockfix", "check"]).unwrap();
        assert!(matches!(cli.command, Command::Check));
    }
}
