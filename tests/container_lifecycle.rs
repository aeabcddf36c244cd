//! Container lifecycle tests against the in-memory engine.
//!
//! Every test drives a real `Container` through `StubEngine`, so the full
//! pull / create / start / poll / stop / remove sequence runs without a
//! Docker daemon. Timing-sensitive tests run on paused tokio time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;

use dockfix::container::{FIXTURE_LABEL, FnProbe, ProbeError};
use dockfix::error::{EngineError, StartupStage};
use dockfix::testing::{FIRST_HOST_PORT, StubEngine};
use dockfix::{
    Container, ContainerConfiguration, EngineEndpoint, FixtureError, HostResolver, LifecycleState,
    RetryPolicy,
};

fn configuration(image: &str, ports: &[u16]) -> ContainerConfiguration {
    ContainerConfiguration::builder()
        .with_image(image)
        .with_exposed_ports(ports.iter().copied())
        .build()
        .unwrap()
}

fn container(engine: &Arc<StubEngine>, image: &str, ports: &[u16]) -> Container {
    Container::new(engine.clone(), configuration(image, ports))
        .with_resolver(HostResolver::with_detector(|| false))
}

fn policy(deadline_ms: u64, interval_ms: u64) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(deadline_ms),
        Duration::from_millis(interval_ms),
    )
    .unwrap()
}

// ── Before start ───────────────────────────────────────────────────────────

#[test]
fn image_without_tag_defaults_to_latest() {
    let config = configuration("redis", &[6379]);
    assert_eq!(config.image_name(), "redis");
    assert_eq!(config.tag(), "latest");
}

#[test]
fn empty_image_is_rejected() {
    for image in [None, Some(""), Some("   ")] {
        let err = ContainerConfiguration::builder()
            .with_optional_image(image)
            .build()
            .unwrap_err();
        assert!(
            matches!(err, FixtureError::InvalidConfiguration { .. }),
            "{image:?} gave {err:?}"
        );
    }
}

#[test]
fn state_is_unknown_before_start() {
    let engine = Arc::new(StubEngine::new());
    let fixture = container(&engine, "alpine:3.7", &[]);

    assert_eq!(fixture.state(), LifecycleState::Unknown);
    assert!(fixture.container_id().is_none());
    assert!(fixture.inspection().is_none());
    assert!(!fixture.is_running());
}

#[test]
fn stop_without_start_is_a_no_op() {
    tokio_test::block_on(async {
        let engine = Arc::new(StubEngine::new());
        let mut fixture = container(&engine, "alpine:3.7", &[]);

        fixture.stop().await.unwrap();

        assert_eq!(fixture.state(), LifecycleState::Unknown);
        assert!(engine.call_log().is_empty());
    });
}

#[test]
fn resolve_before_start_reports_not_ready() {
    let engine = Arc::new(StubEngine::new());
    let fixture = container(&engine, "redis", &[6379]);

    assert!(matches!(
        fixture.resolve_address(6379),
        Err(FixtureError::NotReady)
    ));
    assert!(matches!(
        fixture.resolve_address(80),
        Err(FixtureError::PortNotExposed { port: 80 })
    ));
}

// ── Successful start ───────────────────────────────────────────────────────

#[tokio::test]
async fn start_publishes_and_resolves_remapped_port() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "redis:latest", &[6379]);

    fixture.start().await.unwrap();

    assert_eq!(fixture.state(), LifecycleState::Running);
    assert!(fixture.is_running());
    assert_eq!(engine.running_containers(), 1);

    let address = fixture.resolve_address(6379).unwrap();
    assert_eq!(address.host, "localhost");
    assert_eq!(address.port, FIRST_HOST_PORT);
    assert_ne!(address.port, 6379);
    assert_eq!(
        fixture.connection_string(6379).unwrap(),
        format!("localhost:{FIRST_HOST_PORT}")
    );

    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn start_follows_pull_create_start_inspect_order() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);

    fixture.start().await.unwrap();
    fixture.stop().await.unwrap();

    assert_eq!(
        engine.call_log(),
        vec![
            "pull_image",
            "create_container",
            "start_container",
            "inspect_container",
            "stop_container",
            "remove_container",
        ]
    );
}

#[tokio::test]
async fn create_request_carries_configuration() {
    let engine = Arc::new(StubEngine::new());
    let config = ContainerConfiguration::builder()
        .with_image("postgres:16")
        .with_exposed_ports([5432])
        .with_env("POSTGRES_PASSWORD", "secret")
        .with_command(["postgres", "-c", "fsync=off"])
        .build()
        .unwrap();
    let mut fixture = Container::new(engine.clone(), config).with_name("pg-fixture");

    fixture.start().await.unwrap();

    let requests = engine.create_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.name.as_deref(), Some("pg-fixture"));
    assert_eq!(request.image_reference(), "postgres:16");
    assert_eq!(request.env, vec!["POSTGRES_PASSWORD=secret".to_string()]);
    assert_eq!(request.exposed_ports, vec![5432]);
    assert_eq!(request.cmd, vec!["postgres", "-c", "fsync=off"]);
    assert!(request.publish_all_ports);
    assert!(
        request
            .labels
            .iter()
            .any(|(k, v)| k == FIXTURE_LABEL && v == "true")
    );

    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn generated_names_are_unique() {
    let engine = Arc::new(StubEngine::new());
    let a = container(&engine, "alpine", &[]);
    let b = container(&engine, "alpine", &[]);

    assert!(a.handle().name().starts_with("dockfix-"));
    assert_ne!(a.handle().name(), b.handle().name());
}

#[tokio::test]
async fn network_endpoint_host_is_used_for_addresses() {
    let endpoint = EngineEndpoint::parse("tcp://10.0.0.5:2375").unwrap();
    let engine = Arc::new(StubEngine::new().with_endpoint(endpoint));
    let mut fixture = Container::new(engine.clone(), configuration("nginx", &[80]))
        .with_resolver(HostResolver::with_detector(|| true));

    fixture.start().await.unwrap();

    assert_eq!(fixture.resolve_address(80).unwrap().host, "10.0.0.5");
    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn local_socket_inside_container_uses_gateway() {
    let engine = Arc::new(StubEngine::new().with_gateway(Some("172.18.0.1")));
    let mut fixture = Container::new(engine.clone(), configuration("nginx", &[80]))
        .with_resolver(HostResolver::with_detector(|| true));

    fixture.start().await.unwrap();

    assert_eq!(fixture.resolve_address(80).unwrap().host, "172.18.0.1");
    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn unexposed_port_is_rejected_after_start() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();

    assert!(matches!(
        fixture.resolve_address(443),
        Err(FixtureError::PortNotExposed { port: 443 })
    ));
    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn container_without_ports_starts_and_has_nothing_to_resolve() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "alpine:3.7", &[]);

    fixture.start().await.unwrap();

    assert!(matches!(
        fixture.resolve_address(80),
        Err(FixtureError::PortNotExposed { port: 80 })
    ));
    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn second_start_is_rejected() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();

    let err = fixture.start().await.unwrap_err();
    assert!(matches!(
        err,
        FixtureError::InvalidState {
            operation: "start",
            state: LifecycleState::Running
        }
    ));
    assert_eq!(engine.calls("create_container"), 1);
    fixture.stop().await.unwrap();
}

#[tokio::test]
async fn log_streaming_subscribes_once_started() {
    let engine = Arc::new(StubEngine::new().with_log_lines(&["Ready to accept connections"]));
    let mut fixture = container(&engine, "redis", &[6379]).with_log_streaming(true);

    fixture.start().await.unwrap();

    assert_eq!(engine.calls("stream_logs"), 1);
    fixture.stop().await.unwrap();
}

// ── Readiness polling ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn keeps_polling_until_bindings_appear() {
    let engine = Arc::new(StubEngine::new().with_binding_delay(3));
    let mut fixture =
        container(&engine, "redis", &[6379]).with_readiness_policy(policy(10_000, 500));

    let started = Instant::now();
    fixture.start().await.unwrap();

    assert_eq!(engine.calls("inspect_container"), 4);
    assert_eq!(started.elapsed(), Duration::from_millis(1_500));
    assert_eq!(fixture.resolve_address(6379).unwrap().port, FIRST_HOST_PORT);
    fixture.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn inspect_error_fails_start_without_waiting() {
    let engine = Arc::new(StubEngine::new());
    engine.fail_inspections(1_000_000);
    let mut fixture = container(&engine, "redis", &[6379]);

    let started = Instant::now();
    let err = fixture.start().await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(engine.calls("inspect_container"), 1);
    assert!(!err.is_readiness_timeout(), "unexpected {err:?}");
    assert!(matches!(
        err,
        FixtureError::StartupFailed {
            stage: StartupStage::WaitForRunning,
            container_id: Some(_),
            ..
        }
    ));
    assert!(matches!(
        err.root(),
        FixtureError::Engine {
            operation: "inspect_container",
            source: EngineError::Transport(_),
            ..
        }
    ));
    assert_eq!(fixture.state(), LifecycleState::Failed);
    fixture.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn never_running_container_times_out_within_bounds() {
    let engine = Arc::new(StubEngine::new().never_running());
    let mut fixture =
        container(&engine, "redis", &[6379]).with_readiness_policy(policy(1_000, 300));

    let started = Instant::now();
    let err = fixture.start().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_readiness_timeout(), "unexpected {err:?}");
    assert!(matches!(
        err,
        FixtureError::StartupFailed {
            stage: StartupStage::WaitForRunning,
            container_id: Some(_),
            ..
        }
    ));
    assert!(elapsed >= Duration::from_millis(1_000), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1_300), "{elapsed:?}");
    assert_eq!(fixture.state(), LifecycleState::Failed);

    // The created container is still cleaned up by stop().
    let id = fixture.container_id().unwrap().to_string();
    fixture.stop().await.unwrap();
    assert!(!engine.container_exists(&id));
}

#[tokio::test(start_paused = true)]
async fn vanished_container_fails_without_waiting() {
    let engine = Arc::new(StubEngine::new().never_running());
    let mut fixture = container(&engine, "redis", &[6379]);

    // Remove the container once it has been created so the first inspect 404s.
    let engine_for_task = engine.clone();
    let watcher = tokio::spawn(async move {
        while engine_for_task.calls("start_container") == 0 {
            tokio::task::yield_now().await;
        }
        let id = format!("{:064x}", 1);
        engine_for_task.vanish(&id);
    });

    let started = Instant::now();
    let err = fixture.start().await.unwrap_err();
    watcher.await.unwrap();

    assert!(!err.is_readiness_timeout(), "unexpected {err:?}");
    assert!(started.elapsed() < RetryPolicy::ENGINE_DEADLINE);
}

// ── Startup failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_image_fails_fast_with_engine_error() {
    let engine = Arc::new(StubEngine::new().with_missing_image("does-not-exist:latest"));
    let mut fixture = container(&engine, "does-not-exist", &[80]);

    let started = Instant::now();
    let err = fixture.start().await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(matches!(
        err,
        FixtureError::StartupFailed {
            stage: StartupStage::PullImage,
            container_id: None,
            ..
        }
    ));
    assert!(matches!(
        err.root(),
        FixtureError::Engine {
            operation: "pull_image",
            source: EngineError::NotFound { .. },
            ..
        }
    ));
    assert_eq!(engine.calls("create_container"), 0);
    assert_eq!(fixture.state(), LifecycleState::Failed);

    // Nothing was created, so there is nothing to tear down.
    fixture.stop().await.unwrap();
    assert_eq!(engine.calls("remove_container"), 0);
}

#[tokio::test]
async fn start_failure_leaves_container_for_cleanup() {
    let engine = Arc::new(StubEngine::new());
    engine.set_fail_start(true);
    let mut fixture = container(&engine, "nginx", &[80]);

    let err = fixture.start().await.unwrap_err();

    assert!(matches!(
        err,
        FixtureError::StartupFailed {
            stage: StartupStage::StartContainer,
            container_id: Some(_),
            ..
        }
    ));
    let id = fixture.container_id().unwrap().to_string();
    assert!(engine.container_exists(&id));

    fixture.stop().await.unwrap();
    assert!(!engine.container_exists(&id));
    assert_eq!(fixture.state(), LifecycleState::Stopped);
}

// ── Service probes ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retryable_probe_failures_are_retried() {
    let engine = Arc::new(StubEngine::new());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let probe = FnProbe::new(6379, move |address| {
        let counter = counter.clone();
        Box::pin(async move {
            assert_eq!(address.port, FIRST_HOST_PORT);
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProbeError::Retryable("connection refused".to_string()))
            } else {
                Ok(())
            }
        })
    });
    let mut fixture = container(&engine, "redis", &[6379]).with_probe(probe);

    let started = Instant::now();
    fixture.start().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), RetryPolicy::SERVICE_INTERVAL * 2);
    assert_eq!(fixture.state(), LifecycleState::Running);
    fixture.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fatal_probe_failure_aborts_start() {
    let engine = Arc::new(StubEngine::new());
    let probe = FnProbe::new(6379, |_| {
        Box::pin(async { Err(ProbeError::Fatal("NOAUTH".to_string())) })
    });
    let mut fixture = container(&engine, "redis", &[6379]).with_probe(probe);

    let started = Instant::now();
    let err = fixture.start().await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(matches!(
        err,
        FixtureError::StartupFailed {
            stage: StartupStage::ServiceProbe,
            ..
        }
    ));
    assert!(matches!(err.root(), FixtureError::ProbeFailed { .. }));
    assert!(!fixture.is_running());
    fixture.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn probe_that_never_succeeds_times_out() {
    let engine = Arc::new(StubEngine::new());
    let probe = FnProbe::new(6379, |_| {
        Box::pin(async { Err(ProbeError::Retryable("connection reset".to_string())) })
    })
    .with_policy(policy(2_000, 500));
    let mut fixture = container(&engine, "redis", &[6379]).with_probe(probe);

    let err = fixture.start().await.unwrap_err();

    assert!(err.is_readiness_timeout(), "unexpected {err:?}");
    fixture.stop().await.unwrap();
}

// ── Teardown ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_tolerates_container_removed_externally() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();

    let id = fixture.container_id().unwrap().to_string();
    engine.vanish(&id);

    fixture.stop().await.unwrap();
    assert_eq!(fixture.state(), LifecycleState::Stopped);
    assert!(!fixture.inspection().unwrap().running);
}

#[tokio::test]
async fn remove_failure_is_reported_but_state_is_stopped() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();
    engine.set_fail_remove(true);

    let err = fixture.stop().await.unwrap_err();

    assert!(matches!(err, FixtureError::TeardownFailed { .. }));
    assert_eq!(fixture.state(), LifecycleState::Stopped);
    assert_eq!(engine.running_containers(), 0);
}

#[tokio::test]
async fn failed_removal_is_retried_by_next_stop() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();
    let id = fixture.container_id().unwrap().to_string();

    engine.set_fail_remove(true);
    assert!(matches!(
        fixture.stop().await,
        Err(FixtureError::TeardownFailed { .. })
    ));
    assert!(engine.container_exists(&id));
    assert!(!fixture.handle().is_removed());

    engine.set_fail_remove(false);
    fixture.stop().await.unwrap();

    assert!(!engine.container_exists(&id));
    assert!(fixture.handle().is_removed());
    assert_eq!(fixture.state(), LifecycleState::Stopped);
    assert_eq!(engine.calls("stop_container"), 1);
    assert_eq!(engine.calls("remove_container"), 2);
}

#[tokio::test]
async fn stop_twice_is_idempotent() {
    let engine = Arc::new(StubEngine::new());
    let mut fixture = container(&engine, "nginx", &[80]);
    fixture.start().await.unwrap();

    fixture.stop().await.unwrap();
    fixture.stop().await.unwrap();

    assert_eq!(engine.calls("stop_container"), 1);
    assert_eq!(engine.calls("remove_container"), 1);
    assert!(matches!(
        fixture.resolve_address(80),
        Err(FixtureError::NotReady)
    ));
}

// ── Concurrency ────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_containers_do_not_interfere() {
    let engine = Arc::new(StubEngine::new());
    let mut redis = container(&engine, "redis", &[6379]);
    let mut nginx = container(&engine, "nginx", &[80]);

    let (a, b) = tokio::join!(redis.start(), nginx.start());
    a.unwrap();
    b.unwrap();

    assert_ne!(redis.container_id(), nginx.container_id());
    let redis_port = redis.resolve_address(6379).unwrap().port;
    let nginx_port = nginx.resolve_address(80).unwrap().port;
    assert_ne!(redis_port, nginx_port);
    assert_eq!(engine.running_containers(), 2);

    redis.stop().await.unwrap();
    assert_eq!(engine.running_containers(), 1);
    assert!(nginx.is_running());
    assert_eq!(nginx.resolve_address(80).unwrap().port, nginx_port);

    nginx.stop().await.unwrap();
    assert_eq!(engine.running_containers(), 0);
}
