//! End-to-end integration tests
//! Run with: cargo test --test e2e -- --ignored (requires a local
//! Docker daemon and root privileges for iptables/tc)

use barricade::net::NetfilterEngine;
use barricade::orchestrator::Orchestrator;
use barricade::runtime::DockerCli;
use barricade::state::FileState;
use barricade::{ContainerSpec, ContainerStatus, Error, SessionConfig};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

const IMAGE: &str = "alpine:3.20";

type E2eOrchestrator = Orchestrator<DockerCli, NetfilterEngine, FileState>;

fn sleeper(name: &str) -> ContainerSpec {
    ContainerSpec::builder(name, IMAGE).command("sleep 300").build()
}

fn orchestrator(session: &str, state_dir: &TempDir, config: SessionConfig) -> E2eOrchestrator {
    Orchestrator::new(
        session,
        config.clone(),
        DockerCli::default(),
        NetfilterEngine::new(config.network_options()),
        FileState::new(state_dir.path(), session),
    )
}

fn three_sleepers() -> SessionConfig {
    SessionConfig::new()
        .add_container(sleeper("c1"))
        .add_container(sleeper("c2"))
        .add_container(sleeper("c3"))
}

#[test]
#[ignore] // Run manually: cargo test --test e2e -- --ignored
fn test_up_status_destroy() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-lifecycle", &dir, three_sleepers());

    let containers = orch.create(false, false).unwrap();
    assert_eq!(containers.len(), 3);
    for container in &containers {
        assert_eq!(container.status, ContainerStatus::Up);
        assert!(container.ip_address.is_some());
        assert!(container.device.is_some());
    }

    // a second create against the same session must refuse
    assert!(matches!(
        orch.create(false, false),
        Err(Error::AlreadyExists(_))
    ));

    let status = orch.status().unwrap();
    assert_eq!(status.len(), 3);

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_stop_start_cycle() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-cycle", &dir, three_sleepers());

    orch.create(false, false).unwrap();

    orch.stop(&["c2".to_string()]).unwrap();
    let down = orch
        .status()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "c2")
        .unwrap();
    assert_eq!(down.status, ContainerStatus::Down);

    // stopping again must report it as not running
    match orch.stop(&["c2".to_string()]) {
        Err(Error::NotRunning(names)) => assert_eq!(names, vec!["c2".to_string()]),
        other => panic!("expected NotRunning, got {other:?}"),
    }

    orch.start(&["c2".to_string()]).unwrap();
    let up = orch
        .status()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "c2")
        .unwrap();
    assert_eq!(up.status, ContainerStatus::Up);

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_kill_shows_down() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-kill", &dir, three_sleepers());

    orch.create(false, false).unwrap();
    orch.kill(&["c1".to_string()], None).unwrap();

    let killed = orch
        .status()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "c1")
        .unwrap();
    assert_eq!(killed.status, ContainerStatus::Down);

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_partition_and_join() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-part", &dir, three_sleepers());

    orch.create(false, false).unwrap();

    orch.partition(&[vec!["c1".to_string()]]).unwrap();
    let status = orch.status().unwrap();
    let tag = |name: &str| {
        status
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.partition)
    };
    assert_eq!(tag("c1"), Some(1));
    assert_eq!(tag("c2"), Some(2));
    assert_eq!(tag("c3"), Some(2));

    orch.join().unwrap();
    let rejoined = orch.status().unwrap();
    assert!(rejoined.iter().all(|c| c.partition.is_none()));

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_random_partition_respects_holy() {
    let config = SessionConfig::new()
        .add_container(sleeper("c1"))
        .add_container(sleeper("c2"))
        .add_container(
            ContainerSpec::builder("zk", IMAGE)
                .command("sleep 300")
                .holy(true)
                .build(),
        );

    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-random", &dir, config);
    orch.create(false, false).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let plan = orch.random_partition(&mut rng).unwrap();
    for group in &plan {
        assert!(!group.contains(&"zk".to_string()));
    }

    orch.join().unwrap();
    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_flaky_and_fast_toggle_network_state() {
    use barricade::NetworkState;

    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-netem", &dir, three_sleepers());

    orch.create(false, false).unwrap();

    orch.flaky(&["c1".to_string()]).unwrap();
    let flaky = orch
        .status()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "c1")
        .unwrap();
    assert_eq!(flaky.network_state, NetworkState::Flaky);

    orch.fast(&["c1".to_string()]).unwrap();
    let normal = orch
        .status()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "c1")
        .unwrap();
    assert_eq!(normal.network_state, NetworkState::Normal);

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_logs() {
    let config = SessionConfig::new().add_container(
        ContainerSpec::builder("echoer", IMAGE)
            .command("sh -c 'echo hello-from-e2e && sleep 300'")
            .build(),
    );

    let dir = TempDir::new().unwrap();
    let orch = orchestrator("e2e-logs", &dir, config);
    orch.create(false, false).unwrap();

    std::thread::sleep(std::time::Duration::from_secs(1));
    let logs = orch.logs("echoer").unwrap();
    assert!(logs.contains("hello-from-e2e"));

    orch.destroy().unwrap();
}

#[test]
#[ignore]
fn test_up_force_replaces_leftovers() {
    let dir = TempDir::new().unwrap();
    let config = SessionConfig::new().add_container(sleeper("c1"));

    let first = orchestrator("e2e-force", &dir, config.clone());
    first.create(false, false).unwrap();

    // simulate a stale session: containers alive, state lost
    let fresh_dir = TempDir::new().unwrap();
    let second = orchestrator("e2e-force", &fresh_dir, config);
    assert!(matches!(
        second.create(false, false),
        Err(Error::ContainerConflict(_))
    ));
    second.create(false, true).unwrap();

    second.destroy().unwrap();
}
