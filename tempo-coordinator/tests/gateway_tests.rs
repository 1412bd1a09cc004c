use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tempo_core::{EventLog, InstanceRegistry, PortRange, RegistryError};
use tempo_coordinator::{
    LaunchError, LauncherFailure, LauncherGateway, RemoteLauncher, SshDockerLauncher,
};

/// Succeeds unless the port is listed in `fail_on`; records every call.
/// `first_delay` holds back only the first call.
#[derive(Default)]
struct ScriptedLauncher {
    fail_on: HashSet<u16>,
    first_delay: Option<Duration>,
    calls: Mutex<Vec<(String, u16)>>,
}

#[async_trait]
impl RemoteLauncher for ScriptedLauncher {
    async fn launch(&self, host: &str, port: u16) -> Result<(), LauncherFailure> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((host.to_string(), port));
            calls.len() - 1
        };
        if let (0, Some(delay)) = (index, self.first_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.contains(&port) {
            return Err(LauncherFailure(format!("docker refused port {port}")));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn gateway(
    launcher: Arc<ScriptedLauncher>,
    ports: PortRange,
) -> (LauncherGateway, InstanceRegistry, EventLog) {
    let registry = InstanceRegistry::new();
    let events = EventLog::new(100);
    let gateway = LauncherGateway::new(
        registry.clone(),
        launcher,
        events.clone(),
        "10.0.0.7",
        ports,
        Duration::from_secs(1),
    );
    (gateway, registry, events)
}

#[tokio::test]
async fn successful_launch_registers_exactly_one_instance() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let (gateway, registry, events) = gateway(launcher.clone(), PortRange::new(5000, 6000));

    let instance = gateway.launch().await.expect("launch");

    assert_eq!(instance.host, "10.0.0.7");
    assert!(PortRange::new(5000, 6000).contains(instance.port));
    assert_eq!(registry.list(), vec![instance.clone()]);
    assert_eq!(launcher.calls.lock().as_slice(), &[("10.0.0.7".to_string(), instance.port)]);
    assert!(registry.reserved_ports().is_empty());
    assert!(events
        .snapshot()
        .iter()
        .any(|line| line.ends_with(&format!("Instance registered: 10.0.0.7:{}", instance.port))));
}

#[tokio::test]
async fn failed_launch_leaves_used_ports_unchanged() {
    let launcher = Arc::new(ScriptedLauncher {
        fail_on: (7000..=7001).collect(),
        ..Default::default()
    });
    let (gateway, registry, events) = gateway(launcher, PortRange::new(7000, 7001));

    for _ in 0..2 {
        let err = gateway.launch().await.unwrap_err();
        match err {
            LaunchError::LaunchFailed { host, port, reason } => {
                assert_eq!(host, "10.0.0.7");
                assert!((7000..=7001).contains(&port));
                assert!(reason.contains("docker refused"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    assert!(registry.is_empty());
    assert!(registry.used_ports().is_empty());
    assert!(registry.reserved_ports().is_empty());
    assert!(events
        .snapshot()
        .iter()
        .any(|line| line.contains("Error launching instance on 10.0.0.7:")));
}

#[tokio::test(start_paused = true)]
async fn slow_launcher_times_out_and_releases_port() {
    let launcher = Arc::new(ScriptedLauncher {
        first_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let (gateway, registry, _) = gateway(launcher, PortRange::new(5000, 5000));

    let err = gateway.launch().await.unwrap_err();
    assert!(
        matches!(&err, LaunchError::LaunchFailed { reason, .. } if reason.contains("timed out")),
        "got: {err}"
    );
    assert!(registry.used_ports().is_empty());
    assert!(registry.reserved_ports().is_empty());
}

#[tokio::test]
async fn exhausted_range_is_reported_without_calling_launcher() {
    let launcher = Arc::new(ScriptedLauncher::default());
    let (gateway, _registry, _) = gateway(launcher.clone(), PortRange::new(5000, 5000));

    gateway.launch().await.expect("first launch");
    let err = gateway.launch().await.unwrap_err();

    assert!(matches!(
        err,
        LaunchError::Registry(RegistryError::PortSpaceExhausted { .. })
    ));
    assert_eq!(launcher.calls.lock().len(), 1);
}

#[tokio::test]
async fn concurrent_launches_list_in_call_order() {
    let launcher = Arc::new(ScriptedLauncher {
        first_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let (gateway, registry, _) = gateway(launcher, PortRange::new(5000, 5999));

    // The first launch is held back longer so it completes last.
    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.launch().await })
    };
    tokio::task::yield_now().await;
    let mut rest = Vec::new();
    for _ in 0..4 {
        let gateway = gateway.clone();
        rest.push(tokio::spawn(async move { gateway.launch().await }));
    }

    let mut launched = Vec::new();
    for handle in rest {
        launched.push(handle.await.expect("join").expect("launch"));
    }
    assert_eq!(registry.len(), 4);
    let slowest = first.await.expect("join").expect("launch");
    launched.push(slowest.clone());

    let listed = registry.list();
    assert_eq!(listed.len(), 5);
    assert_eq!(listed[0], slowest);
    let seqs: Vec<u64> = listed.iter().map(|i| i.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    let ports: HashSet<u16> = launched.iter().map(|i| i.port).collect();
    assert_eq!(ports.len(), 5);
    assert_eq!(registry.used_ports().len(), 5);
}

/// Executable shell script standing in for `ssh`.
#[cfg(unix)]
fn fake_ssh(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ssh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_ssh_launch_is_killed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("container-started");
    let script = fake_ssh(dir.path(), &format!("sleep 1\ntouch {}", marker.display()));
    let launcher = SshDockerLauncher::new("u", "img").with_program(script.display().to_string());

    let registry = InstanceRegistry::new();
    let gateway = LauncherGateway::new(
        registry.clone(),
        Arc::new(launcher),
        EventLog::new(100),
        "10.0.0.7",
        PortRange::new(5000, 5010),
        Duration::from_millis(200),
    );

    let err = gateway.launch().await.unwrap_err();
    assert!(matches!(err, LaunchError::LaunchFailed { .. }), "got: {err}");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(
        !marker.exists(),
        "ssh process kept running after the launch was abandoned"
    );
    assert!(registry.is_empty());
    assert!(registry.used_ports().is_empty());
    assert!(registry.reserved_ports().is_empty());
}
