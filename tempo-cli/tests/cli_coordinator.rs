use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn tempo_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tempo"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("TEMPO_COORDINATOR")
        .env_remove("TEMPO_CONFIG");
    cmd
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port()
}

/// Coordinator child process, killed on drop.
struct RunningCoordinator {
    child: Child,
    url: String,
}

impl Drop for RunningCoordinator {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_coordinator(home: &TempDir) -> RunningCoordinator {
    let port = free_port();
    let child = tempo_cmd(home.path())
        .args([
            "coordinator",
            "start",
            "--bind",
            &format!("127.0.0.1:{port}"),
            "--reference",
            "system",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coordinator");

    let deadline = Instant::now() + Duration::from_secs(20);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "coordinator did not start");
        sleep(Duration::from_millis(100));
    }
    RunningCoordinator {
        child,
        url: format!("http://127.0.0.1:{port}"),
    }
}

#[test]
fn config_prints_file_values_with_flag_overrides() {
    let home = TempDir::new().expect("home");
    fs::create_dir_all(home.path().join(".tempo")).expect("mkdir");
    fs::write(
        home.path().join(".tempo/coordinator.yaml"),
        "launch_host: 10.1.2.3\nauto_sync_interval_secs: 45\n",
    )
    .expect("write config");

    tempo_cmd(home.path())
        .args(["coordinator", "config", "--ports", "7000-7099"])
        .assert()
        .success()
        .stdout(contains("launch_host: 10.1.2.3"))
        .stdout(contains("auto_sync_interval_secs: 45"))
        .stdout(contains("min: 7000"))
        .stdout(contains("max: 7099"));
}

#[test]
fn config_rejects_inverted_port_range() {
    let home = TempDir::new().expect("home");
    tempo_cmd(home.path())
        .args(["coordinator", "config", "--ports", "7099-7000"])
        .assert()
        .failure()
        .stderr(contains("is empty"));
}

#[test]
fn client_commands_report_unreachable_coordinator() {
    let home = TempDir::new().expect("home");
    let url = format!("http://127.0.0.1:{}", free_port());

    tempo_cmd(home.path())
        .args(["list", "--coordinator", &url])
        .assert()
        .failure()
        .stderr(contains("not reachable"));
}

#[test]
fn empty_fleet_round_trip_through_running_coordinator() {
    let home = TempDir::new().expect("home");
    let coordinator = start_coordinator(&home);

    tempo_cmd(home.path())
        .args(["list", "--coordinator", &coordinator.url])
        .assert()
        .success()
        .stdout(contains("No instances registered"));

    tempo_cmd(home.path())
        .args(["list", "--json"])
        .env("TEMPO_COORDINATOR", &coordinator.url)
        .assert()
        .success()
        .stdout(contains("[]"));

    tempo_cmd(home.path())
        .args(["sync", "--coordinator", &coordinator.url])
        .assert()
        .failure()
        .stderr(contains("no_reachable_instances"));

    tempo_cmd(home.path())
        .args(["worldtime", "--coordinator", &coordinator.url])
        .assert()
        .success()
        .stdout(contains("T"));

    tempo_cmd(home.path())
        .args(["logs", "--coordinator", &coordinator.url, "--lines", "0"])
        .assert()
        .success()
        .stdout(contains("Coordinator running at"))
        .stdout(contains("POST /sync-clocks"))
        .stdout(contains("aborted: no reachable instances"));
}

#[test]
fn failed_launch_is_reported_and_registers_nothing() {
    let home = TempDir::new().expect("home");
    fs::create_dir_all(home.path().join(".tempo")).expect("mkdir");
    fs::write(
        home.path().join(".tempo/coordinator.yaml"),
        "launcher:\n  kind: local\n  program: /nonexistent/tempo-instance-binary\n",
    )
    .expect("write config");
    let coordinator = start_coordinator(&home);

    tempo_cmd(home.path())
        .args(["launch", "--coordinator", &coordinator.url])
        .assert()
        .failure()
        .stderr(contains("launch_failed"));

    tempo_cmd(home.path())
        .args(["list", "--coordinator", &coordinator.url])
        .assert()
        .success()
        .stdout(contains("No instances registered"));
}
