//! Launcher gateway: "start one instance on (host, port)" plus registration.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use tempo_core::{EventLog, Instance, InstanceRegistry, PortRange};

use crate::error::LaunchError;

/// Reason an external launch did not produce a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LauncherFailure(pub String);

/// Starts one instance process listening on `port` at `host`.
#[async_trait]
pub trait RemoteLauncher: Send + Sync {
    async fn launch(&self, host: &str, port: u16) -> Result<(), LauncherFailure>;

    fn describe(&self) -> String;
}

/// `ssh user@host sudo docker run ...` on the target machine.
#[derive(Debug, Clone)]
pub struct SshDockerLauncher {
    pub user: String,
    pub ssh_port: u16,
    pub image: String,
    pub identity_file: Option<PathBuf>,
    program: String,
}

impl SshDockerLauncher {
    pub fn new(user: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ssh_port: 22,
            image: image.into(),
            identity_file: None,
            program: "ssh".to_string(),
        }
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    pub fn with_identity_file(mut self, path: Option<PathBuf>) -> Self {
        self.identity_file = path;
        self
    }

    /// Use another binary in place of `ssh`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Remote command run on `host` to start the instance container.
    pub fn docker_command(&self, host: &str, port: u16) -> String {
        format!(
            "sudo docker run -d -p {port}:{port} --name tempo-{port} -e PORT={port} -e HOST_IP={host} {image}",
            image = self.image
        )
    }

    pub fn ssh_args(&self, host: &str, port: u16) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.ssh_port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", self.user, host));
        args.push(self.docker_command(host, port));
        args
    }
}

#[async_trait]
impl RemoteLauncher for SshDockerLauncher {
    async fn launch(&self, host: &str, port: u16) -> Result<(), LauncherFailure> {
        let output = Command::new(&self.program)
            .args(self.ssh_args(host, port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| LauncherFailure(format!("failed to run {}: {err}", self.program)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(LauncherFailure(if stderr.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            format!("{} exited with {}: {stderr}", self.program, output.status)
        }))
    }

    fn describe(&self) -> String {
        format!("ssh {}@<host> ({})", self.user, self.image)
    }
}

/// Child process on the coordinator's machine: `<program> <args..> --port PORT`.
#[derive(Debug, Clone)]
pub struct LocalProcessLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub ready_timeout: Duration,
}

impl LocalProcessLauncher {
    /// Launch `program instance start --port PORT`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["instance".to_string(), "start".to_string()],
            ready_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

#[async_trait]
impl RemoteLauncher for LocalProcessLauncher {
    async fn launch(&self, host: &str, port: u16) -> Result<(), LauncherFailure> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                LauncherFailure(format!("failed to spawn {}: {err}", self.program.display()))
            })?;
        let mut guard = ChildGuard::new(child);

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            match guard.try_wait() {
                Ok(Some(status)) => {
                    return Err(LauncherFailure(format!(
                        "instance process exited with {status} before accepting connections"
                    )))
                }
                Ok(None) => {}
                Err(err) => return Err(LauncherFailure(format!("failed to poll child: {err}"))),
            }

            if TcpStream::connect((host, port)).await.is_ok() {
                let pid = guard.disarm();
                tracing::debug!(port, pid, "local instance accepting connections");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LauncherFailure(format!(
                    "instance on port {port} not ready after {}ms",
                    self.ready_timeout.as_millis()
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn describe(&self) -> String {
        format!("local process {}", self.program.display())
    }
}

/// Kills the child when dropped unless disarmed. Covers early returns and a
/// launch future dropped by the gateway timeout or a disconnected caller.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Leave the process running. Returns its pid.
    fn disarm(&mut self) -> Option<u32> {
        self.child.take().and_then(|child| child.id())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "failed to kill unready instance process");
            }
        }
    }
}

/// Allocates a port, asks the launcher for a process there, and registers
/// the result. Registry state is untouched unless the launch succeeds.
#[derive(Clone)]
pub struct LauncherGateway {
    registry: InstanceRegistry,
    launcher: Arc<dyn RemoteLauncher>,
    events: EventLog,
    host: String,
    ports: PortRange,
    timeout: Duration,
}

impl LauncherGateway {
    pub fn new(
        registry: InstanceRegistry,
        launcher: Arc<dyn RemoteLauncher>,
        events: EventLog,
        host: impl Into<String>,
        ports: PortRange,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            launcher,
            events,
            host: host.into(),
            ports,
            timeout,
        }
    }

    pub async fn launch(&self) -> Result<Instance, LaunchError> {
        let reservation = match self.registry.allocate_port(self.ports) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.events
                    .record(format!("Error launching instance on {}: {err}", self.host));
                return Err(err.into());
            }
        };
        let port = reservation.port();
        self.events.record(format!(
            "Launching instance on {}:{port} via {}",
            self.host,
            self.launcher.describe()
        ));

        let outcome = tokio::time::timeout(self.timeout, self.launcher.launch(&self.host, port)).await;
        let reason = match outcome {
            Ok(Ok(())) => {
                return match self.registry.register_reserved(self.host.clone(), reservation) {
                    Ok(instance) => {
                        self.events
                            .record(format!("Instance registered: {}", instance.id()));
                        Ok(instance)
                    }
                    Err(err) => {
                        self.events.record(format!(
                            "Error registering instance {}:{port}: {err}",
                            self.host
                        ));
                        Err(err.into())
                    }
                };
            }
            Ok(Err(failure)) => failure.0,
            Err(_) => format!("launcher timed out after {}ms", self.timeout.as_millis()),
        };

        reservation.release();
        self.events.record(format!(
            "Error launching instance on {}:{port}: {reason}",
            self.host
        ));
        Err(LaunchError::LaunchFailed {
            host: self.host.clone(),
            port,
            reason,
        })
    }
}
