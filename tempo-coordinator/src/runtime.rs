use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use tempo_core::{EventLog, Instance, InstanceRegistry};
use tempo_sync::http::{HttpInstanceClient, SystemReference, TimeApiReference};
use tempo_sync::{ClientError, InstanceClient, ReferenceClock, RoundReport, SyncEngine, SyncError};

use crate::api;
use crate::config::{CoordinatorConfig, LauncherConfig, ReferenceConfig};
use crate::error::{io_err, CoordinatorError, LaunchError};
use crate::launcher::{LauncherGateway, LocalProcessLauncher, RemoteLauncher, SshDockerLauncher};

/// One coordinator lifecycle: the registry, the launcher gateway, the sync
/// engine and the event log they all write to.
pub struct Coordinator {
    registry: InstanceRegistry,
    gateway: LauncherGateway,
    engine: SyncEngine,
    events: EventLog,
}

impl Coordinator {
    pub fn new(
        config: &CoordinatorConfig,
        launcher: Arc<dyn RemoteLauncher>,
        reference: Arc<dyn ReferenceClock>,
        client: Arc<dyn InstanceClient>,
    ) -> Self {
        let registry = InstanceRegistry::new();
        let events = EventLog::new(config.event_capacity);
        let gateway = LauncherGateway::new(
            registry.clone(),
            launcher,
            events.clone(),
            config.launch_host.clone(),
            config.ports,
            config.launch_timeout(),
        );
        let engine = SyncEngine::new(
            registry.clone(),
            reference,
            client,
            events.clone(),
            config.sync,
        );
        Self {
            registry,
            gateway,
            engine,
            events,
        }
    }

    /// Wire the HTTP collaborators named in `config`.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let launcher: Arc<dyn RemoteLauncher> = match &config.launcher {
            LauncherConfig::Ssh {
                user,
                ssh_port,
                image,
                identity_file,
            } => Arc::new(
                SshDockerLauncher::new(user.clone(), image.clone())
                    .with_ssh_port(*ssh_port)
                    .with_identity_file(identity_file.clone()),
            ),
            LauncherConfig::Local { program } => {
                let program = match program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe().map_err(|e| io_err("current executable", e))?,
                };
                Arc::new(
                    LocalProcessLauncher::new(program)
                        .with_ready_timeout(config.launch_timeout().mul_f64(0.9)),
                )
            }
        };
        let reference: Arc<dyn ReferenceClock> = match &config.reference {
            ReferenceConfig::Timeapi { url } => {
                Arc::new(TimeApiReference::new(url.clone(), config.sync.call_timeout))
            }
            ReferenceConfig::System => Arc::new(SystemReference),
        };
        let client = Arc::new(HttpInstanceClient::new(config.sync.call_timeout));
        Ok(Self::new(config, launcher, reference, client))
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub async fn launch(&self) -> Result<Instance, LaunchError> {
        self.gateway.launch().await
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.registry.list()
    }

    pub async fn sync_clocks(&self) -> Result<RoundReport, SyncError> {
        self.engine.run_round().await
    }

    pub fn logs(&self) -> Vec<String> {
        self.events.snapshot()
    }

    pub async fn world_time(&self) -> Result<DateTime<Utc>, ClientError> {
        self.engine.reference_time().await
    }
}

/// Start the coordinator runtime and block the current thread until it exits.
pub fn start_blocking(config: CoordinatorConfig) -> Result<(), CoordinatorError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the coordinator: HTTP façade, optional auto-sync, ctrl-c handling.
pub async fn run(config: CoordinatorConfig) -> Result<(), CoordinatorError> {
    config.validate()?;
    let coordinator = Arc::new(Coordinator::from_config(&config)?);
    let listener = TcpListener::bind(config.bind.as_str())
        .await
        .map_err(|e| io_err(format!("bind {}", config.bind), e))?;
    tracing::info!(
        bind = %config.bind,
        launch_host = %config.launch_host,
        ports = %config.ports,
        "coordinator listening"
    );
    coordinator
        .events()
        .record(format!("Coordinator running at {}", config.bind));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        let app = api::router(Arc::clone(&coordinator));
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .map_err(|e| io_err("http server", e));
            let _ = shutdown.send(());
            result
        })
    };

    let auto_sync_handle = {
        let shutdown = shutdown_tx.clone();
        let coordinator = Arc::clone(&coordinator);
        let every = config.auto_sync_interval();
        tokio::spawn(async move {
            match every {
                Some(every) => auto_sync_task(coordinator, every, shutdown.subscribe()).await,
                None => Ok(()),
            }
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down coordinator");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(CoordinatorError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (server_result, auto_sync_result, signal_result) =
        tokio::join!(server_handle, auto_sync_handle, signal_handle);

    handle_join("http_server", server_result)?;
    handle_join("auto_sync", auto_sync_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn auto_sync_task(
    coordinator: Arc<Coordinator>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoordinatorError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match coordinator.sync_clocks().await {
                    Ok(report) => tracing::info!(
                        round = report.round,
                        applied = report.applied_count(),
                        failures = report.failures.len(),
                        "auto-sync round finished"
                    ),
                    Err(SyncError::RoundInProgress) => {
                        tracing::debug!("auto-sync skipped, round already running");
                    }
                    Err(err) => tracing::warn!(error = %err, "auto-sync round failed"),
                }
            }
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), CoordinatorError>, tokio::task::JoinError>,
) -> Result<(), CoordinatorError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(CoordinatorError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

pub(crate) fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TEMPO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}
