//! `tempo coordinator` — run the coordinator or show its effective config.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use tempo_coordinator::paths::config_path;
use tempo_coordinator::{start_blocking, CoordinatorConfig, LauncherConfig, ReferenceConfig};
use tempo_core::PortRange;
use tempo_sync::http::TIMEAPI_URL;

#[derive(Subcommand, Debug)]
pub enum CoordinatorCommand {
    /// Run the coordinator in the foreground.
    Start(OverrideArgs),
    /// Print the effective configuration as YAML.
    Config(OverrideArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReferenceArg {
    Timeapi,
    System,
}

/// Flags layered over `~/.tempo/coordinator.yaml`.
#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Config file (default: ~/.tempo/coordinator.yaml).
    #[arg(long, env = "TEMPO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3000.
    #[arg(long, env = "TEMPO_BIND")]
    pub bind: Option<String>,

    /// Host instances are launched on.
    #[arg(long, env = "TEMPO_LAUNCH_HOST")]
    pub launch_host: Option<String>,

    /// Inclusive port range, e.g. 5000-6000.
    #[arg(long, value_parser = parse_port_range)]
    pub ports: Option<PortRange>,

    /// Launch over ssh + docker as this user instead of locally.
    #[arg(long, env = "TEMPO_SSH_USER")]
    pub ssh_user: Option<String>,

    /// Docker image for ssh launches.
    #[arg(long, requires = "ssh_user")]
    pub image: Option<String>,

    #[arg(long, value_enum)]
    pub reference: Option<ReferenceArg>,

    /// Run a sync round every N seconds.
    #[arg(long, value_name = "SECS")]
    pub auto_sync: Option<u64>,
}

impl OverrideArgs {
    fn load(&self) -> Result<CoordinatorConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                config_path(&home)
            }
        };
        let config = CoordinatorConfig::load_at(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        self.apply(config)
    }

    fn apply(&self, mut config: CoordinatorConfig) -> Result<CoordinatorConfig> {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(host) = &self.launch_host {
            config.launch_host = host.clone();
        }
        if let Some(ports) = self.ports {
            config.ports = ports;
        }
        if let Some(user) = &self.ssh_user {
            let (ssh_port, image, identity_file) = match config.launcher {
                LauncherConfig::Ssh {
                    ssh_port,
                    image,
                    identity_file,
                    ..
                } => (ssh_port, image, identity_file),
                LauncherConfig::Local { .. } => (22, "tempo-instance".to_string(), None),
            };
            config.launcher = LauncherConfig::Ssh {
                user: user.clone(),
                ssh_port,
                image: self.image.clone().unwrap_or(image),
                identity_file,
            };
        }
        match self.reference {
            Some(ReferenceArg::System) => config.reference = ReferenceConfig::System,
            Some(ReferenceArg::Timeapi) if config.reference == ReferenceConfig::System => {
                config.reference = ReferenceConfig::Timeapi {
                    url: TIMEAPI_URL.to_string(),
                }
            }
            _ => {}
        }
        if let Some(secs) = self.auto_sync {
            config.auto_sync_interval_secs = Some(secs);
        }
        config.validate().context("invalid coordinator configuration")?;
        Ok(config)
    }
}

pub fn run(command: CoordinatorCommand) -> Result<()> {
    match command {
        CoordinatorCommand::Start(args) => {
            let config = args.load()?;
            start_blocking(config).context("coordinator exited with error")?;
        }
        CoordinatorCommand::Config(args) => {
            let config = args.load()?;
            print!("{}", config.to_yaml().context("failed to render config")?);
        }
    }
    Ok(())
}

fn parse_port_range(raw: &str) -> Result<PortRange> {
    let (min, max) = raw
        .split_once('-')
        .context("expected MIN-MAX, e.g. 5000-6000")?;
    let min: u16 = min.trim().parse().context("invalid lower port")?;
    let max: u16 = max.trim().parse().context("invalid upper port")?;
    if min > max {
        bail!("port range {min}-{max} is empty");
    }
    Ok(PortRange::new(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_parses_and_rejects_inverted() {
        assert_eq!(parse_port_range("5000-5010").unwrap(), PortRange::new(5000, 5010));
        assert!(parse_port_range("6000-5000").is_err());
        assert!(parse_port_range("6000").is_err());
    }

    #[test]
    fn ssh_user_switches_launcher_and_keeps_defaults_elsewhere() {
        let args = OverrideArgs {
            ssh_user: Some("ubuntu".to_string()),
            reference: Some(ReferenceArg::System),
            auto_sync: Some(30),
            ..Default::default()
        };
        let config = args.apply(CoordinatorConfig::default()).unwrap();

        assert_eq!(
            config.launcher,
            LauncherConfig::Ssh {
                user: "ubuntu".to_string(),
                ssh_port: 22,
                image: "tempo-instance".to_string(),
                identity_file: None,
            }
        );
        assert_eq!(config.reference, ReferenceConfig::System);
        assert_eq!(config.auto_sync_interval_secs, Some(30));
        assert_eq!(config.bind, CoordinatorConfig::default().bind);
    }
}
