use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "coordinator.yaml";
pub const DEFAULT_COORDINATOR_URL: &str = "http://127.0.0.1:3000";

pub fn tempo_root(home: &Path) -> PathBuf {
    home.join(".tempo")
}

pub fn config_path(home: &Path) -> PathBuf {
    tempo_root(home).join(CONFIG_FILE)
}
