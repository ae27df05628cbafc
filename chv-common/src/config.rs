//! Verifier configuration.
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! environment overrides read once at startup. CLI flags sit on top of all of
//! this in the `chv` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::humantime_serde;

/// Environment variable carrying the isolation-scope name.
pub const ENV_NAMESPACE: &str = "CHV_NAMESPACE";
/// Environment variable overriding the manifest directory.
pub const ENV_MANIFEST: &str = "CHV_MANIFEST";
/// Environment variable overriding the probe script directory.
pub const ENV_SCRIPT_DIR: &str = "CHV_SCRIPT_DIR";
/// Environment variable overriding the poll interval (humantime format).
pub const ENV_POLL_INTERVAL: &str = "CHV_POLL_INTERVAL";

/// Top-level verifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Isolation scope all orchestrator commands are confined to.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Directory holding the deployment manifest(s).
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// Directory holding the probe scripts.
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
    /// Orchestrator CLI binary.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    /// Hard per-command timeout for every shell-out.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Declared data-plane replica count.
    #[serde(default = "default_server_replicas")]
    pub server_replicas: u32,
    /// Declared coordinator replica count.
    #[serde(default = "default_coordinator_replicas")]
    pub coordinator_replicas: u32,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            manifest: default_manifest(),
            script_dir: default_script_dir(),
            kubectl: default_kubectl(),
            command_timeout: default_command_timeout(),
            server_replicas: default_server_replicas(),
            coordinator_replicas: default_coordinator_replicas(),
            engine: EngineConfig::default(),
        }
    }
}

/// Timing discipline of the scenario engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for the initial replication handshake and quorum formation.
    #[serde(default = "default_baseline_settle", with = "humantime_serde")]
    pub baseline_settle: Duration,
    /// Deadline for the namespace to drain after teardown.
    #[serde(default = "default_teardown_settle", with = "humantime_serde")]
    pub teardown_settle: Duration,
    /// Interval between convergence re-checks.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Backoff before the single data-plane response retry.
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline_settle: default_baseline_settle(),
            teardown_settle: default_teardown_settle(),
            poll_interval: default_poll_interval(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl VerifierConfig {
    /// Load from a TOML file, falling back to defaults for absent fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load from a file if one is given, then apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `CHV_*` environment overrides. Read once at startup; the
    /// namespace is never consulted from ambient state afterwards.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(namespace) = env_var(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(manifest) = env_var(ENV_MANIFEST) {
            self.manifest = PathBuf::from(manifest);
        }
        if let Some(script_dir) = env_var(ENV_SCRIPT_DIR) {
            self.script_dir = PathBuf::from(script_dir);
        }
        if let Some(raw) = env_var(ENV_POLL_INTERVAL) {
            self.engine.poll_interval = humantime::parse_duration(&raw)
                .map_err(|e| anyhow::anyhow!("invalid {ENV_POLL_INTERVAL} ({raw}): {e}"))?;
        }
        Ok(())
    }

    /// The declared cluster shape under this configuration.
    pub fn topology(&self) -> crate::types::ClusterTopology {
        crate::types::ClusterTopology::new(
            self.namespace.clone(),
            self.server_replicas,
            self.coordinator_replicas,
        )
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("./deploy")
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("./script")
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_server_replicas() -> u32 {
    3
}

fn default_coordinator_replicas() -> u32 {
    3
}

fn default_baseline_settle() -> Duration {
    Duration::from_secs(60)
}

fn default_teardown_settle() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}
