use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration, read from `daemon.toml`
///
/// Every section is optional; a missing file yields [`DaemonConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Process monitor loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between enforcement ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// A name whose termination failed is not retried before this many seconds
    #[serde(default = "default_kill_retry_backoff")]
    pub kill_retry_backoff_secs: u64,

    /// Capacity of the recent-blocks ring buffer
    #[serde(default = "default_recent_capacity")]
    pub recent_events_capacity: usize,

    /// Upper bound on one tick's blocking work
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,
}

/// Hosts-file and firewall settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_hosts_path")]
    pub hosts_path: PathBuf,

    /// Address blocked domains resolve to
    #[serde(default = "default_redirect_address")]
    pub redirect_address: String,

    /// Timeout for a whole apply/retract batch
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,

    /// Timeout for each firewall command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Install DoH egress firewall rules alongside the hosts section
    #[serde(default = "default_true")]
    pub firewall_enabled: bool,
}

/// Local IPC endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Holds policy.json, credentials.json and the applied-rules snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Service manager interaction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_kill_retry_backoff() -> u64 {
    30
}

fn default_recent_capacity() -> usize {
    100
}

fn default_tick_timeout() -> u64 {
    10
}

fn default_redirect_address() -> String {
    "0.0.0.0".to_string()
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10
}

fn default_operation_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            kill_retry_backoff_secs: default_kill_retry_backoff(),
            recent_events_capacity: default_recent_capacity(),
            tick_timeout_secs: default_tick_timeout(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hosts_path: default_hosts_path(),
            redirect_address: default_redirect_address(),
            apply_timeout_secs: default_apply_timeout(),
            command_timeout_secs: default_command_timeout(),
            firewall_enabled: true,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn kill_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.kill_retry_backoff_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

impl NetworkConfig {
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self).context("Failed to serialize config")?;

        crate::platform::common::atomic_write(path, toml.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        crate::platform::common::set_permissions_readable_all(path)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=60).contains(&self.monitor.poll_interval_secs) {
            anyhow::bail!(
                "Poll interval must be between 1 and 60 seconds (got: {})",
                self.monitor.poll_interval_secs
            );
        }

        if self.monitor.recent_events_capacity == 0 {
            anyhow::bail!("recent_events_capacity must be at least 1");
        }

        for (name, value) in [
            ("monitor.tick_timeout_secs", self.monitor.tick_timeout_secs),
            ("network.apply_timeout_secs", self.network.apply_timeout_secs),
            ("network.command_timeout_secs", self.network.command_timeout_secs),
            ("ipc.request_timeout_secs", self.ipc.request_timeout_secs),
            ("service.operation_timeout_secs", self.service.operation_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        let addr: IpAddr = self
            .network
            .redirect_address
            .parse()
            .with_context(|| {
                format!("Invalid redirect address: {}", self.network.redirect_address)
            })?;
        if !(addr.is_unspecified() || addr.is_loopback()) {
            anyhow::bail!(
                "Redirect address must be non-routable (0.0.0.0, ::, or loopback), got: {}",
                addr
            );
        }

        Ok(())
    }

    /// Path of the network snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage.data_dir.join("applied-rules.json")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.storage.data_dir.join("policy.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.storage.data_dir.join("credentials.json")
    }

    pub fn hosts_backup_path(&self) -> PathBuf {
        self.storage.data_dir.join("hosts.family-guard.bak")
    }
}

/// Get the platform-specific daemon config file path
pub fn get_config_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Application Support/family-guard/daemon.toml")
    }

    #[cfg(target_os = "windows")]
    {
        program_data().join("family-guard").join("daemon.toml")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/etc/family-guard/daemon.toml")
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Application Support/family-guard")
    }

    #[cfg(target_os = "windows")]
    {
        program_data().join("family-guard")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/var/lib/family-guard")
    }
}

fn default_socket_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        PathBuf::from(r"\\.\pipe\family-guard")
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/var/run/family-guard.sock")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/run/family-guard/family-guard.sock")
    }
}

fn default_hosts_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    }

    #[cfg(not(target_os = "windows"))]
    {
        PathBuf::from("/etc/hosts")
    }
}

#[cfg(target_os = "windows")]
fn program_data() -> PathBuf {
    PathBuf::from(std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".to_string()))
}
