use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::NetworkStatus;
use crate::policy::BlockingToggles;
use crate::schedule::ScheduleDecision;

/// Answer to `get_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub version: String,
    pub uptime_secs: u64,
    /// Processes terminated since the daemon started
    pub blocked_count: u64,
    pub blocking_active: bool,
    pub firewall_active: bool,
    pub hosts_active: bool,
    /// Set while the policy store is serving the safe default policy
    pub safe_mode: Option<String>,
    pub poll_interval_secs: u64,
    /// Upper bound on how long a committed policy change takes to be enforced
    pub staleness_bound_secs: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_network_error: Option<String>,
}

/// Answer to `get_blocking_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingStatus {
    pub active: bool,
    pub decision: ScheduleDecision,
    /// Names of schedules whose window contains now
    pub active_schedules: Vec<String>,
    pub toggles: BlockingToggles,
    pub blocked_processes: usize,
    pub blocked_domains: usize,
    pub network: NetworkStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_configured: bool,
}

/// Returned once by `setup_password`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResult {
    pub recovery_secret: String,
}
