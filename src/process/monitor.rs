//! One enforcement pass over the process table.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::critical::is_critical;
use super::events::{BlockedEvent, RecentBlocks};
use super::{ProcessInfo, ProcessSource};
use crate::error::{GuardError, GuardResult};
use crate::policy::EnforcementPlan;

pub struct ProcessMonitor {
    source: Arc<dyn ProcessSource>,
    own_pid: u32,
    kill_retry_backoff: Duration,
    /// Lowercased name -> time of the last failed termination
    failures: Mutex<HashMap<String, Instant>>,
    recent: RecentBlocks,
    blocked_count: AtomicU64,
}

impl ProcessMonitor {
    pub fn new(source: Arc<dyn ProcessSource>, kill_retry_backoff: Duration, capacity: usize) -> Self {
        Self {
            source,
            own_pid: std::process::id(),
            kill_retry_backoff,
            failures: Mutex::new(HashMap::new()),
            recent: RecentBlocks::new(capacity),
            blocked_count: AtomicU64::new(0),
        }
    }

    /// Never touched regardless of policy
    fn is_exempt(&self, process: &ProcessInfo) -> bool {
        process.pid <= 1 || process.pid == self.own_pid || is_critical(&process.name)
    }

    /// Terminate every running process `plan` blocks; returns what was killed
    pub fn tick(&self, plan: &EnforcementPlan) -> GuardResult<Vec<BlockedEvent>> {
        if !plan.active || plan.processes.is_empty() {
            return Ok(Vec::new());
        }

        let processes = self.source.list()?;
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.retain(|_, failed_at| now.duration_since(*failed_at) < self.kill_retry_backoff);

        let mut killed = Vec::new();
        for process in processes {
            if self.is_exempt(&process) || !plan.blocks_process(&process.name) {
                continue;
            }

            let key = process.name.to_lowercase();
            if failures.contains_key(&key) {
                debug!("Skipping {} until retry backoff elapses", process.name);
                continue;
            }

            match self.source.terminate(process.pid) {
                Ok(()) => {
                    info!("Blocked process: {} (PID: {})", process.name, process.pid);
                    let event = BlockedEvent {
                        pid: process.pid,
                        process_name: process.name,
                        timestamp: Utc::now(),
                    };
                    self.recent.push(event.clone());
                    self.blocked_count.fetch_add(1, Ordering::Relaxed);
                    killed.push(event);
                }
                Err(GuardError::NotFound(_)) => {
                    debug!("{} (PID: {}) exited before termination", process.name, process.pid);
                }
                Err(e) => {
                    warn!("Failed to terminate {}: {}", process.name, e);
                    failures.insert(key, now);
                }
            }
        }

        Ok(killed)
    }

    /// Distinct names of running processes that could be blocked
    pub fn running_process_names(&self) -> GuardResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .source
            .list()?
            .into_iter()
            .filter(|p| !self.is_exempt(p) && !p.name.trim().is_empty())
            .map(|p| p.name.to_lowercase())
            .collect();
        Ok(names.into_iter().collect())
    }

    pub fn recent_blocks(&self, limit: Option<usize>) -> Vec<BlockedEvent> {
        self.recent.recent(limit)
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count.load(Ordering::Relaxed)
    }
}
