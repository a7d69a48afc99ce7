//! Running-process enumeration and termination.

pub mod critical;
pub mod events;
pub mod monitor;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::{GuardError, GuardResult};

pub use events::{BlockedEvent, RecentBlocks};
pub use monitor::ProcessMonitor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// OS process table access
pub trait ProcessSource: Send + Sync {
    fn list(&self) -> GuardResult<Vec<ProcessInfo>>;

    /// Terminate `pid`; `NotFound` if it already exited
    fn terminate(&self, pid: u32) -> GuardResult<()>;
}

/// [`ProcessSource`] backed by `sysinfo`
pub struct SystemProcessSource {
    system: Mutex<System>,
}

impl SystemProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SystemProcessSource {
    fn list(&self) -> GuardResult<Vec<ProcessInfo>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_all();

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect())
    }

    fn terminate(&self, raw_pid: u32) -> GuardResult<()> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(raw_pid);
        let process = system
            .process(pid)
            .ok_or_else(|| GuardError::NotFound(format!("process {raw_pid}")))?;

        let name = process.name().to_string_lossy().into_owned();
        debug!("Sending kill to {} ({})", name, raw_pid);
        if process.kill() {
            return Ok(());
        }

        // The table is from the last scan; a process that exited since is not a failure
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if system.process(pid).is_none() {
            return Err(GuardError::NotFound(format!("process {raw_pid}")));
        }
        Err(GuardError::Platform(format!(
            "could not terminate {} (pid {})",
            name, raw_pid
        )))
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashSet;

    /// In-memory process table; terminated processes disappear
    #[derive(Default)]
    pub struct FakeProcesses {
        processes: Mutex<Vec<ProcessInfo>>,
        stubborn: Mutex<HashSet<u32>>,
        exiting: Mutex<HashSet<u32>>,
        kill_attempts: Mutex<Vec<u32>>,
    }

    impl FakeProcesses {
        pub fn with(processes: &[(u32, &str)]) -> Self {
            let fake = Self::default();
            for (pid, name) in processes {
                fake.spawn(*pid, name);
            }
            fake
        }

        pub fn spawn(&self, pid: u32, name: &str) {
            self.processes.lock().unwrap().push(ProcessInfo {
                pid,
                name: name.to_string(),
            });
        }

        /// Termination of `pid` fails until cleared
        pub fn make_stubborn(&self, pid: u32) {
            self.stubborn.lock().unwrap().insert(pid);
        }

        /// `pid` exits on its own just before the kill reaches it
        pub fn exit_before_kill(&self, pid: u32) {
            self.exiting.lock().unwrap().insert(pid);
        }

        pub fn clear_stubborn(&self) {
            self.stubborn.lock().unwrap().clear();
        }

        pub fn kill_attempts(&self) -> Vec<u32> {
            self.kill_attempts.lock().unwrap().clone()
        }

        pub fn is_running(&self, pid: u32) -> bool {
            self.processes.lock().unwrap().iter().any(|p| p.pid == pid)
        }
    }

    impl ProcessSource for FakeProcesses {
        fn list(&self) -> GuardResult<Vec<ProcessInfo>> {
            Ok(self.processes.lock().unwrap().clone())
        }

        fn terminate(&self, pid: u32) -> GuardResult<()> {
            self.kill_attempts.lock().unwrap().push(pid);
            if self.exiting.lock().unwrap().remove(&pid) {
                self.processes.lock().unwrap().retain(|p| p.pid != pid);
            }
            if self.stubborn.lock().unwrap().contains(&pid) {
                return Err(GuardError::Platform(format!("could not terminate pid {pid}")));
            }
            let mut processes = self.processes.lock().unwrap();
            let before = processes.len();
            processes.retain(|p| p.pid != pid);
            if processes.len() == before {
                Err(GuardError::NotFound(format!("process {pid}")))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_source_lists_own_process() {
        let source = SystemProcessSource::new();
        let own = std::process::id();
        let processes = source.list().unwrap();
        assert!(processes.iter().any(|p| p.pid == own));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_exited_process_is_not_found() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let source = SystemProcessSource::new();
        assert!(source.list().unwrap().iter().any(|p| p.pid == pid));

        child.kill().unwrap();
        child.wait().unwrap();

        assert_eq!(source.terminate(pid).unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_terminate_unknown_pid_is_not_found() {
        let source = SystemProcessSource::new();
        source.list().unwrap();
        assert_eq!(source.terminate(u32::MAX - 7).unwrap_err().kind(), "NotFound");
    }
}
