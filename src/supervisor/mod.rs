//! Installing, starting, stopping and removing the enforcement daemon as an
//! OS service.
//!
//! [`DaemonSupervisor`] drives a per-OS [`ServiceManager`] through an explicit
//! state machine. Every service-manager call runs with a deadline; an
//! operation that errors or times out leaves the supervisor in
//! [`SupervisorState::Failed`], from which any operation may be retried.

pub mod elevation;
#[cfg(target_os = "macos")]
pub mod launchd;
pub mod systemd;
#[cfg(target_os = "windows")]
pub mod windows;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{GuardError, GuardResult};
use crate::network::NetworkBlocker;
use crate::platform::{CommandOutput, CommandRunner};
use elevation::ElevationHelper;

pub const SERVICE_NAME: &str = "family-guard";

/// What the service manager should launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub executable: PathBuf,
    pub config_path: PathBuf,
}

impl ServiceSpec {
    /// The running binary, started as `daemon run --config <config_path>`
    pub fn current(config_path: &Path) -> GuardResult<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| GuardError::Platform(format!("cannot locate own executable: {e}")))?;
        Ok(Self {
            executable,
            config_path: config_path.to_path_buf(),
        })
    }

    pub fn program_args(&self) -> Vec<String> {
        vec![
            self.executable.display().to_string(),
            "daemon".to_string(),
            "run".to_string(),
            "--config".to_string(),
            self.config_path.display().to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
}

/// One OS service manager (systemd, launchd, the Windows SCM)
pub trait ServiceManager: Send + Sync {
    fn name(&self) -> &'static str;

    fn query(&self) -> GuardResult<ServiceStatus>;

    /// Register the service to start at boot and restart on failure; does not start it
    fn install(&self, spec: &ServiceSpec) -> GuardResult<()>;

    fn start(&self) -> GuardResult<()>;

    fn stop(&self) -> GuardResult<()>;

    /// Remove the registration; the service must already be stopped
    fn uninstall(&self) -> GuardResult<()>;
}

/// Service manager for the running OS
pub fn platform_manager(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Arc<dyn ServiceManager> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(launchd::LaunchdManager::new(runner, timeout))
    }

    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::ScManager::new(runner, timeout))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Arc::new(systemd::SystemdManager::new(runner, timeout))
    }
}

/// Command execution shared by the service managers, elevated when needed
pub(crate) struct ServiceCommands {
    runner: Arc<dyn CommandRunner>,
    elevation: Option<ElevationHelper>,
    timeout: Duration,
}

impl ServiceCommands {
    pub(crate) fn new(
        runner: Arc<dyn CommandRunner>,
        elevation: Option<ElevationHelper>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            elevation,
            timeout,
        }
    }

    pub(crate) fn is_elevated(&self) -> bool {
        self.elevation.is_some()
    }

    /// Privileged command, through the elevation helper when not running as root
    pub(crate) fn privileged(
        &self,
        program: &str,
        args: &[&str],
        operation: &str,
    ) -> GuardResult<CommandOutput> {
        match self.elevation {
            Some(helper) => helper.run(&*self.runner, program, args, self.timeout, operation),
            None => self.runner.run(program, args, self.timeout),
        }
    }

    /// Same as [`ServiceCommands::privileged`], failing on a non-zero exit
    pub(crate) fn privileged_checked(
        &self,
        program: &str,
        args: &[&str],
        operation: &str,
    ) -> GuardResult<CommandOutput> {
        let output = self.privileged(program, args, operation)?;
        if output.success() {
            Ok(output)
        } else {
            Err(command_failure(operation, program, args, &output))
        }
    }

    /// Read-only query, never elevated
    pub(crate) fn query(&self, program: &str, args: &[&str]) -> GuardResult<CommandOutput> {
        self.runner.run(program, args, self.timeout)
    }
}

/// Classify a failed service-manager command
pub(crate) fn command_failure(
    operation: &str,
    program: &str,
    args: &[&str],
    output: &CommandOutput,
) -> GuardError {
    let diagnostic = output.diagnostic();
    let lower = diagnostic.to_lowercase();
    if [
        "access denied",
        "access is denied",
        "permission denied",
        "interactive authentication required",
        "operation not permitted",
        "must be run as root",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        return GuardError::permission_denied(operation, diagnostic);
    }

    GuardError::Platform(format!(
        "{} {} exited with {:?}: {}",
        program,
        args.join(" "),
        output.code,
        diagnostic
    ))
}

/// Supervisor lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupervisorState {
    NotInstalled,
    Installing,
    /// Installed but stopped
    Installed,
    Running,
    Uninstalling,
    Failed { operation: String, reason: String },
}

impl SupervisorState {
    fn from_status(status: ServiceStatus) -> Self {
        match (status.installed, status.running) {
            (_, true) => SupervisorState::Running,
            (true, false) => SupervisorState::Installed,
            (false, false) => SupervisorState::NotInstalled,
        }
    }
}

/// Daemon state as shown to the user, computed live and never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub installed: bool,
    pub running: bool,
    pub uptime_secs: u64,
    pub blocked_count: u64,
    pub firewall_active: bool,
}

impl DaemonState {
    pub fn from_service(status: ServiceStatus) -> Self {
        Self {
            installed: status.installed,
            running: status.running,
            ..Default::default()
        }
    }
}

pub struct DaemonSupervisor {
    manager: Arc<dyn ServiceManager>,
    blocker: Arc<dyn NetworkBlocker>,
    timeout: Duration,
    state: Mutex<SupervisorState>,
}

impl DaemonSupervisor {
    pub fn new(
        manager: Arc<dyn ServiceManager>,
        blocker: Arc<dyn NetworkBlocker>,
        timeout: Duration,
    ) -> Self {
        let state = match manager.query() {
            Ok(status) => SupervisorState::from_status(status),
            Err(e) => SupervisorState::Failed {
                operation: "query".to_string(),
                reason: e.to_string(),
            },
        };
        Self {
            manager,
            blocker,
            timeout,
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run `f` on a worker thread, giving up after the operation timeout
    fn bounded<T, F>(&self, operation: &str, f: F) -> GuardResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> GuardResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(GuardError::Timeout(operation.to_string())),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GuardError::Platform(format!("{operation} aborted unexpectedly")))
            }
        }
    }

    /// Record the outcome of `operation`, entering `Failed` on error
    fn settle<T>(
        &self,
        operation: &str,
        result: GuardResult<T>,
        next: SupervisorState,
    ) -> GuardResult<T> {
        match result {
            Ok(value) => {
                self.set_state(next);
                Ok(value)
            }
            Err(e) => {
                let e = match e {
                    GuardError::PermissionDenied { .. } if !crate::platform::is_admin() => {
                        GuardError::ElevationRequired(operation.to_string())
                    }
                    other => other,
                };
                error!("Failed to {}: {}", operation, e);
                self.set_state(SupervisorState::Failed {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn query(&self) -> GuardResult<ServiceStatus> {
        let manager = self.manager.clone();
        let status = self.bounded("query the daemon service", move || manager.query())?;
        // A failed operation stays visible until something is retried
        if !matches!(self.state(), SupervisorState::Failed { .. }) {
            self.set_state(SupervisorState::from_status(status));
        }
        Ok(status)
    }

    pub fn install(&self, spec: &ServiceSpec) -> GuardResult<()> {
        const OP: &str = "install the daemon";
        info!("Installing {} via {}", SERVICE_NAME, self.manager.name());

        self.set_state(SupervisorState::Installing);
        let manager = self.manager.clone();
        let spec = spec.clone();
        let result = self.bounded(OP, move || manager.install(&spec));
        self.settle(OP, result, SupervisorState::Installed)
    }

    /// Start the service; already running is success
    pub fn start(&self) -> GuardResult<()> {
        const OP: &str = "start the daemon";

        let manager = self.manager.clone();
        let result = self.bounded(OP, move || {
            let status = manager.query()?;
            if !status.installed {
                return Err(GuardError::NotFound(format!("{SERVICE_NAME} service is not installed")));
            }
            if !status.running {
                manager.start()?;
            }
            Ok(())
        });
        self.settle(OP, result, SupervisorState::Running)
    }

    /// Stop the service; already stopped (or not installed) is success
    pub fn stop(&self) -> GuardResult<()> {
        const OP: &str = "stop the daemon";

        let manager = self.manager.clone();
        let result = self.bounded(OP, move || {
            let status = manager.query()?;
            if status.running {
                manager.stop()?;
            }
            Ok(status.installed)
        });
        let installed = self.settle(OP, result, SupervisorState::Installed)?;
        if !installed {
            self.set_state(SupervisorState::NotInstalled);
        }
        Ok(())
    }

    /// Stop, retract every network rule, then remove the service.
    ///
    /// If the rules cannot be retracted the service is left registered, so
    /// enforcement state is never orphaned without a daemon to manage it.
    pub fn uninstall(&self) -> GuardResult<()> {
        const OP: &str = "uninstall the daemon";
        info!("Uninstalling {} via {}", SERVICE_NAME, self.manager.name());

        self.set_state(SupervisorState::Uninstalling);
        let manager = self.manager.clone();
        let blocker = self.blocker.clone();
        let result = self.bounded(OP, move || {
            let status = manager.query()?;
            if status.running {
                manager.stop()?;
            }

            blocker.retract()?;
            info!("Network rules retracted");

            if status.installed {
                manager.uninstall()?;
            } else {
                warn!("{} service was not registered", SERVICE_NAME);
            }
            Ok(())
        });
        self.settle(OP, result, SupervisorState::NotInstalled)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// In-memory service manager; operations named in `failing` error out
    #[derive(Default)]
    pub struct FakeServiceManager {
        pub status: Mutex<ServiceStatus>,
        pub failing: Mutex<Vec<&'static str>>,
        pub delay: Mutex<Option<Duration>>,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl FakeServiceManager {
        pub fn with(installed: bool, running: bool) -> Self {
            let fake = Self::default();
            *fake.status.lock().unwrap() = ServiceStatus { installed, running };
            fake
        }

        pub fn fail(&self, op: &'static str) {
            self.failing.lock().unwrap().push(op);
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, op: &'static str) -> GuardResult<()> {
            self.calls.lock().unwrap().push(op);
            if let Some(delay) = *self.delay.lock().unwrap() {
                std::thread::sleep(delay);
            }
            if self.failing.lock().unwrap().contains(&op) {
                return Err(GuardError::permission_denied(op, "simulated failure"));
            }
            Ok(())
        }
    }

    impl ServiceManager for FakeServiceManager {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn query(&self) -> GuardResult<ServiceStatus> {
            Ok(*self.status.lock().unwrap())
        }

        fn install(&self, _spec: &ServiceSpec) -> GuardResult<()> {
            self.record("install")?;
            self.status.lock().unwrap().installed = true;
            Ok(())
        }

        fn start(&self) -> GuardResult<()> {
            self.record("start")?;
            self.status.lock().unwrap().running = true;
            Ok(())
        }

        fn stop(&self) -> GuardResult<()> {
            self.record("stop")?;
            self.status.lock().unwrap().running = false;
            Ok(())
        }

        fn uninstall(&self) -> GuardResult<()> {
            self.record("uninstall")?;
            *self.status.lock().unwrap() = ServiceStatus::default();
            Ok(())
        }
    }
}
