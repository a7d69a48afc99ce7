//! Windows service registered through `sc.exe`.
//!
//! There is no elevation prompt helper here: the caller must already be
//! running as Administrator.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{SERVICE_NAME, ServiceCommands, ServiceManager, ServiceSpec, ServiceStatus, command_failure};
use crate::error::{GuardError, GuardResult};
use crate::platform::{CommandOutput, CommandRunner};

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;

pub struct ScManager {
    commands: ServiceCommands,
}

impl ScManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            commands: ServiceCommands::new(runner, None, timeout),
        }
    }

    /// Run `sc.exe`, treating the listed exit codes as success
    fn sc(&self, args: &[&str], operation: &str, tolerated: &[i32]) -> GuardResult<CommandOutput> {
        let output = self.commands.privileged("sc.exe", args, operation)?;
        match output.code {
            Some(0) => Ok(output),
            Some(code) if tolerated.contains(&code) => Ok(output),
            Some(ERROR_ACCESS_DENIED) => Err(GuardError::ElevationRequired(operation.to_string())),
            _ => Err(command_failure(operation, "sc.exe", args, &output)),
        }
    }
}

impl ServiceManager for ScManager {
    fn name(&self) -> &'static str {
        "sc.exe"
    }

    fn query(&self) -> GuardResult<ServiceStatus> {
        let output = self.commands.query("sc.exe", &["query", SERVICE_NAME])?;
        Ok(match output.code {
            Some(ERROR_SERVICE_DOES_NOT_EXIST) => ServiceStatus::default(),
            _ => ServiceStatus {
                installed: true,
                running: output.stdout.contains("RUNNING"),
            },
        })
    }

    fn install(&self, spec: &ServiceSpec) -> GuardResult<()> {
        let bin_path = spec
            .program_args()
            .iter()
            .map(|arg| format!("\"{arg}\""))
            .collect::<Vec<_>>()
            .join(" ");

        self.sc(
            &[
                "create",
                SERVICE_NAME,
                "binPath=",
                &bin_path,
                "start=",
                "auto",
                "DisplayName=",
                "Family Guard",
            ],
            "install the daemon",
            &[],
        )?;
        self.sc(
            &[
                "failure",
                SERVICE_NAME,
                "reset=",
                "86400",
                "actions=",
                "restart/5000/restart/5000/restart/5000",
            ],
            "configure service recovery",
            &[],
        )?;

        info!("✓ Windows service {} registered", SERVICE_NAME);
        Ok(())
    }

    fn start(&self) -> GuardResult<()> {
        self.sc(&["start", SERVICE_NAME], "start the daemon", &[ERROR_SERVICE_ALREADY_RUNNING])
            .map(|_| ())
    }

    fn stop(&self) -> GuardResult<()> {
        self.sc(&["stop", SERVICE_NAME], "stop the daemon", &[ERROR_SERVICE_NOT_ACTIVE])
            .map(|_| ())
    }

    fn uninstall(&self) -> GuardResult<()> {
        self.sc(&["delete", SERVICE_NAME], "uninstall the daemon", &[ERROR_SERVICE_DOES_NOT_EXIST])?;
        info!("✓ Windows service {} removed", SERVICE_NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::command::fake::RecordingRunner;
    use std::path::PathBuf;

    #[test]
    fn test_missing_service_is_not_installed() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "sc.exe query",
            CommandOutput {
                code: Some(ERROR_SERVICE_DOES_NOT_EXIST),
                ..Default::default()
            },
        );
        let manager = ScManager::new(runner, Duration::from_secs(1));
        assert_eq!(manager.query().unwrap(), ServiceStatus::default());
    }

    #[test]
    fn test_install_creates_with_restart_actions() {
        let runner = Arc::new(RecordingRunner::new());
        let manager = ScManager::new(runner.clone(), Duration::from_secs(1));
        manager
            .install(&ServiceSpec {
                executable: PathBuf::from(r"C:\Program Files\family-guard\family-guard.exe"),
                config_path: PathBuf::from(r"C:\ProgramData\family-guard\daemon.toml"),
            })
            .unwrap();

        let calls = runner.calls();
        assert!(calls[0].starts_with("sc.exe create family-guard binPath="));
        assert!(calls[1].contains("restart/5000"));
    }

    #[test]
    fn test_access_denied_is_elevation_required() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "sc.exe start",
            CommandOutput {
                code: Some(ERROR_ACCESS_DENIED),
                ..Default::default()
            },
        );
        let manager = ScManager::new(runner, Duration::from_secs(1));
        assert_eq!(manager.start().unwrap_err().kind(), "ElevationRequiredError");
    }
}
