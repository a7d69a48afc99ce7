//! launchd system daemon under /Library/LaunchDaemons.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::elevation::ElevationHelper;
use super::{SERVICE_NAME, ServiceCommands, ServiceManager, ServiceSpec, ServiceStatus};
use crate::error::{GuardError, GuardResult};
use crate::platform::CommandRunner;

pub const LABEL: &str = "com.family-guard.daemon";
const PLIST_PATH: &str = "/Library/LaunchDaemons/com.family-guard.daemon.plist";

pub struct LaunchdManager {
    commands: ServiceCommands,
    plist_path: PathBuf,
}

impl LaunchdManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        let elevation = if crate::platform::is_admin() {
            None
        } else {
            ElevationHelper::platform_default()
        };
        Self {
            commands: ServiceCommands::new(runner, elevation, timeout),
            plist_path: PathBuf::from(PLIST_PATH),
        }
    }

    fn service_target() -> String {
        format!("system/{LABEL}")
    }

    fn launchctl(&self, args: &[&str], operation: &str) -> GuardResult<()> {
        self.commands
            .privileged_checked("launchctl", args, operation)
            .map(|_| ())
    }

    fn is_loaded(&self) -> GuardResult<bool> {
        Ok(self
            .commands
            .query("launchctl", &["print", &Self::service_target()])?
            .success())
    }
}

impl ServiceManager for LaunchdManager {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn query(&self) -> GuardResult<ServiceStatus> {
        let installed = self.plist_path.exists();
        let output = self
            .commands
            .query("launchctl", &["print", &Self::service_target()])?;
        let running = output.success() && output.stdout.contains("state = running");
        Ok(ServiceStatus { installed, running })
    }

    fn install(&self, spec: &ServiceSpec) -> GuardResult<()> {
        let args = spec.program_args();

        if !self.commands.is_elevated() {
            crate::platform::macos::write_launch_daemon(&self.plist_path, LABEL, &args)
                .map_err(|e| GuardError::from_write_failure("write LaunchDaemon plist", e))?;
        } else {
            let staged = std::env::temp_dir().join(format!("{}-{}.plist", SERVICE_NAME, std::process::id()));
            crate::platform::macos::write_launch_daemon(&staged, LABEL, &args)
                .map_err(|e| GuardError::from_write_failure("stage LaunchDaemon plist", e))?;

            let staged_arg = staged.display().to_string();
            let plist_arg = self.plist_path.display().to_string();
            let result = self.commands.privileged_checked(
                "install",
                &["-m", "0644", "-o", "root", "-g", "wheel", &staged_arg, &plist_arg],
                "install the LaunchDaemon",
            );
            let _ = std::fs::remove_file(&staged);
            result?;
        }

        info!("✓ LaunchDaemon written to {}", self.plist_path.display());
        Ok(())
    }

    fn start(&self) -> GuardResult<()> {
        if self.is_loaded()? {
            self.launchctl(&["kickstart", &Self::service_target()], "start the daemon")
        } else {
            let plist_arg = self.plist_path.display().to_string();
            self.launchctl(&["bootstrap", "system", &plist_arg], "start the daemon")
        }
    }

    fn stop(&self) -> GuardResult<()> {
        self.launchctl(&["bootout", &Self::service_target()], "stop the daemon")
    }

    fn uninstall(&self) -> GuardResult<()> {
        if self.is_loaded()? {
            if let Err(e) = self.launchctl(&["bootout", &Self::service_target()], "unload the daemon") {
                debug!("launchctl bootout: {}", e);
            }
        }

        let plist_arg = self.plist_path.display().to_string();
        self.commands
            .privileged_checked("rm", &["-f", &plist_arg], "remove the LaunchDaemon")?;
        info!("✓ LaunchDaemon removed");
        Ok(())
    }
}
