//! systemd system unit, elevated through pkexec when not already root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::elevation::ElevationHelper;
use super::{SERVICE_NAME, ServiceCommands, ServiceManager, ServiceSpec, ServiceStatus};
use crate::error::{GuardError, GuardResult};
use crate::platform::CommandRunner;

pub const UNIT_NAME: &str = "family-guard.service";
const UNIT_PATH: &str = "/etc/systemd/system/family-guard.service";

pub struct SystemdManager {
    commands: ServiceCommands,
    unit_path: PathBuf,
}

impl SystemdManager {
    /// Manager for the system unit directory, elevating unless already root
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        let elevation = if crate::platform::is_admin() {
            None
        } else {
            ElevationHelper::platform_default()
        };
        Self::with_unit_path(runner, PathBuf::from(UNIT_PATH), elevation, timeout)
    }

    pub fn with_unit_path(
        runner: Arc<dyn CommandRunner>,
        unit_path: PathBuf,
        elevation: Option<ElevationHelper>,
        timeout: Duration,
    ) -> Self {
        Self {
            commands: ServiceCommands::new(runner, elevation, timeout),
            unit_path,
        }
    }

    pub fn unit_path(&self) -> &Path {
        &self.unit_path
    }

    pub fn render_unit(spec: &ServiceSpec) -> String {
        let exec_start = spec
            .program_args()
            .iter()
            .map(|arg| {
                if arg.contains(char::is_whitespace) {
                    format!("\"{arg}\"")
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "[Unit]\n\
             Description=Family Guard parental control enforcement daemon\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={exec_start}\n\
             Restart=always\n\
             RestartSec=5\n\
             User=root\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n"
        )
    }

    fn systemctl(&self, args: &[&str], operation: &str) -> GuardResult<()> {
        self.commands
            .privileged_checked("systemctl", args, operation)
            .map(|_| ())
    }

    fn write_unit(&self, content: &str) -> GuardResult<()> {
        if !self.commands.is_elevated() {
            crate::platform::common::atomic_write(&self.unit_path, content.as_bytes())
                .map_err(|e| GuardError::from_write_failure("write systemd unit", e))?;
            return crate::platform::common::set_permissions_readable_all(&self.unit_path)
                .map_err(|e| GuardError::from_write_failure("write systemd unit", e));
        }

        // Stage in a user-writable location, then copy into place as root
        let staged = std::env::temp_dir().join(format!("{}-{}.service", SERVICE_NAME, std::process::id()));
        std::fs::write(&staged, content).map_err(|e| GuardError::from_io("stage systemd unit", e))?;

        let staged_arg = staged.display().to_string();
        let unit_arg = self.unit_path.display().to_string();
        let result = self.commands.privileged_checked(
            "install",
            &["-m", "0644", &staged_arg, &unit_arg],
            "install the systemd unit",
        );
        let _ = std::fs::remove_file(&staged);
        result.map(|_| ())
    }
}

impl ServiceManager for SystemdManager {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn query(&self) -> GuardResult<ServiceStatus> {
        let installed = self.unit_path.exists();
        let running = installed
            && self
                .commands
                .query("systemctl", &["is-active", "--quiet", UNIT_NAME])?
                .success();
        Ok(ServiceStatus { installed, running })
    }

    fn install(&self, spec: &ServiceSpec) -> GuardResult<()> {
        self.write_unit(&Self::render_unit(spec))?;
        self.systemctl(&["daemon-reload"], "reload systemd")?;
        self.systemctl(&["enable", UNIT_NAME], "enable the daemon")?;
        info!("✓ systemd unit installed at {}", self.unit_path.display());
        Ok(())
    }

    fn start(&self) -> GuardResult<()> {
        self.systemctl(&["start", UNIT_NAME], "start the daemon")
    }

    fn stop(&self) -> GuardResult<()> {
        self.systemctl(&["stop", UNIT_NAME], "stop the daemon")
    }

    fn uninstall(&self) -> GuardResult<()> {
        // An already-disabled unit is fine
        if let Err(e) = self.systemctl(&["disable", UNIT_NAME], "disable the daemon") {
            debug!("systemctl disable: {}", e);
        }

        if self.commands.is_elevated() {
            let unit_arg = self.unit_path.display().to_string();
            self.commands
                .privileged_checked("rm", &["-f", &unit_arg], "remove the systemd unit")?;
        } else {
            match std::fs::remove_file(&self.unit_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(GuardError::from_io("remove systemd unit", e)),
            }
        }

        self.systemctl(&["daemon-reload"], "reload systemd")?;
        info!("✓ systemd unit removed");
        Ok(())
    }
}
