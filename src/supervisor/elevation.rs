//! Running a single command through the platform's graphical elevation prompt.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{GuardError, GuardResult};
use crate::platform::{CommandOutput, CommandRunner};

/// pkexec exits 126 when the user dismisses the dialog, 127 when not authorized
const PKEXEC_DISMISSED: i32 = 126;
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationHelper {
    /// polkit, Linux desktops
    Pkexec,
    /// `do shell script ... with administrator privileges`
    Osascript,
}

impl ElevationHelper {
    /// Helper for the running OS, `None` where no prompt exists (Windows needs UAC up front)
    pub fn platform_default() -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            Some(ElevationHelper::Pkexec)
        }

        #[cfg(target_os = "macos")]
        {
            Some(ElevationHelper::Osascript)
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            None
        }
    }

    /// Run `program args` elevated; a dismissed or refused prompt is `ElevationRequired`
    pub fn run(
        self,
        runner: &dyn CommandRunner,
        program: &str,
        args: &[&str],
        timeout: Duration,
        operation: &str,
    ) -> GuardResult<CommandOutput> {
        debug!("Elevating via {:?}: {} {}", self, program, args.join(" "));

        let output = match self {
            ElevationHelper::Pkexec => {
                let mut full = vec![program];
                full.extend_from_slice(args);
                runner.run("pkexec", &full, timeout)?
            }
            ElevationHelper::Osascript => {
                let script = format!(
                    "do shell script \"{}\" with administrator privileges",
                    shell_command(program, args).replace('\\', "\\\\").replace('"', "\\\"")
                );
                runner.run("osascript", &["-e", &script], timeout)?
            }
        };

        if self.was_refused(&output) {
            warn!("Elevation prompt for '{}' was cancelled or denied", operation);
            return Err(GuardError::ElevationRequired(operation.to_string()));
        }
        Ok(output)
    }

    fn was_refused(self, output: &CommandOutput) -> bool {
        match self {
            ElevationHelper::Pkexec => {
                matches!(output.code, Some(PKEXEC_DISMISSED) | Some(PKEXEC_NOT_AUTHORIZED))
            }
            ElevationHelper::Osascript => {
                !output.success()
                    && (output.stderr.contains("User canceled") || output.stderr.contains("(-128)"))
            }
        }
    }
}

/// Quote for `/bin/sh`
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn shell_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}
