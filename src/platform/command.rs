//! External command execution with explicit timeouts.
//!
//! Firewall tools, service managers and elevation helpers are all driven
//! through [`CommandRunner`] so the enforcement logic can be tested against a
//! recording fake instead of the real OS.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{GuardError, GuardResult};

const POLL_STEP: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr if present, otherwise stdout; used for error messages
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() { self.stdout.trim() } else { stderr }
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it if it outlives `timeout`.
    ///
    /// A non-zero exit is not an error here; callers inspect [`CommandOutput`].
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> GuardResult<CommandOutput>;

    /// Run and fail with `Platform` on a non-zero exit.
    fn run_checked(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> GuardResult<CommandOutput> {
        let output = self.run(program, args, timeout)?;
        if output.success() {
            Ok(output)
        } else {
            Err(GuardError::Platform(format!(
                "{} {} exited with {:?}: {}",
                program,
                args.join(" "),
                output.code,
                output.diagnostic()
            )))
        }
    }
}

/// Runs real processes via `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> GuardResult<CommandOutput> {
        debug!("Running: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GuardError::Platform(format!("required tool '{program}' is not installed"))
                }
                _ => GuardError::from_io(&format!("spawn {program}"), e),
            })?;

        // Drain pipes on separate threads so a chatty child cannot block on a full pipe
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GuardError::Timeout(format!(
                        "{} {}",
                        program,
                        args.join(" ")
                    )));
                }
                Ok(None) => std::thread::sleep(POLL_STEP),
                Err(e) => return Err(GuardError::from_io(&format!("wait for {program}"), e)),
            }
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: stdout_reader.map(join_reader).unwrap_or_default(),
            stderr: stderr_reader.map(join_reader).unwrap_or_default(),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation; commands matching a failure pattern exit 1
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        failures: Mutex<Vec<String>>,
        responses: Mutex<Vec<(String, CommandOutput)>>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Any command line containing `pattern` fails
        pub fn fail_when(&self, pattern: &str) {
            self.failures.lock().unwrap().push(pattern.to_string());
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        /// Any command line containing `pattern` returns this output
        pub fn respond(&self, pattern: &str, output: CommandOutput) {
            self.responses
                .lock()
                .unwrap()
                .push((pattern.to_string(), output));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.contains(pattern))
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> GuardResult<CommandOutput> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            if self
                .failures
                .lock()
                .unwrap()
                .iter()
                .any(|p| line.contains(p.as_str()))
            {
                return Ok(CommandOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: format!("simulated failure: {line}"),
                });
            }

            let responses = self.responses.lock().unwrap();
            if let Some((_, output)) = responses.iter().find(|(p, _)| line.contains(p.as_str())) {
                return Ok(output.clone());
            }

            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::RecordingRunner;
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemCommandRunner
            .run("sh", &["-c", "echo hello; echo oops >&2"], Duration::from_secs(5))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_times_out() {
        let err = SystemCommandRunner
            .run("sleep", &["5"], Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
    }

    #[test]
    fn test_missing_program_is_platform_error() {
        let err = SystemCommandRunner
            .run("family-guard-no-such-tool", &[], Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), "Platform");
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let runner = RecordingRunner::new();
        runner.fail_when("-A FAMILY_GUARD");

        assert!(runner
            .run_checked("iptables", &["-N", "FAMILY_GUARD"], Duration::from_secs(1))
            .is_ok());
        let err = runner
            .run_checked("iptables", &["-A", "FAMILY_GUARD"], Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("simulated failure"));
        assert_eq!(runner.calls().len(), 2);
    }
}
