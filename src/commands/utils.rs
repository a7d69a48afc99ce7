use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::de::DeserializeOwned;

use crate::config::DaemonConfig;
use crate::daemon::AuthStatus;
use crate::error::GuardError;
use crate::ipc::{DaemonClient, DaemonRequest};

/// Initialize logging
pub fn init_logging(verbose: bool) {
    init_logging_with(if verbose { "debug" } else { "info" });
}

/// Initialize logging with a fallback filter used when `RUST_LOG` is unset
pub fn init_logging_with(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();
}

/// Load daemon configuration, falling back to defaults when the file is missing
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let config = DaemonConfig::load_or_default(path)?;
    config.validate().context("Invalid daemon configuration")?;
    Ok(config)
}

/// Send one request to the daemon configured at `config_path` and wait for the answer
pub fn call<T: DeserializeOwned>(config_path: &Path, request: DaemonRequest) -> Result<T> {
    let config = load_config(config_path)?;
    let client = DaemonClient::from_config(&config);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(client.request(&request));
    if let Err(GuardError::DaemonUnreachable(_)) = &result {
        eprintln!("Is the daemon running? Try 'family-guard daemon status'.");
    }
    result.with_context(|| format!("Daemon request '{}' failed", request.name()))
}

/// Send a policy change or shutdown, attaching the parent password once one is set
///
/// Prompts on stdin when a password is configured and none was given.
pub fn call_as_parent<T: DeserializeOwned>(
    config_path: &Path,
    password: Option<String>,
    request: DaemonRequest,
) -> Result<T> {
    let status: AuthStatus = call(config_path, DaemonRequest::GetAuthStatus)?;
    let password = if status.is_configured {
        Some(password_or_prompt(password, "Parent password")?)
    } else {
        None
    };
    call(config_path, request.with_parent_password(password))
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Use `given`, or read one line from stdin after printing `prompt`
pub fn password_or_prompt(given: Option<String>, prompt: &str) -> Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }

    eprint!("{}: ", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Print sudo message based on OS
pub fn print_sudo_message() {
    #[cfg(unix)]
    {
        let program = std::env::args().next().unwrap_or_else(|| "family-guard".to_string());
        eprintln!("Please run with sudo: sudo {}", program);
    }

    #[cfg(windows)]
    eprintln!("Please run this program as Administrator.");
}
