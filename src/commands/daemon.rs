use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::DaemonConfig;
use crate::daemon::{self, DaemonStatus};
use crate::error::GuardError;
use crate::ipc::{DaemonClient, DaemonRequest};
use crate::network;
use crate::network::browser_doh;
use crate::platform::{self, CommandRunner, SystemCommandRunner};
use crate::supervisor::elevation::ElevationHelper;
use crate::supervisor::{DaemonState, DaemonSupervisor, SERVICE_NAME, ServiceSpec, platform_manager};

use super::utils::{format_duration, init_logging, init_logging_with, load_config, print_sudo_message};

fn supervisor(config: &DaemonConfig) -> DaemonSupervisor {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let timeout = Duration::from_secs(config.service.operation_timeout_secs);
    let blocker = network::create_blocker(config, runner.clone());

    DaemonSupervisor::new(platform_manager(runner, timeout), Arc::from(blocker), timeout)
}

/// Report an elevation failure the way the rest of the CLI does
fn explain(err: GuardError) -> anyhow::Error {
    if matches!(err, GuardError::ElevationRequired(_)) {
        print_sudo_message();
    }
    err.into()
}

/// Register the daemon with the OS service manager and start it
pub fn install(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let config = load_config(config_path)?;

    println!("family-guard - Install Daemon");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    if platform::is_admin() && !config_path.exists() {
        config.save(config_path)?;
        println!("✓ Default configuration written to: {}", config_path.display());
    }

    let spec = ServiceSpec::current(config_path)?;
    let supervisor = supervisor(&config);

    supervisor.install(&spec).map_err(explain)?;
    println!("✓ Service {} registered", SERVICE_NAME);

    supervisor.start().map_err(explain)?;
    println!("✓ Daemon started");

    println!();
    println!("Enforcement is now active. Check it with:");
    println!("  family-guard daemon status");

    Ok(())
}

/// Stop the daemon, remove every network rule, and unregister the service
pub fn uninstall(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let config = load_config(config_path)?;

    // Rule retraction edits system files, so the whole operation runs as root
    if !platform::is_admin() {
        return relaunch_elevated(config_path, &["daemon", "uninstall"], "uninstall the daemon", &config);
    }

    supervisor(&config).uninstall().map_err(explain)?;
    println!("✓ Daemon stopped and unregistered");
    println!("✓ Network rules removed");

    let report = browser_doh::enable_browser_doh();
    if report.doh_configured_browsers.is_empty() {
        println!("✓ Browser DNS-over-HTTPS policies removed");
    } else {
        println!(
            "⚠ Browser DoH policy still present for: {}",
            report.doh_configured_browsers.join(", ")
        );
    }

    Ok(())
}

fn relaunch_elevated(
    config_path: &Path,
    args: &[&str],
    operation: &str,
    config: &DaemonConfig,
) -> Result<()> {
    let Some(helper) = ElevationHelper::platform_default() else {
        print_sudo_message();
        return Err(GuardError::ElevationRequired(operation.to_string()).into());
    };

    let exe = std::env::current_exe().context("Failed to locate the family-guard executable")?;
    let exe = exe.to_string_lossy().to_string();
    let config_arg = config_path.to_string_lossy().to_string();
    let mut full_args = vec!["--config", config_arg.as_str()];
    full_args.extend_from_slice(args);

    let output = helper
        .run(
            &SystemCommandRunner,
            &exe,
            &full_args,
            Duration::from_secs(config.service.operation_timeout_secs),
            operation,
        )
        .map_err(explain)?;

    print!("{}", output.stdout);
    if !output.success() {
        anyhow::bail!("Failed to {}: {}", operation, output.diagnostic());
    }
    Ok(())
}

pub fn start(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let config = load_config(config_path)?;
    supervisor(&config).start().map_err(explain)?;
    println!("✓ Daemon started");
    Ok(())
}

pub fn stop(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let config = load_config(config_path)?;
    supervisor(&config).stop().map_err(explain)?;
    println!("✓ Daemon stopped");
    println!("Network rules stay in place until the daemon is uninstalled.");
    Ok(())
}

/// Service state plus live counters from the daemon when it answers
pub fn status(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let config = load_config(config_path)?;

    let service = supervisor(&config).query().unwrap_or_default();
    let mut state = DaemonState::from_service(service);

    let runtime = tokio::runtime::Runtime::new()?;
    let live: Option<DaemonStatus> = runtime
        .block_on(DaemonClient::from_config(&config).request(&DaemonRequest::GetStatus))
        .ok();
    if let Some(live) = &live {
        state.running = true;
        state.uptime_secs = live.uptime_secs;
        state.blocked_count = live.blocked_count;
        state.firewall_active = live.firewall_active;
    }

    println!("family-guard Daemon Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Installed:     {}", yes_no(state.installed));
    println!("Running:       {}", yes_no(state.running));

    match live {
        Some(live) => {
            println!("Version:       {}", live.version);
            println!(
                "Uptime:        {}",
                format_duration(chrono::Duration::seconds(live.uptime_secs as i64))
            );
            println!("Blocking:      {}", if live.blocking_active { "ACTIVE" } else { "inactive" });
            println!("Blocked:       {} process(es) terminated", state.blocked_count);
            println!("Hosts rules:   {}", yes_no(live.hosts_active));
            println!("DoH firewall:  {}", yes_no(state.firewall_active));
            println!("Poll interval: {} seconds", live.poll_interval_secs);
            if let Some(last_tick) = live.last_tick {
                let ago = chrono::Utc::now() - last_tick;
                println!("Last check:    {} ago", format_duration(ago));
            }
            if let Some(reason) = live.safe_mode {
                println!();
                println!("⚠ SAFE MODE: policy store is corrupted ({})", reason);
                println!("  Run 'family-guard store reset --confirm' to start over with defaults.");
            }
            if let Some(err) = live.last_network_error {
                println!();
                println!("⚠ Last network rule error: {}", err);
            }
        }
        None if state.running => {
            println!();
            println!("Service is running but the daemon is not answering on {}", config.ipc.socket_path.display());
        }
        None => {}
    }

    Ok(())
}

/// Foreground daemon, as launched by the service manager
pub fn run(config_path: &Path, verbose: bool) -> Result<()> {
    let config = load_config(config_path)?;
    if verbose {
        init_logging(true);
    } else {
        init_logging_with(&config.logging.level);
    }

    if let Err(e) = platform::ensure_admin("run the enforcement daemon") {
        eprintln!("Insufficient privileges: {:#}", e);
        print_sudo_message();
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(daemon::run_daemon(config))
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
