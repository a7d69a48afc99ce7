use std::path::Path;

use anyhow::Result;

use crate::daemon::BlockingStatus;
use crate::ipc::DaemonRequest;
use crate::network::ApplyOutcome;
use crate::network::browser_doh::BrowserDohReport;
use crate::policy::{BlockingToggles, TogglesUpdate};
use crate::process::BlockedEvent;

use super::utils::{call, call_as_parent, init_logging};

pub fn status(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let status: BlockingStatus = call(config_path, DaemonRequest::GetBlockingStatus)?;

    println!("Blocking Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Blocking:        {} ({:?})",
        if status.active { "ACTIVE" } else { "inactive" },
        status.decision
    );
    if !status.active_schedules.is_empty() {
        println!("Schedules now:   {}", status.active_schedules.join(", "));
    }
    println!("Processes:       {} blocked", status.blocked_processes);
    println!("Domains:         {} blocked", status.blocked_domains);
    println!(
        "Hosts rules:     {} ({} entries)",
        on_off(status.network.hosts_active),
        status.network.blocked_domains
    );
    println!("DoH firewall:    {}", on_off(status.network.firewall_active));
    println!();
    print_toggles(&status.toggles);
    Ok(())
}

fn print_toggles(toggles: &BlockingToggles) {
    println!("Toggles:");
    println!("  Games:         {}", on_off(toggles.game_blocking));
    println!("  AI services:   {}", on_off(toggles.ai_blocking));
    println!("  Browsers:      {}", on_off(toggles.browser_blocking));
    println!("  DNS blocking:  {}", on_off(toggles.dns_blocking));
    println!("  DoH firewall:  {}", on_off(toggles.doh_firewall));
    println!("  Manual:        {}", on_off(toggles.manual_blocking));
}

pub fn set_toggles(
    config_path: &Path,
    update: TogglesUpdate,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let toggles: BlockingToggles = call_as_parent(
        config_path,
        password,
        DaemonRequest::SetToggles {
            toggles: update,
            password: None,
        },
    )?;
    println!("✓ Toggles updated");
    println!();
    print_toggles(&toggles);
    Ok(())
}

pub fn set_firewall(
    config_path: &Path,
    enabled: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let request = if enabled {
        DaemonRequest::EnableFirewallBlocking { password: None }
    } else {
        DaemonRequest::DisableFirewallBlocking { password: None }
    };
    let active: bool = call_as_parent(config_path, password, request)?;

    match (enabled, active) {
        (true, true) => println!("✓ DoH firewall enabled"),
        // Installed only while blocking is active and domains are blocked
        (true, false) => println!("✓ DoH firewall enabled; rules install when blocking becomes active"),
        (false, _) => println!("✓ DoH firewall disabled"),
    }
    Ok(())
}

pub fn set_browser_doh(
    config_path: &Path,
    disabled: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let request = if disabled {
        DaemonRequest::DisableBrowserDoh { password: None }
    } else {
        DaemonRequest::EnableBrowserDoh { password: None }
    };
    let report: BrowserDohReport = call_as_parent(config_path, password, request)?;

    if disabled {
        if report.doh_configured_browsers.is_empty() {
            println!("No supported browsers found to configure");
        } else {
            println!(
                "✓ DNS-over-HTTPS disabled for: {}",
                report.doh_configured_browsers.join(", ")
            );
            println!("  Restart the browsers for the policy to take effect.");
        }
    } else if report.doh_configured_browsers.is_empty() {
        println!("✓ Browser DNS-over-HTTPS policies removed");
    } else {
        println!(
            "⚠ Policy still present for: {}",
            report.doh_configured_browsers.join(", ")
        );
    }
    Ok(())
}

/// Reconcile network rules now and report what changed
pub fn apply(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    match call::<ApplyOutcome>(config_path, DaemonRequest::ApplyBlocking)? {
        ApplyOutcome::Applied { domains, firewall } => println!(
            "✓ Applied: {} domains, DoH firewall {}",
            domains,
            on_off(firewall)
        ),
        ApplyOutcome::Unchanged => println!("✓ Network rules already up to date"),
    }
    Ok(())
}

/// Run a process pass now
pub fn check(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let killed: Vec<BlockedEvent> = call(config_path, DaemonRequest::RunBlockingCheck)?;
    if killed.is_empty() {
        println!("✓ No blocked processes running");
    } else {
        for event in &killed {
            println!("✓ Terminated {} (pid {})", event.process_name, event.pid);
        }
    }
    Ok(())
}

pub fn processes(config_path: &Path, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let names: Vec<String> = call(config_path, DaemonRequest::ListProcesses)?;
    for name in &names {
        println!("{}", name);
    }
    Ok(())
}

pub fn recent(config_path: &Path, limit: Option<usize>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let events: Vec<BlockedEvent> = call(config_path, DaemonRequest::RecentBlocks { limit })?;
    if events.is_empty() {
        println!("No processes terminated since the daemon started");
    }
    for event in &events {
        println!(
            "{}  {:<32} pid {}",
            event.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            event.process_name,
            event.pid
        );
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
