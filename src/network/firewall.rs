//! DoH egress firewall rules, one backend per OS.
//!
//! Backends only issue commands through [`CommandRunner`], so each can be
//! exercised on any host against a recording runner.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::doh::{self, DOH_TCP_PORTS, DOH_UDP_PORTS};
use crate::error::{GuardError, GuardResult};
use crate::platform::{CommandOutput, CommandRunner};

pub trait DohFirewall: Send + Sync {
    fn name(&self) -> &'static str;

    /// Install the full rule set, replacing any previous copy
    ///
    /// A failing rule yields `PartialApply` naming it; the caller rolls back.
    fn install(&self) -> GuardResult<()>;

    /// Remove every rule this backend owns; absent rules are not an error
    fn remove(&self) -> GuardResult<()>;

    fn is_active(&self) -> bool;
}

/// Select the backend for the running OS
pub fn platform_firewall(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Box<dyn DohFirewall> {
    #[cfg(target_os = "macos")]
    {
        Box::new(PfFirewall::new(runner, timeout))
    }

    #[cfg(target_os = "windows")]
    {
        Box::new(NetshFirewall::new(runner, timeout))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Box::new(IptablesFirewall::new(runner, timeout))
    }
}

/// Map a failed rule command to the error the caller reports
fn rule_failure(operation: &str, rule: String, output: &CommandOutput) -> GuardError {
    let diagnostic = output.diagnostic().to_lowercase();
    if diagnostic.contains("permission denied")
        || diagnostic.contains("must be root")
        || diagnostic.contains("requires elevation")
        || diagnostic.contains("operation not permitted")
    {
        GuardError::permission_denied(operation, output.diagnostic().to_string())
    } else {
        GuardError::PartialApply {
            operation: operation.to_string(),
            rule,
        }
    }
}

/// Linux: a dedicated chain hooked into OUTPUT, for both iptables and ip6tables
pub struct IptablesFirewall {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

pub const IPTABLES_CHAIN: &str = "FAMILY_GUARD_DOH";

impl IptablesFirewall {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn tables() -> [(&'static str, Vec<&'static str>); 2] {
        [
            ("iptables", doh::ipv4_addresses()),
            ("ip6tables", doh::ipv6_addresses()),
        ]
    }

    fn run(&self, tool: &str, args: &[&str]) -> GuardResult<CommandOutput> {
        self.runner.run(tool, args, self.timeout)
    }

    /// Run one rule command, failing the batch if it fails
    fn rule(&self, tool: &str, args: &[&str]) -> GuardResult<()> {
        let output = self.run(tool, args)?;
        if output.success() {
            Ok(())
        } else {
            Err(rule_failure(
                "install DoH firewall",
                format!("{} {}", tool, args.join(" ")),
                &output,
            ))
        }
    }

    fn chain_exists(&self, tool: &str) -> bool {
        self.run(tool, &["-n", "-L", IPTABLES_CHAIN])
            .map(|o| o.success())
            .unwrap_or(false)
    }

    fn hooked(&self, tool: &str) -> bool {
        self.run(tool, &["-C", "OUTPUT", "-j", IPTABLES_CHAIN])
            .map(|o| o.success())
            .unwrap_or(false)
    }
}

impl DohFirewall for IptablesFirewall {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn install(&self) -> GuardResult<()> {
        for (tool, addresses) in Self::tables() {
            if self.chain_exists(tool) {
                self.rule(tool, &["-F", IPTABLES_CHAIN])?;
            } else {
                self.rule(tool, &["-N", IPTABLES_CHAIN])?;
            }

            for addr in &addresses {
                for (proto, ports) in [("tcp", DOH_TCP_PORTS), ("udp", DOH_UDP_PORTS)] {
                    for port in ports {
                        let port = port.to_string();
                        self.rule(
                            tool,
                            &[
                                "-A", IPTABLES_CHAIN, "-d", addr, "-p", proto, "--dport", &port,
                                "-j", "REJECT",
                            ],
                        )?;
                    }
                }
            }

            if !self.hooked(tool) {
                self.rule(tool, &["-I", "OUTPUT", "1", "-j", IPTABLES_CHAIN])?;
            }
        }

        info!("DoH firewall chain {} installed", IPTABLES_CHAIN);
        Ok(())
    }

    fn remove(&self) -> GuardResult<()> {
        for (tool, _) in Self::tables() {
            if !self.chain_exists(tool) {
                continue;
            }

            // The hook may have been inserted more than once by hand
            for _ in 0..8 {
                match self.run(tool, &["-D", "OUTPUT", "-j", IPTABLES_CHAIN]) {
                    Ok(o) if o.success() => continue,
                    _ => break,
                }
            }

            for args in [["-F", IPTABLES_CHAIN], ["-X", IPTABLES_CHAIN]] {
                let output = self.run(tool, &args)?;
                if !output.success() {
                    return Err(rule_failure(
                        "remove DoH firewall",
                        format!("{} {}", tool, args.join(" ")),
                        &output,
                    ));
                }
            }
        }
        debug!("DoH firewall chain {} removed", IPTABLES_CHAIN);
        Ok(())
    }

    /// Both IPv4 and IPv6 hooks must be in place
    fn is_active(&self) -> bool {
        Self::tables().iter().all(|(tool, _)| self.hooked(tool))
    }
}

/// macOS: rules loaded into a pf sub-anchor of `com.apple/*`, which the stock pf.conf evaluates
pub struct PfFirewall {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    rules_path: std::path::PathBuf,
}

pub const PF_ANCHOR: &str = "com.apple/family-guard";

impl PfFirewall {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self::with_rules_path(runner, timeout, "/etc/pf.anchors/family-guard")
    }

    pub fn with_rules_path(
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
        rules_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            runner,
            timeout,
            rules_path: rules_path.into(),
        }
    }

    /// pf rule text blocking every resolver address
    pub fn render_rules() -> String {
        let addresses: Vec<&str> = doh::ipv4_addresses()
            .into_iter()
            .chain(doh::ipv6_addresses())
            .collect();
        let table = addresses.join(", ");
        let tcp_ports = DOH_TCP_PORTS
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let udp_ports = DOH_UDP_PORTS
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "table <family_guard_doh> const {{ {table} }}\n\
             block return out quick proto tcp from any to <family_guard_doh> port {{ {tcp_ports} }}\n\
             block return out quick proto udp from any to <family_guard_doh> port {{ {udp_ports} }}\n"
        )
    }
}

impl DohFirewall for PfFirewall {
    fn name(&self) -> &'static str {
        "pf"
    }

    fn install(&self) -> GuardResult<()> {
        crate::platform::common::atomic_write(&self.rules_path, Self::render_rules().as_bytes())
            .map_err(|e| GuardError::from_write_failure("write pf anchor rules", e))?;

        let rules_path = self.rules_path.to_string_lossy().into_owned();
        let load = ["-a", PF_ANCHOR, "-f", rules_path.as_str()];
        let output = self.runner.run("pfctl", &load, self.timeout)?;
        if !output.success() {
            return Err(rule_failure(
                "install DoH firewall",
                format!("pfctl {}", load.join(" ")),
                &output,
            ));
        }

        // -E takes a reference on pf; "already enabled" is reported on stderr with success
        let output = self.runner.run("pfctl", &["-E"], self.timeout)?;
        if !output.success() {
            return Err(rule_failure("install DoH firewall", "pfctl -E".to_string(), &output));
        }

        info!("DoH firewall anchor {} loaded", PF_ANCHOR);
        Ok(())
    }

    fn remove(&self) -> GuardResult<()> {
        let flush = ["-a", PF_ANCHOR, "-F", "all"];
        let output = self.runner.run("pfctl", &flush, self.timeout)?;
        if !output.success() {
            return Err(rule_failure(
                "remove DoH firewall",
                format!("pfctl {}", flush.join(" ")),
                &output,
            ));
        }
        match std::fs::remove_file(&self.rules_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuardError::from_io("remove pf anchor rules", e)),
        }
    }

    fn is_active(&self) -> bool {
        self.runner
            .run("pfctl", &["-a", PF_ANCHOR, "-s", "rules"], self.timeout)
            .map(|o| o.success() && o.stdout.contains("block"))
            .unwrap_or(false)
    }
}

/// Windows: named outbound block rules in Windows Defender Firewall
pub struct NetshFirewall {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

pub const NETSH_RULE_TCP: &str = "family-guard-doh-tcp";
pub const NETSH_RULE_UDP: &str = "family-guard-doh-udp";

impl NetshFirewall {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn delete_rule(&self, name: &str) -> GuardResult<CommandOutput> {
        let name_arg = format!("name={name}");
        self.runner.run(
            "netsh",
            &["advfirewall", "firewall", "delete", "rule", &name_arg],
            self.timeout,
        )
    }
}

impl DohFirewall for NetshFirewall {
    fn name(&self) -> &'static str {
        "netsh"
    }

    fn install(&self) -> GuardResult<()> {
        let remote_ip = doh::ipv4_addresses()
            .into_iter()
            .chain(doh::ipv6_addresses())
            .collect::<Vec<_>>()
            .join(",");

        for (rule, protocol, ports) in [
            (NETSH_RULE_TCP, "TCP", DOH_TCP_PORTS),
            (NETSH_RULE_UDP, "UDP", DOH_UDP_PORTS),
        ] {
            // Replace rather than duplicate; a missing rule makes delete fail harmlessly
            let _ = self.delete_rule(rule)?;

            let ports = ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
            let args = [
                "advfirewall".to_string(),
                "firewall".to_string(),
                "add".to_string(),
                "rule".to_string(),
                format!("name={rule}"),
                "dir=out".to_string(),
                "action=block".to_string(),
                format!("protocol={protocol}"),
                format!("remoteip={remote_ip}"),
                format!("remoteport={ports}"),
            ];
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = self.runner.run("netsh", &args, self.timeout)?;
            if !output.success() {
                return Err(rule_failure(
                    "install DoH firewall",
                    format!("netsh rule {rule}"),
                    &output,
                ));
            }
        }

        info!("DoH firewall rules installed");
        Ok(())
    }

    fn remove(&self) -> GuardResult<()> {
        for rule in [NETSH_RULE_TCP, NETSH_RULE_UDP] {
            let output = self.delete_rule(rule)?;
            // netsh reports "No rules match" with exit 1 when already gone
            if !output.success() && !output.stdout.contains("No rules match") {
                return Err(rule_failure(
                    "remove DoH firewall",
                    format!("netsh delete rule {rule}"),
                    &output,
                ));
            }
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        let name_arg = format!("name={NETSH_RULE_TCP}");
        self.runner
            .run(
                "netsh",
                &["advfirewall", "firewall", "show", "rule", &name_arg],
                self.timeout,
            )
            .map(|o| o.success())
            .unwrap_or(false)
    }
}
