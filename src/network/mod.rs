//! Network-level blocking: a managed hosts-file section for blocked domains
//! plus firewall rules against DNS-over-HTTPS resolvers.
//!
//! Only [`NetworkBlocker`] implementations write hosts or firewall state, and
//! only while holding their apply critical section.

pub mod browser_doh;
pub mod doh;
pub mod firewall;
pub mod hosts;
pub mod snapshot;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{GuardError, GuardResult};
use crate::platform::CommandRunner;
use firewall::DohFirewall;
use hosts::HostsFile;
use snapshot::SnapshotStore;

/// The complete network rule state to enforce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub domains: BTreeSet<String>,
    pub block_doh: bool,
}

impl RuleSet {
    pub fn new(domains: impl IntoIterator<Item = String>, block_doh: bool) -> Self {
        Self {
            domains: domains.into_iter().collect(),
            block_doh,
        }
    }

    /// No domains and no DoH blocking; applying it clears all managed state
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && !self.block_doh
    }

    pub fn fingerprint(&self) -> String {
        snapshot::compute_fingerprint(self)
    }

    /// Host names written to the hosts section
    fn hosts_entries(&self) -> BTreeSet<String> {
        let mut entries = self.domains.clone();
        if self.block_doh {
            entries.extend(doh::hostnames().into_iter().map(str::to_string));
        }
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied { domains: usize, firewall: bool },
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub hosts_active: bool,
    /// Host names in the managed section, `www.` variants included
    pub blocked_domains: usize,
    pub firewall_active: bool,
    pub fingerprint: Option<String>,
}

pub trait NetworkBlocker: Send + Sync {
    /// Make the OS rule state match `rules`, as one batch
    fn apply(&self, rules: &RuleSet) -> GuardResult<ApplyOutcome>;

    /// Remove every rule this blocker installed
    fn retract(&self) -> GuardResult<()>;

    fn status(&self) -> NetworkStatus;
}

/// Hosts section plus an optional DoH firewall, batched under one lock
pub struct HostsFirewallBlocker {
    hosts: HostsFile,
    firewall: Option<Box<dyn DohFirewall>>,
    snapshots: SnapshotStore,
    runner: Arc<dyn CommandRunner>,
    redirect: String,
    command_timeout: Duration,
    critical: Mutex<()>,
}

impl HostsFirewallBlocker {
    pub fn new(
        hosts: HostsFile,
        firewall: Option<Box<dyn DohFirewall>>,
        snapshots: SnapshotStore,
        runner: Arc<dyn CommandRunner>,
        redirect: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            hosts,
            firewall,
            snapshots,
            runner,
            redirect: redirect.into(),
            command_timeout,
            critical: Mutex::new(()),
        }
    }

    fn firewall_in_place(&self, rules: &RuleSet) -> bool {
        match &self.firewall {
            Some(fw) if rules.block_doh => fw.is_active(),
            _ => true,
        }
    }

    /// Put the firewall back the way the last applied snapshot had it
    fn restore_firewall(&self, previous_block_doh: bool) {
        let Some(fw) = &self.firewall else {
            return;
        };
        let result = if previous_block_doh {
            fw.install()
        } else {
            fw.remove()
        };
        if let Err(e) = result {
            error!("Failed to restore {} firewall state: {}", fw.name(), e);
        }
    }
}

impl NetworkBlocker for HostsFirewallBlocker {
    fn apply(&self, rules: &RuleSet) -> GuardResult<ApplyOutcome> {
        let _guard = self.critical.lock().unwrap_or_else(PoisonError::into_inner);

        let fingerprint = rules.fingerprint();
        let original = self.hosts.read()?;
        let previous = self.snapshots.load();

        let section_intact = if rules.is_empty() {
            !hosts::has_section(&original)
        } else {
            hosts::section_fingerprint(&original).as_deref() == Some(fingerprint.as_str())
        };
        let snapshot_matches = previous
            .as_ref()
            .is_some_and(|s| s.fingerprint == fingerprint);

        if snapshot_matches && section_intact && self.firewall_in_place(rules) {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.hosts.backup(&original)?;

        let entries = rules.hosts_entries();
        let updated = if entries.is_empty() {
            hosts::strip_section(&original)
        } else {
            let section = hosts::render_section(&entries, &self.redirect, &fingerprint);
            hosts::with_section(&original, &section)
        };
        if updated != original {
            self.hosts.write(&updated)?;
        }

        let firewall_result = match &self.firewall {
            Some(fw) if rules.block_doh => fw.install().map(|_| true),
            Some(fw) => fw.remove().map(|_| false),
            None => Ok(false),
        };

        let firewall_active = match firewall_result {
            Ok(active) => active,
            Err(e) => {
                warn!("Firewall step failed, rolling back network batch: {}", e);
                if let Err(restore) = self.hosts.write(&original) {
                    error!(
                        "Failed to restore hosts file; backup kept at {}: {}",
                        self.hosts.backup_path().display(),
                        restore
                    );
                }
                self.restore_firewall(previous.as_ref().is_some_and(|s| s.rules.block_doh));

                return Err(match e {
                    GuardError::PermissionDenied { .. } | GuardError::PartialApply { .. } => e,
                    other => GuardError::PartialApply {
                        operation: "apply network rules".to_string(),
                        rule: other.to_string(),
                    },
                });
            }
        };

        if let Err(e) = self.snapshots.save(rules, &fingerprint) {
            warn!("Rules applied but snapshot not saved: {}", e);
        }
        hosts::flush_dns_cache(self.runner.as_ref(), self.command_timeout);

        info!(
            "Applied network rules: {} domains, DoH firewall {}",
            rules.domains.len(),
            if firewall_active { "on" } else { "off" }
        );
        Ok(ApplyOutcome::Applied {
            domains: rules.domains.len(),
            firewall: firewall_active,
        })
    }

    fn retract(&self) -> GuardResult<()> {
        let _guard = self.critical.lock().unwrap_or_else(PoisonError::into_inner);
        let mut first_error = None;

        match self.hosts.read() {
            Ok(content) if hosts::has_section(&content) => {
                if let Err(e) = self.hosts.write(&hosts::strip_section(&content)) {
                    first_error.get_or_insert(e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        if let Some(fw) = &self.firewall {
            if let Err(e) = fw.remove() {
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.snapshots.delete() {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => {
                error!("Network rules only partially retracted: {}", e);
                Err(e)
            }
            None => {
                hosts::flush_dns_cache(self.runner.as_ref(), self.command_timeout);
                info!("Network rules retracted");
                Ok(())
            }
        }
    }

    fn status(&self) -> NetworkStatus {
        let content = self.hosts.read().unwrap_or_default();
        NetworkStatus {
            hosts_active: hosts::has_section(&content),
            blocked_domains: hosts::section_domains(&content).len(),
            firewall_active: self.firewall.as_ref().is_some_and(|fw| fw.is_active()),
            fingerprint: hosts::section_fingerprint(&content),
        }
    }
}

/// Build the blocker for the running OS from daemon configuration
pub fn create_blocker(
    config: &DaemonConfig,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn NetworkBlocker> {
    let firewall = config.network.firewall_enabled.then(|| {
        firewall::platform_firewall(runner.clone(), config.network.command_timeout())
    });

    Box::new(HostsFirewallBlocker::new(
        HostsFile::new(&config.network.hosts_path, config.hosts_backup_path()),
        firewall,
        SnapshotStore::new(config.snapshot_path()),
        runner,
        config.network.redirect_address.clone(),
        config.network.command_timeout(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::command::fake::RecordingRunner;
    use firewall::IptablesFirewall;
    use tempfile::TempDir;

    const ORIGINAL: &str = "127.0.0.1 localhost\n::1 localhost\n";

    struct Fixture {
        dir: TempDir,
        runner: Arc<RecordingRunner>,
        blocker: HostsFirewallBlocker,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hosts"), ORIGINAL).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let firewall: Box<dyn DohFirewall> =
            Box::new(IptablesFirewall::new(runner.clone(), Duration::from_secs(1)));

        let blocker = HostsFirewallBlocker::new(
            HostsFile::new(dir.path().join("hosts"), dir.path().join("hosts.bak")),
            Some(firewall),
            SnapshotStore::new(dir.path().join("applied-rules.json")),
            runner.clone(),
            "0.0.0.0",
            Duration::from_secs(1),
        );
        Fixture {
            dir,
            runner,
            blocker,
        }
    }

    fn hosts_content(f: &Fixture) -> String {
        std::fs::read_to_string(f.dir.path().join("hosts")).unwrap()
    }

    fn rules(domains: &[&str], block_doh: bool) -> RuleSet {
        RuleSet::new(domains.iter().map(|d| d.to_string()), block_doh)
    }

    #[test]
    fn test_apply_writes_section_and_snapshot() {
        let f = fixture();
        let outcome = f.blocker.apply(&rules(&["example.com"], true)).unwrap();

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                domains: 1,
                firewall: true
            }
        );
        let content = hosts_content(&f);
        assert!(content.starts_with(ORIGINAL));
        assert!(content.contains("0.0.0.0 example.com\n"));
        assert!(content.contains("0.0.0.0 dns.google\n"));
        assert!(f.dir.path().join("applied-rules.json").exists());
        assert!(!f.runner.calls_matching("-j REJECT").is_empty());
    }

    #[test]
    fn test_apply_same_rules_is_unchanged() {
        let f = fixture();
        let set = rules(&["example.com", "games.net"], true);
        f.blocker.apply(&set).unwrap();
        let after_first = hosts_content(&f);
        let calls_after_first = f.runner.calls().len();

        assert_eq!(f.blocker.apply(&set).unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(hosts_content(&f), after_first);
        // Only the firewall liveness checks ran
        assert_eq!(
            f.runner.calls()[calls_after_first..],
            [
                format!("iptables -C OUTPUT -j {}", firewall::IPTABLES_CHAIN),
                format!("ip6tables -C OUTPUT -j {}", firewall::IPTABLES_CHAIN),
            ]
        );
    }

    #[test]
    fn test_removed_ipv6_hook_is_reinstalled() {
        let f = fixture();
        let set = rules(&["example.com"], true);
        f.blocker.apply(&set).unwrap();

        f.runner.respond(
            "ip6tables -C OUTPUT",
            crate::platform::CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "Bad rule (does a matching rule exist in that chain?).".into(),
            },
        );
        assert!(matches!(f.blocker.apply(&set).unwrap(), ApplyOutcome::Applied { .. }));
        assert!(!f.runner.calls_matching("ip6tables -I OUTPUT 1").is_empty());
    }

    #[test]
    fn test_apply_repairs_tampered_section() {
        let f = fixture();
        let set = rules(&["example.com"], false);
        f.blocker.apply(&set).unwrap();

        std::fs::write(f.dir.path().join("hosts"), ORIGINAL).unwrap();
        assert!(matches!(
            f.blocker.apply(&set).unwrap(),
            ApplyOutcome::Applied { .. }
        ));
        assert!(hosts_content(&f).contains("0.0.0.0 example.com"));
    }

    #[test]
    fn test_firewall_failure_rolls_back_hosts() {
        let f = fixture();
        f.blocker.apply(&rules(&["old.com"], false)).unwrap();
        let before = hosts_content(&f);

        f.runner.fail_when("-d 9.9.9.9");
        let err = f.blocker.apply(&rules(&["new.com"], true)).unwrap_err();

        assert_eq!(err.kind(), "PartialApplyError");
        assert!(err.to_string().contains("9.9.9.9"));
        assert_eq!(hosts_content(&f), before);
        // Previous snapshot had no DoH blocking, so the chain was torn down again
        assert!(!f.runner.calls_matching(&format!("-X {}", firewall::IPTABLES_CHAIN)).is_empty());

        f.runner.clear_failures();
        assert!(matches!(
            f.blocker.apply(&rules(&["new.com"], true)).unwrap(),
            ApplyOutcome::Applied { .. }
        ));
    }

    #[test]
    fn test_retract_restores_original_hosts() {
        let f = fixture();
        f.blocker.apply(&rules(&["example.com"], true)).unwrap();
        f.blocker.retract().unwrap();

        assert_eq!(hosts_content(&f), ORIGINAL);
        assert!(!f.dir.path().join("applied-rules.json").exists());
        assert!(!f.runner.calls_matching(&format!("-X {}", firewall::IPTABLES_CHAIN)).is_empty());

        let status = f.blocker.status();
        assert!(!status.hosts_active);
        assert_eq!(status.blocked_domains, 0);
        assert!(status.fingerprint.is_none());
    }

    #[test]
    fn test_empty_rules_strip_section() {
        let f = fixture();
        f.blocker.apply(&rules(&["example.com"], false)).unwrap();
        f.blocker.apply(&RuleSet::empty()).unwrap();
        assert_eq!(hosts_content(&f), ORIGINAL);
        assert_eq!(f.blocker.apply(&RuleSet::empty()).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_status_reports_section() {
        let f = fixture();
        let set = rules(&["example.com"], false);
        f.blocker.apply(&set).unwrap();

        let status = f.blocker.status();
        assert!(status.hosts_active);
        assert_eq!(status.blocked_domains, 2);
        assert_eq!(status.fingerprint, Some(set.fingerprint()));
    }

    #[test]
    fn test_create_blocker_honours_firewall_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.network.hosts_path = dir.path().join("hosts");
        config.network.firewall_enabled = false;

        let runner = Arc::new(RecordingRunner::new());
        let blocker = create_blocker(&config, runner.clone());
        blocker.apply(&rules(&["example.com"], true)).unwrap();

        assert!(runner.calls_matching("iptables").is_empty());
        assert!(!blocker.status().firewall_active);
        assert!(dir.path().join("hosts.family-guard.bak").exists());
    }
}
