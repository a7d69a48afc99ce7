//! The enforcement engine: one instance per daemon, shared by the monitor
//! loop and every IPC connection.
//!
//! Mutations commit to the policy store first and then reconcile network
//! rules immediately; process enforcement picks the change up on the next
//! tick (or at once via `run_blocking_check`).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Instant;

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::status::{AuthStatus, BlockingStatus, DaemonStatus, SetupResult};
use crate::config::DaemonConfig;
use crate::credentials::{Caller, CredentialStore};
use crate::error::{GuardError, GuardResult};
use crate::network::browser_doh::{self, BrowserDohReport};
use crate::network::{self, ApplyOutcome, NetworkBlocker, RuleSet};
use crate::platform::CommandRunner;
use crate::policy::{
    BlockingToggles, BlocklistCategory, BlocklistItem, EnforcementPlan, ItemCategory,
    PolicyStore, TogglesUpdate,
};
use crate::process::{BlockedEvent, ProcessMonitor, ProcessSource};
use crate::schedule::{Schedule, ScheduleEvaluator, ScheduleInput, SchedulePreset};

pub struct Engine {
    config: DaemonConfig,
    policy: PolicyStore,
    credentials: CredentialStore,
    blocker: Box<dyn NetworkBlocker>,
    monitor: ProcessMonitor,
    started: Instant,
    /// Held for the duration of one tick; a tick still running is not doubled up
    tick_lock: Mutex<()>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    last_network_error: Mutex<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Open the stores under the configured data directory
    pub fn new(
        config: DaemonConfig,
        blocker: Box<dyn NetworkBlocker>,
        processes: Arc<dyn ProcessSource>,
    ) -> GuardResult<Self> {
        let policy = PolicyStore::open(config.policy_path())?;
        let credentials = CredentialStore::open(config.credentials_path());
        let monitor = ProcessMonitor::new(
            processes,
            config.monitor.kill_retry_backoff(),
            config.monitor.recent_events_capacity,
        );
        let (shutdown, _) = watch::channel(false);

        if let Some(reason) = policy.corruption() {
            warn!("Starting in safe mode: {}", reason);
        }

        Ok(Self {
            config,
            policy,
            credentials,
            blocker,
            monitor,
            started: Instant::now(),
            tick_lock: Mutex::new(()),
            last_tick: Mutex::new(None),
            last_network_error: Mutex::new(None),
            shutdown,
        })
    }

    /// Engine wired to the real OS: per-platform blocker and the `sysinfo` process table
    pub fn for_system(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> GuardResult<Self> {
        let blocker = network::create_blocker(&config, runner);
        Self::new(config, blocker, Arc::new(crate::process::SystemProcessSource::new()))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// What must be enforced at `now`, from the latest committed policy
    pub fn plan_at<T: Datelike + Timelike>(&self, now: &T) -> EnforcementPlan {
        let doc = self.policy.snapshot();
        EnforcementPlan::build(&doc, ScheduleEvaluator::decide(&doc.schedules, now))
    }

    pub fn plan(&self) -> EnforcementPlan {
        self.plan_at(&Local::now())
    }

    /// Make network rules match the current plan
    pub fn reconcile(&self) -> GuardResult<ApplyOutcome> {
        self.reconcile_plan(&self.plan())
    }

    fn reconcile_plan(&self, plan: &EnforcementPlan) -> GuardResult<ApplyOutcome> {
        let rules = RuleSet::new(plan.domains.iter().cloned(), plan.block_doh);
        let result = self.blocker.apply(&rules);

        let mut last_error = self
            .last_network_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(_) => *last_error = None,
            Err(e) => {
                error!("Failed to apply network rules: {}", e);
                *last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Reconcile after a committed mutation; the mutation stands even if this fails
    fn after_mutation(&self) {
        if let Err(e) = self.reconcile() {
            debug!("Post-mutation reconcile failed: {}", e);
        }
    }

    /// One monitor pass: reconcile network rules, then terminate blocked processes
    pub fn tick(&self) -> GuardResult<Vec<BlockedEvent>> {
        let _running = match self.tick_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Previous enforcement tick still running, skipping");
                return Ok(Vec::new());
            }
        };

        let plan = self.plan();
        // Network failures are logged and retried next tick; process enforcement still runs
        let _ = self.reconcile_plan(&plan);
        let killed = self.monitor.tick(&plan)?;

        *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        Ok(killed)
    }

    // Blocklists

    pub fn get_blocklists(&self) -> Vec<BlocklistCategory> {
        self.policy.list_categories()
    }

    pub fn add_blocked(&self, category: ItemCategory, value: &str) -> GuardResult<BlocklistItem> {
        let item = self.policy.add(category, value)?;
        self.after_mutation();
        Ok(item)
    }

    pub fn remove_blocked(&self, category: ItemCategory, value: &str) -> GuardResult<()> {
        self.policy.remove(category, value)?;
        self.after_mutation();
        Ok(())
    }

    pub fn set_allowed(
        &self,
        category: ItemCategory,
        value: &str,
        allowed: bool,
    ) -> GuardResult<Option<BlocklistItem>> {
        let item = self.policy.set_allowed(category, value, allowed)?;
        self.after_mutation();
        Ok(item)
    }

    // Schedules

    pub fn get_schedules(&self) -> Vec<Schedule> {
        self.policy.schedules()
    }

    pub fn add_schedule(&self, input: ScheduleInput) -> GuardResult<Schedule> {
        let schedule = self.policy.add_schedule(input)?;
        self.after_mutation();
        Ok(schedule)
    }

    pub fn add_preset_schedule(&self, preset: SchedulePreset) -> GuardResult<Schedule> {
        let schedule = self.policy.add_preset(preset)?;
        self.after_mutation();
        Ok(schedule)
    }

    pub fn update_schedule(&self, schedule: Schedule) -> GuardResult<Schedule> {
        let schedule = self.policy.update_schedule(schedule)?;
        self.after_mutation();
        Ok(schedule)
    }

    pub fn delete_schedule(&self, id: Uuid) -> GuardResult<()> {
        self.policy.delete_schedule(id)?;
        self.after_mutation();
        Ok(())
    }

    pub fn should_block_now(&self) -> bool {
        self.plan().active
    }

    // Toggles and network

    pub fn get_blocking_status(&self) -> BlockingStatus {
        let now = Local::now();
        let doc = self.policy.snapshot();
        let plan = self.plan_at(&now);
        BlockingStatus {
            active: plan.active,
            decision: plan.decision,
            active_schedules: ScheduleEvaluator::active(&doc.schedules, &now)
                .into_iter()
                .map(|s| s.name.clone())
                .collect(),
            toggles: doc.toggles,
            blocked_processes: plan.processes.len(),
            blocked_domains: plan.domains.len(),
            network: self.blocker.status(),
        }
    }

    pub fn set_toggles(&self, update: TogglesUpdate) -> GuardResult<BlockingToggles> {
        let toggles = self.policy.update_toggles(update)?;
        info!(
            "Toggles: game={}, ai={}, browsers={}, dns={}, doh_firewall={}, manual={}",
            toggles.game_blocking,
            toggles.ai_blocking,
            toggles.browser_blocking,
            toggles.dns_blocking,
            toggles.doh_firewall,
            toggles.manual_blocking
        );
        self.after_mutation();
        Ok(toggles)
    }

    /// Turn the DoH firewall on or off and apply at once; returns whether it is now active
    pub fn set_firewall_blocking(&self, enabled: bool) -> GuardResult<bool> {
        self.policy.update_toggles(TogglesUpdate {
            doh_firewall: Some(enabled),
            ..Default::default()
        })?;
        self.reconcile()?;
        Ok(self.blocker.status().firewall_active)
    }

    pub fn apply_blocking(&self) -> GuardResult<ApplyOutcome> {
        self.reconcile()
    }

    pub fn disable_browser_doh(&self) -> BrowserDohReport {
        browser_doh::disable_browser_doh()
    }

    pub fn enable_browser_doh(&self) -> BrowserDohReport {
        browser_doh::enable_browser_doh()
    }

    // Processes

    /// Run one process pass now instead of waiting for the next tick
    ///
    /// Waits for a tick already in progress so the two never race on the same processes.
    pub fn run_blocking_check(&self) -> GuardResult<Vec<BlockedEvent>> {
        let _running = self.tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.monitor.tick(&self.plan())
    }

    pub fn list_processes(&self) -> GuardResult<Vec<String>> {
        self.monitor.running_process_names()
    }

    pub fn recent_blocks(&self, limit: Option<usize>) -> Vec<BlockedEvent> {
        self.monitor.recent_blocks(limit)
    }

    // Store maintenance

    pub fn reset_corrupted_store(&self) -> GuardResult<Option<PathBuf>> {
        let moved = self.policy.reset_corrupted()?;
        if moved.is_some() {
            self.after_mutation();
        }
        Ok(moved)
    }

    pub fn get_status(&self) -> DaemonStatus {
        let network = self.blocker.status();
        let poll = self.config.monitor.poll_interval_secs;
        DaemonStatus {
            running: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            blocked_count: self.monitor.blocked_count(),
            blocking_active: self.should_block_now(),
            firewall_active: network.firewall_active,
            hosts_active: network.hosts_active,
            safe_mode: self.policy.corruption(),
            poll_interval_secs: poll,
            staleness_bound_secs: poll,
            last_tick: *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner),
            last_network_error: self
                .last_network_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    // Credentials

    pub fn get_auth_status(&self) -> AuthStatus {
        AuthStatus {
            is_configured: self.credentials.is_configured(),
        }
    }

    pub fn setup_password(&self, password: &str) -> GuardResult<SetupResult> {
        let secret = self.credentials.setup(password)?;
        Ok(SetupResult {
            recovery_secret: secret.as_str().to_string(),
        })
    }

    pub fn verify_password(&self, caller: Caller, password: &str) -> GuardResult<bool> {
        self.credentials.verify_password(caller, password)
    }

    pub fn change_password(&self, caller: Caller, old: &str, new: &str) -> GuardResult<()> {
        self.credentials.change_password(caller, old, new)
    }

    pub fn reset_with_recovery(
        &self,
        caller: Caller,
        recovery_secret: &str,
        new_password: &str,
    ) -> GuardResult<()> {
        self.credentials
            .reset_with_recovery(caller, recovery_secret, new_password)
    }

    pub fn get_master_password(&self, caller: Caller, password: &str) -> GuardResult<String> {
        let secret = self.credentials.verify_and_reveal(caller, password)?;
        Ok(secret.as_str().to_string())
    }

    /// Check the parent password; anyone passes until one is configured
    pub fn authorize(&self, caller: Caller, password: Option<&str>) -> GuardResult<()> {
        if !self.credentials.is_configured() {
            return Ok(());
        }
        let password = password.ok_or(GuardError::IncorrectPassword)?;
        if self.credentials.verify_password(caller, password)? {
            Ok(())
        } else {
            Err(GuardError::IncorrectPassword)
        }
    }

    /// Stop the daemon; once a password exists it must be supplied
    pub fn shutdown(&self, caller: Caller, password: Option<&str>) -> GuardResult<()> {
        self.authorize(caller, password)?;
        self.request_shutdown();
        Ok(())
    }

    /// Whether a client may exit without the parent password
    ///
    /// Only the client quits; the daemon keeps enforcing either way.
    pub fn force_quit_unconfigured(&self) -> bool {
        let allowed = !self.credentials.is_configured();
        debug!("Client quit without password {}", if allowed { "allowed" } else { "refused" });
        allowed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::command::fake::RecordingRunner;
    use crate::process::fake::FakeProcesses;
    use crate::schedule::ScheduleDecision;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub runner: Arc<RecordingRunner>,
        pub processes: Arc<FakeProcesses>,
        pub engine: Engine,
    }

    impl Fixture {
        pub fn hosts(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("hosts")).unwrap()
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hosts"), "127.0.0.1 localhost\n").unwrap();

        let mut config = DaemonConfig::default();
        config.storage.data_dir = dir.path().join("data");
        config.network.hosts_path = dir.path().join("hosts");

        let runner = Arc::new(RecordingRunner::new());
        let processes = Arc::new(FakeProcesses::with(&[(100, "steam"), (101, "notepad")]));
        let blocker = network::create_blocker(&config, runner.clone());
        let engine = Engine::new(config, blocker, processes.clone()).unwrap();

        Fixture {
            dir,
            runner,
            processes,
            engine,
        }
    }

    fn manual_only(f: &Fixture, on: bool) {
        f.engine
            .set_toggles(TogglesUpdate {
                manual_blocking: Some(on),
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn test_example_com_scenario() {
        let f = fixture();
        manual_only(&f, true);

        f.engine.add_blocked(ItemCategory::Domain, "Example.com").unwrap();
        let hosts = f.hosts();
        assert!(hosts.contains("0.0.0.0 example.com"));
        assert!(hosts.contains("0.0.0.0 www.example.com"));
        assert!(hosts.starts_with("127.0.0.1 localhost\n"));

        f.engine.set_allowed(ItemCategory::Domain, "example.com", true).unwrap();
        assert!(!f.hosts().contains("example.com"));

        f.engine.set_allowed(ItemCategory::Domain, "example.com", false).unwrap();
        assert!(f.hosts().contains("0.0.0.0 example.com"));

        f.engine.remove_blocked(ItemCategory::Domain, "example.com").unwrap();
        assert!(!f.hosts().contains("example.com"));
    }

    #[test]
    fn test_manual_off_clears_rules() {
        let f = fixture();
        manual_only(&f, true);
        assert!(f.engine.should_block_now());
        assert!(f.engine.get_blocking_status().network.hosts_active);

        manual_only(&f, false);
        assert!(!f.engine.should_block_now());
        assert!(!f.engine.get_blocking_status().network.hosts_active);
        assert!(f.hosts().starts_with("127.0.0.1 localhost"));
    }

    #[test]
    fn test_default_removal_is_rejected_without_change() {
        let f = fixture();
        let before = f.engine.get_blocklists();
        let err = f.engine.remove_blocked(ItemCategory::Process, "steam").unwrap_err();
        assert_eq!(err.kind(), "ImmutableDefaultError");
        assert_eq!(f.engine.get_blocklists(), before);
    }

    #[test]
    fn test_tick_kills_and_counts() {
        let f = fixture();
        manual_only(&f, true);

        let killed = f.engine.tick().unwrap();
        assert_eq!(killed.len(), 1);
        assert!(!f.processes.is_running(100));
        assert!(f.processes.is_running(101));

        let status = f.engine.get_status();
        assert_eq!(status.blocked_count, 1);
        assert!(status.last_tick.is_some());
        assert_eq!(status.staleness_bound_secs, status.poll_interval_secs);
        assert_eq!(f.engine.recent_blocks(Some(1))[0].process_name, "steam");
    }

    #[test]
    fn test_whitelisted_process_survives_tick() {
        let f = fixture();
        manual_only(&f, true);
        f.engine.set_allowed(ItemCategory::Process, "steam", true).unwrap();

        assert!(f.engine.run_blocking_check().unwrap().is_empty());
        assert!(f.processes.is_running(100));
    }

    #[test]
    fn test_launcher_variants_killed_and_claude_allowed_by_site() {
        let f = fixture();
        manual_only(&f, true);
        f.processes.spawn(200, "DiscordCanary");
        f.processes.spawn(201, "SteamTmp.exe");
        f.processes.spawn(202, "claude");
        f.engine.set_allowed(ItemCategory::Domain, "claude.ai", true).unwrap();

        let mut killed: Vec<String> = f
            .engine
            .run_blocking_check()
            .unwrap()
            .into_iter()
            .map(|e| e.process_name)
            .collect();
        killed.sort();

        assert_eq!(killed, vec!["DiscordCanary", "SteamTmp.exe", "steam"]);
        assert!(f.processes.is_running(202));
        assert!(f.processes.is_running(101));
    }

    #[test]
    fn test_bedtime_preset_plan() {
        let f = fixture();
        manual_only(&f, false);
        f.engine.add_preset_schedule(SchedulePreset::Bedtime).unwrap();

        // Tuesday 22:30 and Wednesday 06:59 are inside, Wednesday 07:00 is not
        let tue_late = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(22, 30, 0).unwrap();
        let wed_early = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(6, 59, 0).unwrap();
        let wed_seven = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(7, 0, 0).unwrap();

        assert_eq!(f.engine.plan_at(&tue_late).decision, ScheduleDecision::Enforce);
        assert!(f.engine.plan_at(&wed_early).active);
        assert!(!f.engine.plan_at(&wed_seven).active);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_firewall_toggle_persists_and_applies() {
        let f = fixture();
        manual_only(&f, true);

        f.engine.set_firewall_blocking(false).unwrap();
        assert!(!f.engine.get_blocking_status().toggles.doh_firewall);
        assert!(!f.runner.calls_matching("-X FAMILY_GUARD_DOH").is_empty());

        f.engine.set_firewall_blocking(true).unwrap();
        assert!(f.engine.get_blocking_status().toggles.doh_firewall);
        assert!(!f.runner.calls_matching("-N FAMILY_GUARD_DOH").is_empty()
            || !f.runner.calls_matching("-F FAMILY_GUARD_DOH").is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_network_failure_is_reported_but_mutation_stands() {
        let f = fixture();
        manual_only(&f, true);
        f.runner.fail_when("-A FAMILY_GUARD_DOH");

        let item = f.engine.add_blocked(ItemCategory::Domain, "example.org").unwrap();
        assert_eq!(item.value, "example.org");
        assert!(f.engine.get_status().last_network_error.is_some());
        assert_eq!(f.engine.apply_blocking().unwrap_err().kind(), "PartialApplyError");

        f.runner.clear_failures();
        f.engine.apply_blocking().unwrap();
        assert!(f.engine.get_status().last_network_error.is_none());
    }

    #[test]
    fn test_shutdown_requires_password_once_configured() {
        let f = fixture();
        let mut rx = f.engine.subscribe_shutdown();

        f.engine.setup_password("parent-pw").unwrap();
        assert!(!f.engine.force_quit_unconfigured());
        assert_eq!(
            f.engine.shutdown(Caller::Local, None).unwrap_err().kind(),
            "IncorrectPasswordError"
        );
        assert_eq!(
            f.engine.shutdown(Caller::Local, Some("wrong-pw")).unwrap_err().kind(),
            "IncorrectPasswordError"
        );
        assert!(!*rx.borrow_and_update());

        f.engine.shutdown(Caller::Local, Some("parent-pw")).unwrap();
        assert!(f.engine.is_shutting_down());
    }

    #[test]
    fn test_force_quit_leaves_daemon_running() {
        let f = fixture();
        assert!(f.engine.force_quit_unconfigured());
        assert!(!f.engine.is_shutting_down());

        f.engine.setup_password("parent-pw").unwrap();
        assert!(!f.engine.force_quit_unconfigured());
        assert!(!f.engine.is_shutting_down());
    }

    #[test]
    fn test_authorize_once_password_is_set() {
        let f = fixture();
        f.engine.authorize(Caller::Local, None).unwrap();

        f.engine.setup_password("parent-pw").unwrap();
        assert_eq!(
            f.engine.authorize(Caller::Local, None).unwrap_err().kind(),
            "IncorrectPasswordError"
        );
        assert_eq!(
            f.engine.authorize(Caller::Local, Some("guess-pw")).unwrap_err().kind(),
            "IncorrectPasswordError"
        );
        f.engine.authorize(Caller::Local, Some("parent-pw")).unwrap();
    }

    #[test]
    fn test_blocking_check_waits_for_running_tick() {
        let f = Arc::new(fixture());
        manual_only(&f, true);

        let guard = f.engine.tick_lock.lock().unwrap();
        let checker = {
            let f = f.clone();
            std::thread::spawn(move || f.engine.run_blocking_check().unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(f.processes.is_running(100));
        assert!(f.processes.kill_attempts().is_empty());

        drop(guard);
        let killed = checker.join().unwrap();
        assert_eq!(killed.len(), 1);
        assert!(!f.processes.is_running(100));
    }

    #[test]
    fn test_recovery_secret_shown_again_with_password() {
        let f = fixture();
        let setup = f.engine.setup_password("parent-pw").unwrap();
        assert!(f.engine.get_auth_status().is_configured);
        assert_eq!(
            f.engine.get_master_password(Caller::Local, "parent-pw").unwrap(),
            setup.recovery_secret
        );
    }

    #[test]
    fn test_corrupted_store_safe_mode_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hosts"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data").join("policy.json"), "{ not json").unwrap();

        let mut config = DaemonConfig::default();
        config.storage.data_dir = dir.path().join("data");
        config.network.hosts_path = dir.path().join("hosts");
        config.network.firewall_enabled = false;
        let runner = Arc::new(RecordingRunner::new());
        let blocker = network::create_blocker(&config, runner);
        let engine = Engine::new(config, blocker, Arc::new(FakeProcesses::with(&[]))).unwrap();

        assert!(engine.get_status().safe_mode.is_some());
        assert_eq!(
            engine.add_blocked(ItemCategory::Domain, "example.com").unwrap_err().kind(),
            "StorageCorruption"
        );

        let moved = engine.reset_corrupted_store().unwrap().unwrap();
        assert!(moved.exists());
        assert!(engine.get_status().safe_mode.is_none());
        engine.add_blocked(ItemCategory::Domain, "example.com").unwrap();
    }
}
