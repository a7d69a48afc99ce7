use std::sync::Arc;

use tracing::warn;

use super::engine::Engine;
use crate::credentials::Caller;
use crate::error::GuardError;
use crate::ipc::{DaemonRequest, DaemonResponse, RequestHandler};
use crate::policy::ItemCategory;

/// Routes IPC requests to the engine
///
/// Engine calls block on file and command I/O, so each request runs on the
/// blocking pool rather than on the connection's task.
pub struct Dispatcher {
    engine: Arc<Engine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl RequestHandler for Dispatcher {
    async fn handle(&self, caller: Caller, request: DaemonRequest) -> DaemonResponse {
        let engine = self.engine.clone();
        let name = request.name();
        match tokio::task::spawn_blocking(move || dispatch(&engine, caller, request)).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request {} panicked: {}", name, e);
                DaemonResponse::from_result::<()>(Err(GuardError::Platform(format!(
                    "request {name} failed: {e}"
                ))))
            }
        }
    }
}

/// Execute one request against the engine
///
/// Policy mutations are refused with `IncorrectPasswordError` unless they carry
/// the parent password, once one is configured.
pub fn dispatch(engine: &Engine, caller: Caller, request: DaemonRequest) -> DaemonResponse {
    use DaemonRequest::*;

    if request.is_policy_mutation() {
        if let Err(e) = engine.authorize(caller, request.parent_password()) {
            warn!("Refused {} from {:?}: {}", request.name(), caller, e);
            return DaemonResponse::from_result::<()>(Err(e));
        }
    }

    match request {
        Ping => DaemonResponse::from_result(Ok("pong")),
        GetStatus => DaemonResponse::from_result(Ok(engine.get_status())),
        Shutdown { password } => {
            DaemonResponse::from_result(engine.shutdown(caller, password.as_deref()))
        }

        GetBlocklists => DaemonResponse::from_result(Ok(engine.get_blocklists())),
        AddBlockedProcess { name, .. } => {
            DaemonResponse::from_result(engine.add_blocked(ItemCategory::Process, &name))
        }
        AddBlockedDomain { domain, .. } => {
            DaemonResponse::from_result(engine.add_blocked(ItemCategory::Domain, &domain))
        }
        RemoveBlockedProcess { name, .. } => {
            DaemonResponse::from_result(engine.remove_blocked(ItemCategory::Process, &name))
        }
        RemoveBlockedDomain { domain, .. } => {
            DaemonResponse::from_result(engine.remove_blocked(ItemCategory::Domain, &domain))
        }
        AddToWhitelist { category, value, .. } => {
            DaemonResponse::from_result(engine.set_allowed(category, &value, true))
        }
        RemoveFromWhitelist { category, value, .. } => {
            DaemonResponse::from_result(engine.set_allowed(category, &value, false))
        }

        GetSchedules => DaemonResponse::from_result(Ok(engine.get_schedules())),
        AddSchedule { schedule, .. } => DaemonResponse::from_result(engine.add_schedule(schedule)),
        UpdateSchedule { schedule, .. } => {
            DaemonResponse::from_result(engine.update_schedule(schedule))
        }
        DeleteSchedule { id, .. } => DaemonResponse::from_result(engine.delete_schedule(id)),
        AddPresetSchedule { preset, .. } => {
            DaemonResponse::from_result(engine.add_preset_schedule(preset))
        }
        ShouldBlockNow => DaemonResponse::from_result(Ok(engine.should_block_now())),

        GetBlockingStatus => DaemonResponse::from_result(Ok(engine.get_blocking_status())),
        SetToggles { toggles, .. } => DaemonResponse::from_result(engine.set_toggles(toggles)),
        EnableFirewallBlocking { .. } => {
            DaemonResponse::from_result(engine.set_firewall_blocking(true))
        }
        DisableFirewallBlocking { .. } => {
            DaemonResponse::from_result(engine.set_firewall_blocking(false))
        }
        DisableBrowserDoh { .. } => DaemonResponse::from_result(Ok(engine.disable_browser_doh())),
        EnableBrowserDoh { .. } => DaemonResponse::from_result(Ok(engine.enable_browser_doh())),
        ApplyBlocking => DaemonResponse::from_result(engine.apply_blocking()),
        RunBlockingCheck => DaemonResponse::from_result(engine.run_blocking_check()),
        ListProcesses => DaemonResponse::from_result(engine.list_processes()),
        RecentBlocks { limit } => DaemonResponse::from_result(Ok(engine.recent_blocks(limit))),
        ResetCorruptedStore { .. } => DaemonResponse::from_result(engine.reset_corrupted_store()),

        GetAuthStatus => DaemonResponse::from_result(Ok(engine.get_auth_status())),
        SetupPassword { password } => DaemonResponse::from_result(engine.setup_password(&password)),
        VerifyPassword { password } => {
            DaemonResponse::from_result(engine.verify_password(caller, &password))
        }
        ChangePassword {
            old_password,
            new_password,
        } => DaemonResponse::from_result(engine.change_password(caller, &old_password, &new_password)),
        ResetWithRecovery {
            recovery_secret,
            new_password,
        } => DaemonResponse::from_result(engine.reset_with_recovery(
            caller,
            &recovery_secret,
            &new_password,
        )),
        GetMasterPassword { password } => {
            DaemonResponse::from_result(engine.get_master_password(caller, &password))
        }
        ForceQuitUnconfigured => DaemonResponse::from_result(Ok(engine.force_quit_unconfigured())),
    }
}
