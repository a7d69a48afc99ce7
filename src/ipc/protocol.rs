//! Newline-delimited JSON messages between clients and the daemon.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{GuardError, GuardResult, WireError};
use crate::policy::{ItemCategory, TogglesUpdate};
use crate::schedule::{Schedule, ScheduleInput, SchedulePreset};

/// Longest accepted request line
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// A request from a client
///
/// Policy mutations carry the parent password, which the daemon requires once
/// one is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DaemonRequest {
    Ping,
    GetStatus,
    /// Stop the daemon; needs the parent password once one is configured
    Shutdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    GetBlocklists,
    AddBlockedProcess {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    AddBlockedDomain {
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    RemoveBlockedProcess {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    RemoveBlockedDomain {
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    AddToWhitelist {
        category: ItemCategory,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    RemoveFromWhitelist {
        category: ItemCategory,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    GetSchedules,
    AddSchedule {
        schedule: ScheduleInput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    UpdateSchedule {
        schedule: Schedule,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    DeleteSchedule {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    AddPresetSchedule {
        preset: SchedulePreset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    ShouldBlockNow,

    GetBlockingStatus,
    SetToggles {
        toggles: TogglesUpdate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    EnableFirewallBlocking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    DisableFirewallBlocking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    DisableBrowserDoh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    EnableBrowserDoh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    ApplyBlocking,
    RunBlockingCheck,
    ListProcesses,
    RecentBlocks {
        #[serde(default)]
        limit: Option<usize>,
    },
    ResetCorruptedStore {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    GetAuthStatus,
    SetupPassword { password: String },
    VerifyPassword { password: String },
    ChangePassword { old_password: String, new_password: String },
    ResetWithRecovery { recovery_secret: String, new_password: String },
    GetMasterPassword { password: String },
    /// Whether an unprivileged client may exit without a password
    ForceQuitUnconfigured,
}

impl DaemonRequest {
    /// Name for logs; never includes arguments, which may hold passwords
    pub fn name(&self) -> &'static str {
        match self {
            DaemonRequest::Ping => "ping",
            DaemonRequest::GetStatus => "get_status",
            DaemonRequest::Shutdown { .. } => "shutdown",
            DaemonRequest::GetBlocklists => "get_blocklists",
            DaemonRequest::AddBlockedProcess { .. } => "add_blocked_process",
            DaemonRequest::AddBlockedDomain { .. } => "add_blocked_domain",
            DaemonRequest::RemoveBlockedProcess { .. } => "remove_blocked_process",
            DaemonRequest::RemoveBlockedDomain { .. } => "remove_blocked_domain",
            DaemonRequest::AddToWhitelist { .. } => "add_to_whitelist",
            DaemonRequest::RemoveFromWhitelist { .. } => "remove_from_whitelist",
            DaemonRequest::GetSchedules => "get_schedules",
            DaemonRequest::AddSchedule { .. } => "add_schedule",
            DaemonRequest::UpdateSchedule { .. } => "update_schedule",
            DaemonRequest::DeleteSchedule { .. } => "delete_schedule",
            DaemonRequest::AddPresetSchedule { .. } => "add_preset_schedule",
            DaemonRequest::ShouldBlockNow => "should_block_now",
            DaemonRequest::GetBlockingStatus => "get_blocking_status",
            DaemonRequest::SetToggles { .. } => "set_toggles",
            DaemonRequest::EnableFirewallBlocking { .. } => "enable_firewall_blocking",
            DaemonRequest::DisableFirewallBlocking { .. } => "disable_firewall_blocking",
            DaemonRequest::DisableBrowserDoh { .. } => "disable_browser_doh",
            DaemonRequest::EnableBrowserDoh { .. } => "enable_browser_doh",
            DaemonRequest::ApplyBlocking => "apply_blocking",
            DaemonRequest::RunBlockingCheck => "run_blocking_check",
            DaemonRequest::ListProcesses => "list_processes",
            DaemonRequest::RecentBlocks { .. } => "recent_blocks",
            DaemonRequest::ResetCorruptedStore { .. } => "reset_corrupted_store",
            DaemonRequest::GetAuthStatus => "get_auth_status",
            DaemonRequest::SetupPassword { .. } => "setup_password",
            DaemonRequest::VerifyPassword { .. } => "verify_password",
            DaemonRequest::ChangePassword { .. } => "change_password",
            DaemonRequest::ResetWithRecovery { .. } => "reset_with_recovery",
            DaemonRequest::GetMasterPassword { .. } => "get_master_password",
            DaemonRequest::ForceQuitUnconfigured => "force_quit_unconfigured",
        }
    }

    /// Changes the stored policy or weakens enforcement, so only the parent may send it
    pub fn is_policy_mutation(&self) -> bool {
        use DaemonRequest::*;

        matches!(
            self,
            AddBlockedProcess { .. }
                | AddBlockedDomain { .. }
                | RemoveBlockedProcess { .. }
                | RemoveBlockedDomain { .. }
                | AddToWhitelist { .. }
                | RemoveFromWhitelist { .. }
                | AddSchedule { .. }
                | UpdateSchedule { .. }
                | DeleteSchedule { .. }
                | AddPresetSchedule { .. }
                | SetToggles { .. }
                | EnableFirewallBlocking { .. }
                | DisableFirewallBlocking { .. }
                | DisableBrowserDoh { .. }
                | EnableBrowserDoh { .. }
                | ResetCorruptedStore { .. }
        )
    }

    /// The parent password a policy mutation or shutdown was sent with
    pub fn parent_password(&self) -> Option<&str> {
        use DaemonRequest::*;

        match self {
            Shutdown { password }
            | AddBlockedProcess { password, .. }
            | AddBlockedDomain { password, .. }
            | RemoveBlockedProcess { password, .. }
            | RemoveBlockedDomain { password, .. }
            | AddToWhitelist { password, .. }
            | RemoveFromWhitelist { password, .. }
            | AddSchedule { password, .. }
            | UpdateSchedule { password, .. }
            | DeleteSchedule { password, .. }
            | AddPresetSchedule { password, .. }
            | SetToggles { password, .. }
            | EnableFirewallBlocking { password }
            | DisableFirewallBlocking { password }
            | DisableBrowserDoh { password }
            | EnableBrowserDoh { password }
            | ResetCorruptedStore { password } => password.as_deref(),
            _ => None,
        }
    }

    /// Attach the parent password to a policy mutation or shutdown; other requests are unchanged
    pub fn with_parent_password(mut self, parent: Option<String>) -> Self {
        use DaemonRequest::*;

        match &mut self {
            Shutdown { password }
            | AddBlockedProcess { password, .. }
            | AddBlockedDomain { password, .. }
            | RemoveBlockedProcess { password, .. }
            | RemoveBlockedDomain { password, .. }
            | AddToWhitelist { password, .. }
            | RemoveFromWhitelist { password, .. }
            | AddSchedule { password, .. }
            | UpdateSchedule { password, .. }
            | DeleteSchedule { password, .. }
            | AddPresetSchedule { password, .. }
            | SetToggles { password, .. }
            | EnableFirewallBlocking { password }
            | DisableFirewallBlocking { password }
            | DisableBrowserDoh { password }
            | EnableBrowserDoh { password }
            | ResetCorruptedStore { password } => *password = parent,
            _ => {}
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaemonResponse {
    Ok {
        #[serde(default)]
        data: serde_json::Value,
    },
    Err {
        error: WireError,
    },
}

impl DaemonResponse {
    pub fn from_result<T: Serialize>(result: GuardResult<T>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(GuardError::from)) {
            Ok(data) => DaemonResponse::Ok { data },
            Err(e) => DaemonResponse::Err {
                error: e.into_wire(),
            },
        }
    }

    /// Decode the payload, turning a daemon-side error back into [`GuardError::Remote`]
    pub fn into_result<T: DeserializeOwned>(self) -> GuardResult<T> {
        match self {
            DaemonResponse::Ok { data } => Ok(serde_json::from_value(data)?),
            DaemonResponse::Err { error } => Err(GuardError::Remote(error)),
        }
    }
}

pub fn encode_line<T: Serialize>(message: &T) -> GuardResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagged_by_command() {
        let json = serde_json::to_value(DaemonRequest::AddBlockedDomain {
            domain: "example.com".into(),
            password: None,
        })
        .unwrap();
        assert_eq!(json["command"], "add_blocked_domain");
        assert_eq!(json["domain"], "example.com");
        assert!(json.get("password").is_none());

        let parsed: DaemonRequest =
            serde_json::from_str(r#"{"command":"recent_blocks"}"#).unwrap();
        assert_eq!(parsed, DaemonRequest::RecentBlocks { limit: None });
    }

    #[test]
    fn test_whitelist_request_uses_lowercase_category() {
        let parsed: DaemonRequest = serde_json::from_str(
            r#"{"command":"add_to_whitelist","category":"process","value":"minecraft"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            DaemonRequest::AddToWhitelist {
                category: ItemCategory::Process,
                value: "minecraft".into(),
                password: None,
            }
        );
    }

    #[test]
    fn test_parent_password_travels_with_mutations() {
        let parsed: DaemonRequest = serde_json::from_str(
            r#"{"command":"disable_firewall_blocking","password":"parent-pw"}"#,
        )
        .unwrap();
        assert!(parsed.is_policy_mutation());
        assert_eq!(parsed.parent_password(), Some("parent-pw"));

        let bare: DaemonRequest =
            serde_json::from_str(r#"{"command":"disable_firewall_blocking"}"#).unwrap();
        assert_eq!(bare.parent_password(), None);
        assert_eq!(bare.with_parent_password(Some("parent-pw".into())), parsed);

        assert!(!DaemonRequest::GetBlocklists.is_policy_mutation());
        assert!(!DaemonRequest::RunBlockingCheck.is_policy_mutation());
        assert_eq!(
            DaemonRequest::Ping.with_parent_password(Some("pw".into())),
            DaemonRequest::Ping
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<DaemonRequest>(r#"{"command":"format_disk"}"#).is_err());
    }

    #[test]
    fn test_error_response_keeps_kind() {
        let response =
            DaemonResponse::from_result::<()>(Err(GuardError::ImmutableDefault("steam".into())));
        let line = encode_line(&response).unwrap();
        assert!(line.ends_with('\n'));

        let decoded: DaemonResponse = serde_json::from_str(line.trim_end()).unwrap();
        let err = decoded.into_result::<()>().unwrap_err();
        assert_eq!(err.kind(), "ImmutableDefaultError");
        assert!(err.to_string().contains("steam"));
    }

    #[test]
    fn test_ok_response_decodes_payload() {
        let response = DaemonResponse::from_result(Ok(vec!["steam", "roblox"]));
        let names: Vec<String> = response.into_result().unwrap();
        assert_eq!(names, vec!["steam", "roblox"]);
    }

    #[test]
    fn test_request_name_hides_arguments() {
        let request = DaemonRequest::VerifyPassword {
            password: "hunter22".into(),
        };
        assert_eq!(request.name(), "verify_password");
    }
}
