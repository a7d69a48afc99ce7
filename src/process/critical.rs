//! Processes that are never terminated, whatever the policy says.
//!
//! Distinct from the user whitelist: this set cannot be edited and is checked
//! before the policy is consulted.

use crate::policy::validate::process_stem;

const CRITICAL_PROCESSES: &[&str] = &[
    // Linux
    "systemd",
    "init",
    "kthreadd",
    "systemd-journald",
    "systemd-logind",
    "systemd-udevd",
    "systemd-resolved",
    "dbus-daemon",
    "dbus-broker",
    "polkitd",
    "networkmanager",
    "wpa_supplicant",
    "sshd",
    "login",
    "agetty",
    "xorg",
    "xwayland",
    "gdm",
    "gdm3",
    "sddm",
    "lightdm",
    "gnome-shell",
    "gnome-session-binary",
    "kwin_x11",
    "kwin_wayland",
    "plasmashell",
    "pipewire",
    "pulseaudio",
    // macOS
    "launchd",
    "kernel_task",
    "windowserver",
    "loginwindow",
    "finder",
    "dock",
    "systemuiserver",
    "coreaudiod",
    "securityd",
    "opendirectoryd",
    "cfprefsd",
    "distnoted",
    "mds",
    "notifyd",
    "configd",
    // Windows
    "system",
    "registry",
    "memory compression",
    "smss",
    "csrss",
    "wininit",
    "winlogon",
    "services",
    "lsass",
    "lsaiso",
    "svchost",
    "explorer",
    "dwm",
    "fontdrvhost",
    "sihost",
    "ctfmon",
    "spoolsv",
    "taskmgr",
    // Ourselves, under any pid
    "family-guard",
];

/// Whether `name` belongs to the non-removable exclusion set
pub fn is_critical(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    let stem = process_stem(&lower);
    CRITICAL_PROCESSES.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_matching_ignores_case_and_suffix() {
        assert!(is_critical("explorer.exe"));
        assert!(is_critical("WindowServer"));
        assert!(is_critical("Finder.app"));
        assert!(is_critical("systemd"));
        assert!(is_critical("family-guard"));
    }

    #[test]
    fn test_ordinary_processes_are_not_critical() {
        assert!(!is_critical("steam"));
        assert!(!is_critical("chrome.exe"));
        assert!(!is_critical("systemd-but-not-really"));
    }
}
