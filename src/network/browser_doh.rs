//! Managed browser policies turning off built-in DNS-over-HTTPS.
//!
//! Best effort and not atomic: each browser is configured independently and
//! the report lists the ones that succeeded. This is separate from the DoH
//! firewall, which works regardless of browser cooperation.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Chromium,
    Edge,
    Brave,
    Firefox,
}

impl Browser {
    pub const ALL: [Browser; 5] = [
        Browser::Chrome,
        Browser::Chromium,
        Browser::Edge,
        Browser::Brave,
        Browser::Firefox,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Browser::Chrome => "Google Chrome",
            Browser::Chromium => "Chromium",
            Browser::Edge => "Microsoft Edge",
            Browser::Brave => "Brave",
            Browser::Firefox => "Firefox",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserDohReport {
    pub doh_disabled: bool,
    pub doh_configured_browsers: Vec<String>,
}

/// Chromium policy name and value
const CHROMIUM_DOH_POLICY: &str = "DnsOverHttpsMode";
const CHROMIUM_DOH_OFF: &str = "off";
/// Firefox policy name
const FIREFOX_DOH_POLICY: &str = "DNSOverHTTPS";

fn run_all<F>(action: &str, mut op: F) -> Vec<String>
where
    F: FnMut(Browser) -> anyhow::Result<()>,
{
    let mut done = Vec::new();
    for browser in Browser::ALL {
        match op(browser) {
            Ok(()) => done.push(browser.name().to_string()),
            Err(e) => warn!("Failed to {} for {}: {:#}", action, browser.name(), e),
        }
    }
    done
}

/// Write DoH-off policies for every supported browser
pub fn disable_browser_doh() -> BrowserDohReport {
    let configured = run_all("disable DoH", imp::disable);
    info!("Browser DoH disabled for: {}", configured.join(", "));
    BrowserDohReport {
        doh_disabled: !configured.is_empty(),
        doh_configured_browsers: configured,
    }
}

/// Remove the DoH policies again; the report lists browsers still locked
pub fn enable_browser_doh() -> BrowserDohReport {
    let cleared = run_all("re-enable DoH", imp::enable);
    info!("Browser DoH policies removed for: {}", cleared.join(", "));
    browser_doh_status()
}

pub fn is_doh_disabled() -> bool {
    Browser::ALL.into_iter().any(imp::is_disabled)
}

/// Current per-browser state without changing anything
pub fn browser_doh_status() -> BrowserDohReport {
    let configured: Vec<String> = Browser::ALL
        .into_iter()
        .filter(|b| imp::is_disabled(*b))
        .map(|b| b.name().to_string())
        .collect();
    BrowserDohReport {
        doh_disabled: !configured.is_empty(),
        doh_configured_browsers: configured,
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::Browser;
    use std::path::Path;

    pub(super) fn disable(browser: Browser) -> anyhow::Result<()> {
        linux_root::disable(Path::new("/"), browser)
    }

    pub(super) fn enable(browser: Browser) -> anyhow::Result<()> {
        linux_root::enable(Path::new("/"), browser)
    }

    pub(super) fn is_disabled(browser: Browser) -> bool {
        linux_root::is_disabled(Path::new("/"), browser)
    }

    /// Same operations against an alternate filesystem root
    pub(crate) mod linux_root {
        use super::super::{
            Browser, CHROMIUM_DOH_OFF, CHROMIUM_DOH_POLICY, FIREFOX_DOH_POLICY,
        };
        use crate::platform::linux::{
            self, BRAVE_POLICY_DIR, CHROME_POLICY_DIR, CHROMIUM_POLICY_DIR, EDGE_POLICY_DIR,
            FIREFOX_POLICY_DIR,
        };
        use serde_json::json;
        use std::path::{Path, PathBuf};

        const POLICY_FILE: &str = "family-guard-doh";

        fn chromium_dir(root: &Path, browser: Browser) -> Option<PathBuf> {
            let dir = match browser {
                Browser::Chrome => CHROME_POLICY_DIR,
                Browser::Chromium => CHROMIUM_POLICY_DIR,
                Browser::Edge => EDGE_POLICY_DIR,
                Browser::Brave => BRAVE_POLICY_DIR,
                Browser::Firefox => return None,
            };
            Some(root.join(dir))
        }

        pub fn disable(root: &Path, browser: Browser) -> anyhow::Result<()> {
            match chromium_dir(root, browser) {
                Some(dir) => linux::write_json_policy(
                    &dir,
                    POLICY_FILE,
                    &json!({ CHROMIUM_DOH_POLICY: CHROMIUM_DOH_OFF }),
                ),
                None => linux::merge_policies_key(
                    &root.join(FIREFOX_POLICY_DIR),
                    FIREFOX_DOH_POLICY,
                    json!({ "Enabled": false, "Locked": true }),
                ),
            }
        }

        pub fn enable(root: &Path, browser: Browser) -> anyhow::Result<()> {
            match chromium_dir(root, browser) {
                Some(dir) => linux::remove_json_policy(&dir, POLICY_FILE),
                None => linux::remove_policies_key(&root.join(FIREFOX_POLICY_DIR), FIREFOX_DOH_POLICY),
            }
        }

        pub fn is_disabled(root: &Path, browser: Browser) -> bool {
            match chromium_dir(root, browser) {
                Some(dir) => linux::read_json_policy(&dir, POLICY_FILE)
                    .ok()
                    .flatten()
                    .is_some_and(|v| v[CHROMIUM_DOH_POLICY] == CHROMIUM_DOH_OFF),
                None => linux::read_json_policy(&root.join(FIREFOX_POLICY_DIR), "policies")
                    .ok()
                    .flatten()
                    .is_some_and(|v| v["policies"][FIREFOX_DOH_POLICY]["Enabled"] == false),
            }
        }
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::{Browser, CHROMIUM_DOH_OFF, CHROMIUM_DOH_POLICY, FIREFOX_DOH_POLICY};
    use crate::platform::macos;
    use plist::{Dictionary, Value};

    fn bundle_id(browser: Browser) -> &'static str {
        match browser {
            Browser::Chrome => "com.google.Chrome",
            Browser::Chromium => "org.chromium.Chromium",
            Browser::Edge => "com.microsoft.Edge",
            Browser::Brave => "com.brave.Browser",
            Browser::Firefox => "org.mozilla.firefox",
        }
    }

    pub(super) fn disable(browser: Browser) -> anyhow::Result<()> {
        let entry = match browser {
            Browser::Firefox => {
                let mut doh = Dictionary::new();
                doh.insert("Enabled".to_string(), Value::Boolean(false));
                doh.insert("Locked".to_string(), Value::Boolean(true));
                (FIREFOX_DOH_POLICY.to_string(), Value::Dictionary(doh))
            }
            _ => (
                CHROMIUM_DOH_POLICY.to_string(),
                Value::String(CHROMIUM_DOH_OFF.to_string()),
            ),
        };
        macos::write_plist_policy(bundle_id(browser), vec![entry])
    }

    pub(super) fn enable(browser: Browser) -> anyhow::Result<()> {
        let key = match browser {
            Browser::Firefox => FIREFOX_DOH_POLICY,
            _ => CHROMIUM_DOH_POLICY,
        };
        macos::remove_plist_keys(bundle_id(browser), &[key])
    }

    pub(super) fn is_disabled(browser: Browser) -> bool {
        match browser {
            Browser::Firefox => macos::read_plist_value(bundle_id(browser), FIREFOX_DOH_POLICY)
                .ok()
                .flatten()
                .and_then(|v| v.as_dictionary().and_then(|d| d.get("Enabled")).and_then(Value::as_boolean))
                == Some(false),
            _ => macos::read_plist_value(bundle_id(browser), CHROMIUM_DOH_POLICY)
                .ok()
                .flatten()
                .is_some_and(|v| v.as_string() == Some(CHROMIUM_DOH_OFF)),
        }
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use super::{Browser, CHROMIUM_DOH_OFF, CHROMIUM_DOH_POLICY};
    use crate::platform::windows::{self, RegistryValue};

    fn chromium_key(browser: Browser) -> Option<&'static str> {
        match browser {
            Browser::Chrome => Some(windows::CHROME_POLICY_KEY),
            Browser::Chromium => Some(windows::CHROMIUM_POLICY_KEY),
            Browser::Edge => Some(windows::EDGE_POLICY_KEY),
            Browser::Brave => Some(windows::BRAVE_POLICY_KEY),
            Browser::Firefox => None,
        }
    }

    pub(super) fn disable(browser: Browser) -> anyhow::Result<()> {
        match chromium_key(browser) {
            Some(key) => windows::write_registry_value(
                key,
                CHROMIUM_DOH_POLICY,
                &RegistryValue::String(CHROMIUM_DOH_OFF.to_string()),
            ),
            None => {
                windows::write_registry_value(
                    windows::FIREFOX_DOH_POLICY_KEY,
                    "Enabled",
                    &RegistryValue::Dword(0),
                )?;
                windows::write_registry_value(
                    windows::FIREFOX_DOH_POLICY_KEY,
                    "Locked",
                    &RegistryValue::Dword(1),
                )
            }
        }
    }

    pub(super) fn enable(browser: Browser) -> anyhow::Result<()> {
        match chromium_key(browser) {
            Some(key) => windows::remove_registry_value(key, CHROMIUM_DOH_POLICY),
            None => {
                windows::remove_registry_value(windows::FIREFOX_DOH_POLICY_KEY, "Enabled")?;
                windows::remove_registry_value(windows::FIREFOX_DOH_POLICY_KEY, "Locked")
            }
        }
    }

    pub(super) fn is_disabled(browser: Browser) -> bool {
        match chromium_key(browser) {
            Some(key) => windows::read_registry_string(key, CHROMIUM_DOH_POLICY)
                .ok()
                .flatten()
                .is_some_and(|v| v == CHROMIUM_DOH_OFF),
            // The Firefox policy is a DWORD; its presence is what we wrote
            None => windows::read_registry_dword(windows::FIREFOX_DOH_POLICY_KEY, "Enabled")
                .ok()
                .flatten()
                == Some(0),
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod imp {
    use super::Browser;

    pub(super) fn disable(_browser: Browser) -> anyhow::Result<()> {
        anyhow::bail!("browser policies are not supported on this platform")
    }

    pub(super) fn enable(_browser: Browser) -> anyhow::Result<()> {
        Ok(())
    }

    pub(super) fn is_disabled(_browser: Browser) -> bool {
        false
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::imp::linux_root;
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn test_disable_writes_chromium_and_firefox_policies() {
        let root = assert_fs::TempDir::new().unwrap();
        for browser in Browser::ALL {
            linux_root::disable(root.path(), browser).unwrap();
            assert!(linux_root::is_disabled(root.path(), browser), "{}", browser.name());
        }

        root.child("etc/opt/chrome/policies/managed/family-guard-doh.json")
            .assert(predicate::str::contains("\"DnsOverHttpsMode\": \"off\""));
        root.child("etc/firefox/policies/policies.json")
            .assert(predicate::str::contains("\"Locked\": true"));
    }

    #[test]
    fn test_enable_preserves_other_firefox_policies() {
        let root = assert_fs::TempDir::new().unwrap();
        root.child("etc/firefox/policies/policies.json")
            .write_str(r#"{"policies":{"DisableTelemetry":true}}"#)
            .unwrap();

        linux_root::disable(root.path(), Browser::Firefox).unwrap();
        linux_root::enable(root.path(), Browser::Firefox).unwrap();

        assert!(!linux_root::is_disabled(root.path(), Browser::Firefox));
        root.child("etc/firefox/policies/policies.json")
            .assert(predicate::str::contains("DisableTelemetry"));
    }

    #[test]
    fn test_enable_removes_chromium_policy_file() {
        let root = assert_fs::TempDir::new().unwrap();
        linux_root::disable(root.path(), Browser::Brave).unwrap();
        linux_root::enable(root.path(), Browser::Brave).unwrap();

        root.child("etc/brave/policies/managed/family-guard-doh.json")
            .assert(predicate::path::missing());
        assert!(!linux_root::is_disabled(root.path(), Browser::Brave));
    }

    #[test]
    fn test_report_uses_camel_case() {
        let report = BrowserDohReport {
            doh_disabled: true,
            doh_configured_browsers: vec!["Firefox".into()],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["dohDisabled"], true);
        assert_eq!(json["dohConfiguredBrowsers"][0], "Firefox");
    }
}
