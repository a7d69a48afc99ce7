#[cfg(target_os = "linux")]
use anyhow::{Context, Result};
#[cfg(target_os = "linux")]
use std::path::{Path, PathBuf};

/// Write a JSON policy file
///
/// Creates `{policy_name}.json` in a managed policy directory such as
/// /etc/opt/chrome/policies/managed. Chromium-based browsers merge every file
/// in that directory, so each writer owns its own file.
#[cfg(target_os = "linux")]
pub fn write_json_policy(
    policy_dir: &Path,
    policy_name: &str,
    data: &serde_json::Value,
) -> Result<()> {
    crate::platform::common::ensure_directory_exists(policy_dir)?;

    let policy_path = json_policy_path(policy_dir, policy_name);

    let content =
        serde_json::to_string_pretty(data).context("Failed to serialize JSON policy")?;

    crate::platform::common::atomic_write(&policy_path, content.as_bytes())
        .with_context(|| format!("Failed to write policy file: {}", policy_path.display()))?;

    crate::platform::common::set_permissions_readable_all(&policy_path)?;

    Ok(())
}

/// Read a JSON policy file
///
/// Returns None if the file doesn't exist
#[cfg(target_os = "linux")]
pub fn read_json_policy(policy_dir: &Path, policy_name: &str) -> Result<Option<serde_json::Value>> {
    let policy_path = json_policy_path(policy_dir, policy_name);

    if !policy_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&policy_path)
        .with_context(|| format!("Failed to read policy file: {}", policy_path.display()))?;

    let data: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", policy_path.display()))?;

    Ok(Some(data))
}

/// Remove a JSON policy file
///
/// Also removes the policy directory if it becomes empty
#[cfg(target_os = "linux")]
pub fn remove_json_policy(policy_dir: &Path, policy_name: &str) -> Result<()> {
    let policy_path = json_policy_path(policy_dir, policy_name);

    if policy_path.exists() {
        std::fs::remove_file(&policy_path)
            .with_context(|| format!("Failed to delete policy file: {}", policy_path.display()))?;
    }

    remove_dir_if_empty(policy_dir);

    Ok(())
}

/// Set one key under `"policies"` in a shared policies.json (Firefox)
///
/// Other policies in the file are preserved.
#[cfg(target_os = "linux")]
pub fn merge_policies_key(
    policy_dir: &Path,
    key: &str,
    value: serde_json::Value,
) -> Result<()> {
    let mut document = read_json_policy(policy_dir, "policies")?
        .filter(|v| v.is_object())
        .unwrap_or_else(|| serde_json::json!({}));

    let policies = document
        .as_object_mut()
        .map(|root| {
            root.entry("policies")
                .or_insert_with(|| serde_json::json!({}))
        })
        .context("policies.json root is not an object")?;

    if !policies.is_object() {
        *policies = serde_json::json!({});
    }
    if let Some(map) = policies.as_object_mut() {
        map.insert(key.to_string(), value);
    }

    write_json_policy(policy_dir, "policies", &document)
}

/// Remove one key from `"policies"`; deletes the file if nothing remains
#[cfg(target_os = "linux")]
pub fn remove_policies_key(policy_dir: &Path, key: &str) -> Result<()> {
    let Some(mut document) = read_json_policy(policy_dir, "policies")? else {
        return Ok(());
    };

    let now_empty = match document.get_mut("policies").and_then(|p| p.as_object_mut()) {
        Some(policies) => {
            policies.remove(key);
            policies.is_empty()
        }
        None => return Ok(()),
    };

    if now_empty && document.as_object().map(|o| o.len() == 1).unwrap_or(false) {
        remove_json_policy(policy_dir, "policies")
    } else {
        write_json_policy(policy_dir, "policies", &document)
    }
}

#[cfg(target_os = "linux")]
fn json_policy_path(policy_dir: &Path, policy_name: &str) -> PathBuf {
    policy_dir.join(format!("{policy_name}.json"))
}

#[cfg(target_os = "linux")]
fn remove_dir_if_empty(dir: &Path) {
    if let Ok(mut entries) = std::fs::read_dir(dir) {
        if entries.next().is_none() {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

/// Managed policy directory of each supported browser, relative to `/`
#[cfg(target_os = "linux")]
pub const CHROME_POLICY_DIR: &str = "etc/opt/chrome/policies/managed";
#[cfg(target_os = "linux")]
pub const CHROMIUM_POLICY_DIR: &str = "etc/chromium/policies/managed";
#[cfg(target_os = "linux")]
pub const EDGE_POLICY_DIR: &str = "etc/opt/microsoft/edge/policies/managed";
#[cfg(target_os = "linux")]
pub const BRAVE_POLICY_DIR: &str = "etc/brave/policies/managed";
#[cfg(target_os = "linux")]
pub const FIREFOX_POLICY_DIR: &str = "etc/firefox/policies";

#[cfg(test)]
#[cfg(target_os = "linux")]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_remove_json_policy() {
        let temp_dir = tempdir().unwrap();
        let policy_dir = temp_dir.path().join("managed");
        let data = json!({ "DnsOverHttpsMode": "off" });

        write_json_policy(&policy_dir, "family-guard", &data).unwrap();
        assert_eq!(
            read_json_policy(&policy_dir, "family-guard").unwrap(),
            Some(data)
        );

        remove_json_policy(&policy_dir, "family-guard").unwrap();
        assert_eq!(read_json_policy(&policy_dir, "family-guard").unwrap(), None);
        assert!(!policy_dir.exists());
    }

    #[test]
    fn test_merge_policies_key_preserves_other_policies() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();
        std::fs::write(
            dir.join("policies.json"),
            r#"{"policies":{"DisableTelemetry":true}}"#,
        )
        .unwrap();

        merge_policies_key(dir, "DNSOverHTTPS", json!({ "Enabled": false, "Locked": true }))
            .unwrap();
        let doc = read_json_policy(dir, "policies").unwrap().unwrap();
        assert_eq!(doc["policies"]["DisableTelemetry"], true);
        assert_eq!(doc["policies"]["DNSOverHTTPS"]["Locked"], true);

        remove_policies_key(dir, "DNSOverHTTPS").unwrap();
        let doc = read_json_policy(dir, "policies").unwrap().unwrap();
        assert!(doc["policies"].get("DNSOverHTTPS").is_none());
        assert_eq!(doc["policies"]["DisableTelemetry"], true);
    }

    #[test]
    fn test_remove_last_policies_key_deletes_file() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("firefox");

        merge_policies_key(&dir, "DNSOverHTTPS", json!({ "Enabled": false })).unwrap();
        remove_policies_key(&dir, "DNSOverHTTPS").unwrap();

        assert!(!dir.join("policies.json").exists());
    }
}
