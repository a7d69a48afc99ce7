#[cfg(target_os = "macos")]
use anyhow::{Context, Result};
#[cfg(target_os = "macos")]
use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
use plist::{Dictionary, Value};

/// Merge key-value pairs into /Library/Managed Preferences/{bundle_id}.plist
///
/// Keys not present in `updates` are preserved.
#[cfg(target_os = "macos")]
pub fn write_plist_policy(bundle_id: &str, updates: Vec<(String, Value)>) -> Result<()> {
    let plist_path = get_plist_path(bundle_id);
    let mut dict = read_dictionary(&plist_path)?.unwrap_or_default();

    for (key, value) in updates {
        dict.insert(key, value);
    }

    write_dictionary(&plist_path, dict)
}

/// Remove specific keys from a managed plist, deleting the file once it is empty
#[cfg(target_os = "macos")]
pub fn remove_plist_keys(bundle_id: &str, keys: &[&str]) -> Result<()> {
    let plist_path = get_plist_path(bundle_id);

    let Some(mut dict) = read_dictionary(&plist_path)? else {
        return Ok(());
    };

    for key in keys {
        dict.remove(key);
    }

    if dict.is_empty() {
        std::fs::remove_file(&plist_path)
            .with_context(|| format!("Failed to delete plist file: {}", plist_path.display()))?;
        Ok(())
    } else {
        write_dictionary(&plist_path, dict)
    }
}

/// Read one value from a managed plist
#[cfg(target_os = "macos")]
pub fn read_plist_value(bundle_id: &str, key: &str) -> Result<Option<Value>> {
    let plist_path = get_plist_path(bundle_id);
    Ok(read_dictionary(&plist_path)?.and_then(|dict| dict.get(key).cloned()))
}

/// Write a LaunchDaemon definition that keeps `program_args` alive from boot
#[cfg(target_os = "macos")]
pub fn write_launch_daemon(path: &Path, label: &str, program_args: &[String]) -> Result<()> {
    let mut dict = Dictionary::new();
    dict.insert("Label".to_string(), Value::String(label.to_string()));
    dict.insert(
        "ProgramArguments".to_string(),
        Value::Array(program_args.iter().cloned().map(Value::String).collect()),
    );
    dict.insert("RunAtLoad".to_string(), Value::Boolean(true));
    dict.insert("KeepAlive".to_string(), Value::Boolean(true));
    dict.insert(
        "StandardErrorPath".to_string(),
        Value::String("/var/log/family-guard.log".to_string()),
    );

    write_dictionary(path, dict)
}

#[cfg(target_os = "macos")]
fn read_dictionary(plist_path: &Path) -> Result<Option<Dictionary>> {
    if !plist_path.exists() {
        return Ok(None);
    }

    let file = std::fs::File::open(plist_path)
        .with_context(|| format!("Failed to open plist file: {}", plist_path.display()))?;

    match plist::from_reader(file) {
        Ok(Value::Dictionary(dict)) => Ok(Some(dict)),
        Ok(_) => Ok(Some(Dictionary::new())),
        Err(e) => {
            tracing::warn!(
                "Failed to parse existing plist at {}: {}. Replacing it.",
                plist_path.display(),
                e
            );
            Ok(Some(Dictionary::new()))
        }
    }
}

#[cfg(target_os = "macos")]
fn write_dictionary(plist_path: &Path, dict: Dictionary) -> Result<()> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &Value::Dictionary(dict))
        .with_context(|| format!("Failed to encode plist: {}", plist_path.display()))?;

    crate::platform::common::atomic_write(plist_path, &buf)
        .with_context(|| format!("Failed to write plist file: {}", plist_path.display()))?;
    crate::platform::common::set_permissions_readable_all(plist_path)?;

    Ok(())
}

#[cfg(target_os = "macos")]
fn get_plist_path(bundle_id: &str) -> PathBuf {
    PathBuf::from("/Library/Managed Preferences").join(format!("{bundle_id}.plist"))
}

#[cfg(test)]
#[cfg(target_os = "macos")]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_launch_daemon() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("com.family-guard.daemon.plist");

        write_launch_daemon(
            &path,
            "com.family-guard.daemon",
            &["/usr/local/bin/family-guard".to_string(), "daemon".to_string(), "run".to_string()],
        )
        .unwrap();

        let dict = read_dictionary(&path).unwrap().unwrap();
        assert_eq!(
            dict.get("Label").and_then(|v| v.as_string()),
            Some("com.family-guard.daemon")
        );
        assert_eq!(dict.get("KeepAlive").and_then(|v| v.as_boolean()), Some(true));
    }

    #[test]
    #[ignore] // Requires root privileges
    fn test_write_and_remove_plist_policy() {
        let bundle_id = "com.family-guard.test";
        write_plist_policy(
            bundle_id,
            vec![("DnsOverHttpsMode".to_string(), Value::String("off".to_string()))],
        )
        .unwrap();
        assert!(read_plist_value(bundle_id, "DnsOverHttpsMode").unwrap().is_some());
        remove_plist_keys(bundle_id, &["DnsOverHttpsMode"]).unwrap();
    }
}
