#[cfg(target_os = "windows")]
use anyhow::{Context, Result};

#[cfg(target_os = "windows")]
use winreg::RegKey;
#[cfg(target_os = "windows")]
use winreg::enums::*;

/// Registry value types
#[cfg(target_os = "windows")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    Dword(u32),
    String(String),
}

/// Write a single named value under HKLM, creating the key if needed
#[cfg(target_os = "windows")]
pub fn write_registry_value(key_path: &str, value_name: &str, value: &RegistryValue) -> Result<()> {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    let (key, _) = hklm
        .create_subkey(key_path)
        .with_context(|| format!("Failed to create registry key: HKLM\\{}", key_path))?;

    match value {
        RegistryValue::Dword(val) => key.set_value(value_name, val),
        RegistryValue::String(val) => key.set_value(value_name, val),
    }
    .with_context(|| format!("Failed to set registry value: HKLM\\{}\\{}", key_path, value_name))?;

    Ok(())
}

/// Read a string value under HKLM; None if the key or value is missing
#[cfg(target_os = "windows")]
pub fn read_registry_string(key_path: &str, value_name: &str) -> Result<Option<String>> {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    match hklm.open_subkey(key_path) {
        Ok(key) => match key.get_value::<String, _>(value_name) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read registry value: HKLM\\{}\\{}", key_path, value_name)
            }),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to open registry key: HKLM\\{}", key_path)),
    }
}

/// Read a DWORD value under HKLM; None if the key or value is missing
#[cfg(target_os = "windows")]
pub fn read_registry_dword(key_path: &str, value_name: &str) -> Result<Option<u32>> {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    match hklm.open_subkey(key_path) {
        Ok(key) => match key.get_value::<u32, _>(value_name) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read registry value: HKLM\\{}\\{}", key_path, value_name)
            }),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to open registry key: HKLM\\{}", key_path)),
    }
}

/// Remove a single named value; missing keys and values are not an error
#[cfg(target_os = "windows")]
pub fn remove_registry_value(key_path: &str, value_name: &str) -> Result<()> {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    match hklm.open_subkey_with_flags(key_path, KEY_WRITE) {
        Ok(key) => match key.delete_value(value_name) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to delete registry value: HKLM\\{}\\{}", key_path, value_name)
            }),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to open registry key: HKLM\\{}", key_path)),
    }
}

/// Policy keys of each supported Chromium-based browser
#[cfg(target_os = "windows")]
pub const CHROME_POLICY_KEY: &str = r"SOFTWARE\Policies\Google\Chrome";
#[cfg(target_os = "windows")]
pub const CHROMIUM_POLICY_KEY: &str = r"SOFTWARE\Policies\Chromium";
#[cfg(target_os = "windows")]
pub const EDGE_POLICY_KEY: &str = r"SOFTWARE\Policies\Microsoft\Edge";
#[cfg(target_os = "windows")]
pub const BRAVE_POLICY_KEY: &str = r"SOFTWARE\Policies\BraveSoftware\Brave";
#[cfg(target_os = "windows")]
pub const FIREFOX_DOH_POLICY_KEY: &str = r"SOFTWARE\Policies\Mozilla\Firefox\DNSOverHTTPS";

#[cfg(test)]
#[cfg(target_os = "windows")]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Modifies HKLM, requires Administrator
    fn test_write_read_and_remove_registry_value() {
        let test_key = r"SOFTWARE\FamilyGuardTest";

        write_registry_value(test_key, "DnsOverHttpsMode", &RegistryValue::String("off".into()))
            .unwrap();
        assert_eq!(
            read_registry_string(test_key, "DnsOverHttpsMode").unwrap(),
            Some("off".to_string())
        );

        remove_registry_value(test_key, "DnsOverHttpsMode").unwrap();
        assert_eq!(read_registry_string(test_key, "DnsOverHttpsMode").unwrap(), None);
    }
}
