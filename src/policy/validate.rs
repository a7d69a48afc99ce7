//! Input validation and normalisation for blocklist values.

use url::{Host, Url};

use super::model::ItemCategory;
use crate::error::{GuardError, GuardResult};

const MAX_PROCESS_NAME_LEN: usize = 255;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Validate `raw` for `category` and return its canonical form
pub fn normalize(category: ItemCategory, raw: &str) -> GuardResult<String> {
    match category {
        ItemCategory::Process => normalize_process(raw),
        ItemCategory::Domain => normalize_domain(raw),
    }
}

/// Lowercased process name, no path components or control characters
pub fn normalize_process(raw: &str) -> GuardResult<String> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(GuardError::Validation("process name must not be empty".into()));
    }
    if name.chars().count() > MAX_PROCESS_NAME_LEN {
        return Err(GuardError::Validation(format!(
            "process name is longer than {MAX_PROCESS_NAME_LEN} characters"
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(GuardError::Validation(format!(
            "'{name}' looks like a path; use the executable name only"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(GuardError::Validation(
            "process name contains control characters".into(),
        ));
    }

    Ok(name.to_lowercase())
}

/// Lowercased ASCII (punycode) host name
///
/// A pasted URL is reduced to its host. IP addresses and single-label names
/// are rejected because hosts-file interception cannot block them.
pub fn normalize_domain(raw: &str) -> GuardResult<String> {
    let input = raw.trim().trim_end_matches('.');
    if input.is_empty() {
        return Err(GuardError::Validation("domain must not be empty".into()));
    }

    let host_text = if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| GuardError::Validation(format!("invalid URL '{input}': {e}")))?;
        url.host_str()
            .ok_or_else(|| GuardError::Validation(format!("URL '{input}' has no host")))?
            .to_string()
    } else {
        input.to_string()
    };

    let host = Host::parse(&host_text)
        .map_err(|e| GuardError::Validation(format!("invalid domain '{input}': {e}")))?;

    let domain = match host {
        Host::Domain(d) => d.to_lowercase(),
        Host::Ipv4(_) | Host::Ipv6(_) => {
            return Err(GuardError::Validation(format!(
                "'{input}' is an IP address; only domain names can be blocked"
            )));
        }
    };

    check_domain_syntax(&domain).map_err(|reason| {
        GuardError::Validation(format!("invalid domain '{input}': {reason}"))
    })?;

    Ok(domain)
}

fn check_domain_syntax(domain: &str) -> Result<(), &'static str> {
    if domain.len() > MAX_DOMAIN_LEN {
        return Err("name is too long");
    }
    if !domain.contains('.') {
        return Err("expected a name with at least two labels");
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err("empty or over-long label");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("label starts or ends with '-'");
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("unsupported character");
        }
    }
    Ok(())
}

/// Process name with a trailing `.exe` or `.app` removed, for matching
pub fn process_stem(name: &str) -> &str {
    name.strip_suffix(".exe")
        .or_else(|| name.strip_suffix(".app"))
        .unwrap_or(name)
}

/// `domain` equals `parent` or is a subdomain of it
pub fn domain_matches(domain: &str, parent: &str) -> bool {
    domain == parent
        || (domain.len() > parent.len()
            && domain.ends_with(parent)
            && domain.as_bytes()[domain.len() - parent.len() - 1] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_names_are_lowercased() {
        assert_eq!(normalize_process("  Steam.EXE ").unwrap(), "steam.exe");
        assert_eq!(normalize_process("Epic Games Launcher").unwrap(), "epic games launcher");
    }

    #[test]
    fn test_process_name_rejections() {
        for bad in ["", "   ", "/usr/bin/steam", "C:\\Games\\game.exe", "game\u{7}.exe"] {
            let err = normalize_process(bad).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "accepted {bad:?}");
        }
        assert!(normalize_process(&"a".repeat(256)).is_err());
        assert!(normalize_process(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn test_domains_are_normalised() {
        assert_eq!(normalize_domain("Example.COM").unwrap(), "example.com");
        assert_eq!(normalize_domain("example.com.").unwrap(), "example.com");
        assert_eq!(
            normalize_domain("https://www.Example.com/some/path?q=1").unwrap(),
            "www.example.com"
        );
        assert_eq!(normalize_domain("bücher.de").unwrap(), "xn--bcher-kva.de");
    }

    #[test]
    fn test_domain_rejections() {
        for bad in ["", "localhost", "192.168.1.1", "exa mple.com", "-bad.com", "a..b", "https://"] {
            let err = normalize_domain(bad).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "accepted {bad:?}");
        }
    }

    #[test]
    fn test_process_stem() {
        assert_eq!(process_stem("steam.exe"), "steam");
        assert_eq!(process_stem("discord.app"), "discord");
        assert_eq!(process_stem("battle.net"), "battle.net");
    }

    #[test]
    fn test_domain_matches() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("api.example.com", "example.com"));
        assert!(!domain_matches("badexample.com", "example.com"));
        assert!(!domain_matches("example.com", "api.example.com"));
    }
}
