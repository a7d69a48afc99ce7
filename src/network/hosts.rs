//! Managed section of the system hosts file.
//!
//! All entries live between a begin and an end marker. Everything outside
//! the markers is preserved byte for byte across apply and retract.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{GuardError, GuardResult};
use crate::platform::CommandRunner;

const BEGIN_MARKER: &str = "# >>> family-guard managed block >>>";
/// Begin marker used when a newline had to be added before the section
const BEGIN_MARKER_JOINED: &str = "# >>> family-guard managed block (joined) >>>";
const END_MARKER: &str = "# <<< family-guard managed block <<<";
const FINGERPRINT_PREFIX: &str = "# fingerprint: ";

/// Render the section for `domains` (each also gets its `www.` variant)
pub fn render_section(domains: &BTreeSet<String>, redirect: &str, fingerprint: &str) -> String {
    let mut section = String::new();
    section.push_str("# Entries below are managed by family-guard. Do not edit.\n");
    section.push_str(FINGERPRINT_PREFIX);
    section.push_str(fingerprint);
    section.push('\n');

    for domain in domains {
        section.push_str(&format!("{redirect} {domain}\n"));
        if !domain.starts_with("www.") && !domains.contains(&format!("www.{domain}")) {
            section.push_str(&format!("{redirect} www.{domain}\n"));
        }
    }
    section
}

/// Byte range of the managed section, including the joined newline if any
fn section_range(content: &str) -> Option<(usize, usize)> {
    let (begin, joined) = match find_line(content, BEGIN_MARKER) {
        Some(pos) => (pos, false),
        None => (find_line(content, BEGIN_MARKER_JOINED)?, true),
    };

    let end_marker = begin + content[begin..].find(END_MARKER)?;
    let mut end = end_marker + END_MARKER.len();
    if content[end..].starts_with("\r\n") {
        end += 2;
    } else if content[end..].starts_with('\n') {
        end += 1;
    }

    let start = if joined && begin > 0 && content.as_bytes()[begin - 1] == b'\n' {
        begin - 1
    } else {
        begin
    };
    Some((start, end))
}

/// Position of `marker` when it starts a line
fn find_line(content: &str, marker: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(found) = content[offset..].find(marker) {
        let pos = offset + found;
        if pos == 0 || content.as_bytes()[pos - 1] == b'\n' {
            return Some(pos);
        }
        offset = pos + marker.len();
    }
    None
}

/// `content` without the managed section
pub fn strip_section(content: &str) -> String {
    match section_range(content) {
        Some((start, end)) => {
            let mut out = String::with_capacity(content.len());
            out.push_str(&content[..start]);
            out.push_str(&content[end..]);
            out
        }
        None => content.to_string(),
    }
}

/// `content` with its managed section replaced by `section`
pub fn with_section(content: &str, section: &str) -> String {
    let base = strip_section(content);
    let mut out = base.clone();

    if !base.is_empty() && !base.ends_with('\n') {
        out.push('\n');
        out.push_str(BEGIN_MARKER_JOINED);
    } else {
        out.push_str(BEGIN_MARKER);
    }
    out.push('\n');
    out.push_str(section);
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

pub fn has_section(content: &str) -> bool {
    section_range(content).is_some()
}

/// Fingerprint recorded in the managed section
pub fn section_fingerprint(content: &str) -> Option<String> {
    let (start, end) = section_range(content)?;
    content[start..end]
        .lines()
        .find_map(|line| line.strip_prefix(FINGERPRINT_PREFIX))
        .map(|s| s.trim().to_string())
}

/// Host names redirected by the managed section
pub fn section_domains(content: &str) -> BTreeSet<String> {
    let Some((start, end)) = section_range(content) else {
        return BTreeSet::new();
    };
    content[start..end]
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// The hosts file plus the backup taken before each rewrite
pub struct HostsFile {
    path: PathBuf,
    backup_path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current content; a missing hosts file reads as empty
    pub fn read(&self) -> GuardResult<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(GuardError::from_io("read hosts file", e)),
        }
    }

    pub fn write(&self, content: &str) -> GuardResult<()> {
        crate::platform::common::atomic_write(&self.path, content.as_bytes())
            .map_err(|e| GuardError::from_write_failure("write hosts file", e))?;
        crate::platform::common::set_permissions_readable_all(&self.path)
            .map_err(|e| GuardError::from_write_failure("write hosts file", e))
    }

    /// Keep a copy of `content` beside the daemon's data
    pub fn backup(&self, content: &str) -> GuardResult<()> {
        crate::platform::common::atomic_write(&self.backup_path, content.as_bytes())
            .map_err(|e| GuardError::from_write_failure("back up hosts file", e))
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}

/// Ask the OS resolver to drop cached answers; failures are only logged
pub fn flush_dns_cache(runner: &dyn CommandRunner, timeout: Duration) {
    let commands: Vec<(&str, Vec<&str>)> = if cfg!(target_os = "macos") {
        vec![
            ("dscacheutil", vec!["-flushcache"]),
            ("killall", vec!["-HUP", "mDNSResponder"]),
        ]
    } else if cfg!(target_os = "windows") {
        vec![("ipconfig", vec!["/flushdns"])]
    } else {
        vec![("resolvectl", vec!["flush-caches"])]
    };

    for (program, args) in commands {
        match runner.run(program, &args, timeout) {
            Ok(output) if output.success() => {}
            Ok(output) => debug!("{} exited with {:?}", program, output.code),
            Err(e) => debug!("DNS cache flush via {} skipped: {}", program, e),
        }
    }
}
