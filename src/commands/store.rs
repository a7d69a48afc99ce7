use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::ipc::DaemonRequest;

use super::utils::{call_as_parent, init_logging};

/// Move a corrupted policy store aside and start over with defaults
pub fn reset(
    config_path: &Path,
    confirm: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    if !confirm {
        anyhow::bail!("This discards the stored blocklists and schedules; re-run with --confirm");
    }
    let moved: Option<PathBuf> = call_as_parent(
        config_path,
        password,
        DaemonRequest::ResetCorruptedStore { password: None },
    )?;
    match moved {
        Some(path) => {
            println!("✓ Corrupted policy moved to: {}", path.display());
            println!("✓ Default policy restored");
        }
        None => println!("✓ Policy store is healthy; nothing to reset"),
    }
    Ok(())
}
