use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::warn;

use super::RuleSet;
use crate::error::{GuardError, GuardResult};

/// Current snapshot version
const SNAPSHOT_VERSION: &str = "1.0";

/// Record of the last rule set successfully applied
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppliedSnapshot {
    pub version: String,
    pub fingerprint: String,
    pub applied_at: DateTime<Utc>,
    pub rules: RuleSet,
}

/// Compute hash of a rule set for change detection
pub fn compute_fingerprint(rules: &RuleSet) -> String {
    // BTreeSet serialises in sorted order, so equal sets hash equally
    let json = serde_json::to_string(rules).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let result = hasher.finalize();

    format!("sha256:{}", hex::encode(result))
}

/// applied-rules.json beside the daemon's other data
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the snapshot; unreadable or foreign-version files count as absent
    pub fn load(&self) -> Option<AppliedSnapshot> {
        let content = std::fs::read_to_string(&self.path).ok()?;

        match serde_json::from_str::<AppliedSnapshot>(&content) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    "Snapshot version mismatch (expected {}, got {}). Treating as not applied.",
                    SNAPSHOT_VERSION, snapshot.version
                );
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable snapshot {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, rules: &RuleSet, fingerprint: &str) -> GuardResult<()> {
        let snapshot = AppliedSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            fingerprint: fingerprint.to_string(),
            applied_at: Utc::now(),
            rules: rules.clone(),
        };

        let content = serde_json::to_string_pretty(&snapshot)?;

        crate::platform::common::atomic_write(&self.path, content.as_bytes())
            .map_err(|e| GuardError::from_write_failure("save rule snapshot", e))
    }

    pub fn delete(&self) -> GuardResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuardError::from_io("delete rule snapshot", e)),
        }
    }
}
