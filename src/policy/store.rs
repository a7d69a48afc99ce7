//! Persistent, transactional policy store.
//!
//! Readers take an `Arc` snapshot under a short read lock. Writers are
//! serialised by `writer`, mutate a private clone, persist it atomically and
//! only then swap it in, so a reader never observes a partial mutation and a
//! failed write leaves the in-memory policy untouched.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{
    BlockingToggles, BlocklistCategory, BlocklistItem, ItemCategory, POLICY_VERSION,
    PolicyDocument, TogglesUpdate,
};
use super::validate::normalize;
use crate::error::{GuardError, GuardResult};
use crate::schedule::{Schedule, ScheduleInput, SchedulePreset};

pub struct PolicyStore {
    path: PathBuf,
    current: RwLock<Arc<PolicyDocument>>,
    writer: Mutex<()>,
    /// Set while serving the safe default policy because the file is unreadable
    corruption: RwLock<Option<String>>,
}

impl PolicyStore {
    /// Open the store at `path`, creating a default document if none exists
    ///
    /// An unreadable or unparsable file does not fail: the store enters safe
    /// mode, serves the default policy and refuses mutations until
    /// [`PolicyStore::reset_corrupted`] is called.
    pub fn open(path: impl Into<PathBuf>) -> GuardResult<Self> {
        let path = path.into();

        let (document, corruption) = match load_document(&path) {
            Ok(Some(mut document)) => {
                let added = document.merge_missing_defaults();
                if added > 0 {
                    info!("Added {} new default blocklist items", added);
                    if let Err(e) = persist(&path, &document) {
                        warn!("Failed to save merged defaults: {}", e);
                    }
                }
                (document, None)
            }
            Ok(None) => {
                let document = PolicyDocument::new_default();
                persist(&path, &document)?;
                info!("Created default policy at {}", path.display());
                (document, None)
            }
            Err(reason) => {
                error!(
                    "Policy store {} is corrupted ({}); serving safe default policy",
                    path.display(),
                    reason
                );
                (PolicyDocument::new_default(), Some(reason))
            }
        };

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(document)),
            writer: Mutex::new(()),
            corruption: RwLock::new(corruption),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest committed document
    pub fn snapshot(&self) -> Arc<PolicyDocument> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reason the store is in safe mode, if it is
    pub fn corruption(&self) -> Option<String> {
        self.corruption
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_safe_mode(&self) -> bool {
        self.corruption().is_some()
    }

    /// Run `mutate` against a copy of the document and commit it
    ///
    /// `mutate` returns its result plus whether the document changed; an
    /// unchanged document is neither persisted nor swapped.
    fn transact<R>(
        &self,
        mutate: impl FnOnce(&mut PolicyDocument) -> GuardResult<(R, bool)>,
    ) -> GuardResult<R> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(reason) = self.corruption() {
            return Err(GuardError::StorageCorruption(reason));
        }

        let mut draft = (*self.snapshot()).clone();
        let (result, changed) = mutate(&mut draft)?;

        if changed {
            draft.last_modified = Utc::now();
            persist(&self.path, &draft)?;
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(draft);
        }

        Ok(result)
    }

    /// Add a custom item; adding an existing value changes nothing
    pub fn add(&self, category: ItemCategory, value: &str) -> GuardResult<BlocklistItem> {
        let value = normalize(category, value)?;
        self.transact(|doc| {
            if let Some(existing) = doc.find_mut(category, &value) {
                if existing.whitelist_only {
                    existing.whitelist_only = false;
                    return Ok((existing.clone(), true));
                }
                return Ok((existing.clone(), false));
            }
            let item = BlocklistItem::custom(category, value.clone());
            doc.items.push(item.clone());
            info!("Blocked {} '{}'", category, value);
            Ok((item, true))
        })
    }

    /// Remove a custom item; defaults can only be whitelisted
    pub fn remove(&self, category: ItemCategory, value: &str) -> GuardResult<()> {
        let value = normalize(category, value)?;
        self.transact(|doc| {
            let index = doc
                .items
                .iter()
                .position(|i| i.category == category && i.value == value)
                .ok_or_else(|| GuardError::NotFound(format!("{category} '{value}'")))?;

            if doc.items[index].is_default {
                return Err(GuardError::ImmutableDefault(value.clone()));
            }

            doc.items.remove(index);
            info!("Removed {} '{}'", category, value);
            Ok(((), true))
        })
    }

    /// Whitelist or un-whitelist a value
    ///
    /// Whitelisting an unknown value records it as a whitelist-only item.
    /// Un-whitelisting a whitelist-only item deletes it; un-whitelisting an
    /// unknown value is a no-op.
    pub fn set_allowed(
        &self,
        category: ItemCategory,
        value: &str,
        allowed: bool,
    ) -> GuardResult<Option<BlocklistItem>> {
        let value = normalize(category, value)?;
        self.transact(|doc| {
            let position = doc
                .items
                .iter()
                .position(|i| i.category == category && i.value == value);

            match (position, allowed) {
                (Some(index), false) if doc.items[index].whitelist_only => {
                    doc.items.remove(index);
                    Ok((None, true))
                }
                (Some(index), _) => {
                    let item = &mut doc.items[index];
                    let changed = item.is_allowed != allowed;
                    item.is_allowed = allowed;
                    Ok((Some(item.clone()), changed))
                }
                (None, true) => {
                    let mut item = BlocklistItem::custom(category, value.clone());
                    item.is_allowed = true;
                    item.whitelist_only = true;
                    doc.items.push(item.clone());
                    Ok((Some(item), true))
                }
                (None, false) => Ok((None, false)),
            }
        })
    }

    /// Items of one category in insertion order
    pub fn list(&self, category: ItemCategory) -> Vec<BlocklistItem> {
        self.snapshot().category(category).items
    }

    pub fn list_categories(&self) -> Vec<BlocklistCategory> {
        let doc = self.snapshot();
        ItemCategory::ALL.iter().map(|c| doc.category(*c)).collect()
    }

    pub fn schedules(&self) -> Vec<Schedule> {
        self.snapshot().schedules.clone()
    }

    pub fn add_schedule(&self, input: ScheduleInput) -> GuardResult<Schedule> {
        let schedule = Schedule::from_input(input)?;
        self.transact(|doc| {
            doc.schedules.push(schedule.clone());
            info!("Added schedule '{}' ({})", schedule.name, schedule.describe_window());
            Ok((schedule, true))
        })
    }

    pub fn add_preset(&self, preset: SchedulePreset) -> GuardResult<Schedule> {
        self.add_schedule(preset.input())
    }

    /// Replace the schedule with the same id
    pub fn update_schedule(&self, schedule: Schedule) -> GuardResult<Schedule> {
        let mut schedule = schedule;
        schedule.name = schedule.name.trim().to_string();
        schedule.validate()?;
        self.transact(|doc| {
            let slot = doc
                .schedules
                .iter_mut()
                .find(|s| s.id == schedule.id)
                .ok_or_else(|| GuardError::NotFound(format!("schedule {}", schedule.id)))?;
            let changed = *slot != schedule;
            *slot = schedule.clone();
            Ok((schedule, changed))
        })
    }

    pub fn delete_schedule(&self, id: Uuid) -> GuardResult<()> {
        self.transact(|doc| {
            let before = doc.schedules.len();
            doc.schedules.retain(|s| s.id != id);
            if doc.schedules.len() == before {
                return Err(GuardError::NotFound(format!("schedule {id}")));
            }
            info!("Deleted schedule {}", id);
            Ok(((), true))
        })
    }

    pub fn toggles(&self) -> BlockingToggles {
        self.snapshot().toggles
    }

    pub fn update_toggles(&self, update: TogglesUpdate) -> GuardResult<BlockingToggles> {
        self.transact(|doc| {
            let before = doc.toggles;
            update.apply_to(&mut doc.toggles);
            Ok((doc.toggles, doc.toggles != before))
        })
    }

    /// Leave safe mode: move the corrupted file aside and start from defaults
    ///
    /// Returns where the corrupted file was moved, or `None` when the store
    /// was not corrupted.
    pub fn reset_corrupted(&self) -> GuardResult<Option<PathBuf>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if self.corruption().is_none() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{stamp}"));
        let aside = PathBuf::from(aside);

        if self.path.exists() {
            std::fs::rename(&self.path, &aside)
                .map_err(|e| GuardError::from_io("move corrupted policy aside", e))?;
        }

        let document = PolicyDocument::new_default();
        persist(&self.path, &document)?;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(document);
        *self.corruption.write().unwrap_or_else(PoisonError::into_inner) = None;

        warn!(
            "Policy store reset to defaults; corrupted copy kept at {}",
            aside.display()
        );
        Ok(Some(aside))
    }
}

/// `Ok(None)` if the file does not exist, `Err(reason)` if it cannot be used
fn load_document(path: &Path) -> Result<Option<PolicyDocument>, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("read failed: {e}")),
    };

    let document: PolicyDocument =
        serde_json::from_str(&content).map_err(|e| format!("parse failed: {e}"))?;

    if document.version != POLICY_VERSION {
        return Err(format!(
            "unsupported version {} (expected {})",
            document.version, POLICY_VERSION
        ));
    }

    Ok(Some(document))
}

fn persist(path: &Path, document: &PolicyDocument) -> GuardResult<()> {
    let content = serde_json::to_string_pretty(document)?;
    crate::platform::common::atomic_write(path, content.as_bytes())
        .map_err(|e| GuardError::from_write_failure("save policy", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::ItemGroup;
    use std::sync::Barrier;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, PolicyStore) {
        let dir = tempdir().unwrap();
        let store = PolicyStore::open(dir.path().join("policy.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_default_document() {
        let (dir, store) = open_temp();
        assert!(dir.path().join("policy.json").exists());
        assert!(!store.is_safe_mode());
        assert!(store
            .list(ItemCategory::Process)
            .iter()
            .any(|i| i.value == "steam" && i.is_default));
    }

    #[test]
    fn test_example_domain_scenario() {
        let (_dir, store) = open_temp();

        store.add(ItemCategory::Domain, "example.com").unwrap();
        let domains = store
            .list_categories()
            .into_iter()
            .find(|c| c.name == "Domains")
            .unwrap();
        let item = domains.items.iter().find(|i| i.value == "example.com").unwrap();
        assert!(!item.is_allowed);
        assert_eq!(item.group, ItemGroup::Custom);

        let item = store
            .set_allowed(ItemCategory::Domain, "example.com", true)
            .unwrap()
            .unwrap();
        assert!(item.is_allowed);
        assert!(!item.whitelist_only);
    }

    #[test]
    fn test_add_is_idempotent() {
        let (_dir, store) = open_temp();
        let before = store.list(ItemCategory::Process).len();

        store.add(ItemCategory::Process, "game.exe").unwrap();
        store.add(ItemCategory::Process, "GAME.EXE").unwrap();

        assert_eq!(store.list(ItemCategory::Process).len(), before + 1);
    }

    #[test]
    fn test_concurrent_duplicate_add_stores_one_item() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.add(ItemCategory::Process, "game.exe").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let count = store
            .list(ItemCategory::Process)
            .iter()
            .filter(|i| i.value == "game.exe")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_default_items_cannot_be_removed() {
        let (_dir, store) = open_temp();

        let err = store.remove(ItemCategory::Process, "steam").unwrap_err();
        assert_eq!(err.kind(), "ImmutableDefaultError");
        assert!(store
            .list(ItemCategory::Process)
            .iter()
            .any(|i| i.value == "steam"));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let (_dir, store) = open_temp();
        let err = store.remove(ItemCategory::Domain, "nothing-here.org").unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_invalid_value_leaves_store_unchanged() {
        let (_dir, store) = open_temp();
        let before = store.snapshot();

        let err = store.add(ItemCategory::Domain, "not a domain").unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn test_whitelist_only_item_is_dropped_when_unwhitelisted() {
        let (_dir, store) = open_temp();
        let before = store.list(ItemCategory::Process).len();

        store.set_allowed(ItemCategory::Process, "notepad", true).unwrap();
        assert_eq!(store.list(ItemCategory::Process).len(), before + 1);

        assert!(store
            .set_allowed(ItemCategory::Process, "notepad", false)
            .unwrap()
            .is_none());
        assert_eq!(store.list(ItemCategory::Process).len(), before);
    }

    #[test]
    fn test_mutations_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        {
            let store = PolicyStore::open(&path).unwrap();
            store.add(ItemCategory::Process, "game.exe").unwrap();
            store.add_preset(SchedulePreset::School).unwrap();
            store
                .update_toggles(TogglesUpdate {
                    dns_blocking: Some(true),
                    ..Default::default()
                })
                .unwrap();
        }

        let store = PolicyStore::open(&path).unwrap();
        assert!(store.list(ItemCategory::Process).iter().any(|i| i.value == "game.exe"));
        assert_eq!(store.schedules().len(), 1);
        assert!(store.toggles().dns_blocking);
    }

    #[test]
    fn test_deleting_preset_removes_only_that_schedule() {
        let (_dir, store) = open_temp();
        let school = store.add_preset(SchedulePreset::School).unwrap();
        let bedtime = store.add_preset(SchedulePreset::Bedtime).unwrap();
        assert!(bedtime.blocking_enabled);

        store.delete_schedule(bedtime.id).unwrap();

        let remaining = store.schedules();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0], school);
    }

    #[test]
    fn test_update_schedule() {
        let (_dir, store) = open_temp();
        let mut school = store.add_preset(SchedulePreset::School).unwrap();
        school.enabled = false;

        store.update_schedule(school.clone()).unwrap();
        assert!(!store.schedules()[0].enabled);

        let mut unknown = school;
        unknown.id = Uuid::new_v4();
        assert_eq!(store.update_schedule(unknown).unwrap_err().kind(), "NotFound");
        assert_eq!(store.delete_schedule(Uuid::new_v4()).unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_corrupted_file_enters_safe_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = PolicyStore::open(&path).unwrap();
        assert!(store.is_safe_mode());
        assert!(store.toggles().game_blocking);
        assert!(store.toggles().manual_blocking);

        let err = store.add(ItemCategory::Process, "game.exe").unwrap_err();
        assert_eq!(err.kind(), "StorageCorruption");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_reset_corrupted_moves_file_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = PolicyStore::open(&path).unwrap();

        let aside = store.reset_corrupted().unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "garbage");
        assert!(!store.is_safe_mode());
        store.add(ItemCategory::Process, "game.exe").unwrap();

        assert!(store.reset_corrupted().unwrap().is_none());
    }
}
