use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GuardError;
use crate::schedule::Schedule;

/// Current policy document version
pub const POLICY_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Process,
    Domain,
}

impl ItemCategory {
    pub const ALL: [ItemCategory; 2] = [ItemCategory::Process, ItemCategory::Domain];

    /// Display name of the category grouping
    pub fn title(self) -> &'static str {
        match self {
            ItemCategory::Process => "Processes",
            ItemCategory::Domain => "Domains",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemCategory::Process => "process",
            ItemCategory::Domain => "domain",
        })
    }
}

impl FromStr for ItemCategory {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" | "processes" | "app" => Ok(ItemCategory::Process),
            "domain" | "domains" | "website" => Ok(ItemCategory::Domain),
            other => Err(GuardError::Validation(format!(
                "unknown item type '{other}' (expected process or domain)"
            ))),
        }
    }
}

/// Content group a default item ships in; user-added items are `Custom`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemGroup {
    Games,
    Ai,
    Browsers,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistItem {
    /// Normalised (lowercase) process name or domain
    pub value: String,
    pub category: ItemCategory,
    pub group: ItemGroup,
    pub is_default: bool,
    pub is_allowed: bool,
    /// Exists only as a whitelist entry; dropped when un-whitelisted
    #[serde(default, skip_serializing_if = "is_false")]
    pub whitelist_only: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl BlocklistItem {
    pub fn custom(category: ItemCategory, value: String) -> Self {
        Self {
            value,
            category,
            group: ItemGroup::Custom,
            is_default: false,
            is_allowed: false,
            whitelist_only: false,
        }
    }

    pub fn default_item(category: ItemCategory, group: ItemGroup, value: &str) -> Self {
        Self {
            value: value.to_lowercase(),
            category,
            group,
            is_default: true,
            is_allowed: false,
            whitelist_only: false,
        }
    }
}

/// Items of one category in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistCategory {
    pub name: String,
    pub category: ItemCategory,
    pub items: Vec<BlocklistItem>,
    pub count: usize,
}

/// Manual per-group switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingToggles {
    /// Default game launchers and game sites
    #[serde(default)]
    pub game_blocking: bool,
    /// Default AI assistants and AI sites
    #[serde(default)]
    pub ai_blocking: bool,
    /// Default web browsers (processes only)
    #[serde(default)]
    pub browser_blocking: bool,
    /// Every default domain group plus custom domains
    #[serde(default)]
    pub dns_blocking: bool,
    /// DoH egress firewall rules while enforcement is active
    #[serde(default = "default_true")]
    pub doh_firewall: bool,
    /// Enforcement state when no schedule window is active
    #[serde(default = "default_true")]
    pub manual_blocking: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BlockingToggles {
    fn default() -> Self {
        Self {
            game_blocking: true,
            ai_blocking: true,
            browser_blocking: false,
            dns_blocking: false,
            doh_firewall: true,
            manual_blocking: true,
        }
    }
}

impl BlockingToggles {
    pub fn any_group_enabled(&self) -> bool {
        self.game_blocking || self.ai_blocking || self.browser_blocking || self.dns_blocking
    }
}

/// Partial toggle update; `None` leaves a switch unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TogglesUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doh_firewall: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_blocking: Option<bool>,
}

impl TogglesUpdate {
    pub fn apply_to(&self, toggles: &mut BlockingToggles) {
        let fields = [
            (self.game_blocking, &mut toggles.game_blocking),
            (self.ai_blocking, &mut toggles.ai_blocking),
            (self.browser_blocking, &mut toggles.browser_blocking),
            (self.dns_blocking, &mut toggles.dns_blocking),
            (self.doh_firewall, &mut toggles.doh_firewall),
            (self.manual_blocking, &mut toggles.manual_blocking),
        ];
        for (update, field) in fields {
            if let Some(value) = update {
                *field = value;
            }
        }
    }
}

/// Everything the policy store persists in policy.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,
    pub items: Vec<BlocklistItem>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub toggles: BlockingToggles,
    pub last_modified: DateTime<Utc>,
}

impl PolicyDocument {
    /// Fresh document: every shipped default, default toggles, no schedules
    pub fn new_default() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            items: super::defaults::default_items(),
            schedules: Vec::new(),
            toggles: BlockingToggles::default(),
            last_modified: Utc::now(),
        }
    }

    pub fn find(&self, category: ItemCategory, value: &str) -> Option<&BlocklistItem> {
        self.items
            .iter()
            .find(|i| i.category == category && i.value == value)
    }

    pub fn find_mut(&mut self, category: ItemCategory, value: &str) -> Option<&mut BlocklistItem> {
        self.items
            .iter_mut()
            .find(|i| i.category == category && i.value == value)
    }

    /// Re-add shipped defaults missing from a document written by an older build
    ///
    /// Returns the number of items added.
    pub fn merge_missing_defaults(&mut self) -> usize {
        let mut added = 0;
        for item in super::defaults::default_items() {
            if self.find(item.category, &item.value).is_none() {
                self.items.push(item);
                added += 1;
            }
        }
        added
    }

    pub fn category(&self, category: ItemCategory) -> BlocklistCategory {
        let items: Vec<BlocklistItem> = self
            .items
            .iter()
            .filter(|i| i.category == category)
            .cloned()
            .collect();
        BlocklistCategory {
            name: category.title().to_string(),
            category,
            count: items.len(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggles_update_only_touches_given_fields() {
        let mut toggles = BlockingToggles::default();
        TogglesUpdate {
            browser_blocking: Some(true),
            ai_blocking: Some(false),
            ..Default::default()
        }
        .apply_to(&mut toggles);

        assert!(toggles.browser_blocking);
        assert!(!toggles.ai_blocking);
        assert!(toggles.game_blocking);
        assert!(toggles.manual_blocking);
    }

    #[test]
    fn test_toggles_missing_fields_deserialize_to_defaults() {
        let toggles: BlockingToggles = serde_json::from_str(r#"{"game_blocking": true}"#).unwrap();
        assert!(toggles.game_blocking);
        assert!(!toggles.dns_blocking);
        assert!(toggles.manual_blocking);
        assert!(toggles.doh_firewall);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Process".parse::<ItemCategory>().unwrap(), ItemCategory::Process);
        assert_eq!("domains".parse::<ItemCategory>().unwrap(), ItemCategory::Domain);
        assert!("file".parse::<ItemCategory>().is_err());
    }

    #[test]
    fn test_merge_missing_defaults() {
        let mut doc = PolicyDocument::new_default();
        let total = doc.items.len();
        doc.items.retain(|i| i.value != "steam");

        assert_eq!(doc.merge_missing_defaults(), 1);
        assert_eq!(doc.items.len(), total);
        assert_eq!(doc.merge_missing_defaults(), 0);
    }

    #[test]
    fn test_category_view_counts_items() {
        let doc = PolicyDocument::new_default();
        let processes = doc.category(ItemCategory::Process);
        assert_eq!(processes.name, "Processes");
        assert_eq!(processes.count, processes.items.len());
        assert!(processes.items.iter().all(|i| i.category == ItemCategory::Process));
    }
}
