//! Resolution of the stored policy into what is enforced right now.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::model::{BlockingToggles, BlocklistItem, ItemCategory, ItemGroup, PolicyDocument};
use super::validate::{domain_matches, process_stem};
use crate::schedule::ScheduleDecision;

/// Launcher and service names whose variants ("DiscordCanary", "SteamTmp")
/// are blocked whenever some blocked process carries the same keyword
const GAME_KEYWORDS: &[&str] = &["steam", "epic", "origin", "battle.net", "roblox", "minecraft", "discord"];
const AI_KEYWORDS: &[&str] = &["chatgpt", "claude", "copilot", "cursor", "codeium", "tabnine"];

/// Allowing one of these sites also allows the `claude` command line tool
const CLAUDE_DOMAINS: &[&str] = &["claude.ai", "anthropic.com"];

/// Whether the item's group is switched on
///
/// Custom items are always on. `dns_blocking` turns on every default domain
/// group regardless of the per-group switches.
pub fn group_enabled(item: &BlocklistItem, toggles: &BlockingToggles) -> bool {
    match (item.category, item.group) {
        (_, ItemGroup::Custom) => true,
        (ItemCategory::Process, ItemGroup::Games) => toggles.game_blocking,
        (ItemCategory::Process, ItemGroup::Ai) => toggles.ai_blocking,
        (ItemCategory::Process, ItemGroup::Browsers) => toggles.browser_blocking,
        (ItemCategory::Domain, ItemGroup::Games) => toggles.game_blocking || toggles.dns_blocking,
        (ItemCategory::Domain, ItemGroup::Ai) => toggles.ai_blocking || toggles.dns_blocking,
        (ItemCategory::Domain, ItemGroup::Browsers) => false,
    }
}

/// Enforcement targets derived from one policy snapshot and schedule decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementPlan {
    pub active: bool,
    pub decision: ScheduleDecision,
    /// Blocked process names without `.exe`/`.app`
    pub processes: BTreeSet<String>,
    /// Whitelisted process names without `.exe`/`.app`
    pub allowed_processes: BTreeSet<String>,
    /// A Claude site is whitelisted, so `claude` processes are left alone
    pub claude_allowed: bool,
    pub domains: BTreeSet<String>,
    pub block_doh: bool,
}

impl EnforcementPlan {
    pub fn build(doc: &PolicyDocument, decision: ScheduleDecision) -> Self {
        let active = decision.resolve(doc.toggles.manual_blocking);

        let allowed_processes: BTreeSet<String> = doc
            .items
            .iter()
            .filter(|i| i.category == ItemCategory::Process && i.is_allowed)
            .map(|i| process_stem(&i.value).to_string())
            .collect();

        let allowed_domains: Vec<&str> = doc
            .items
            .iter()
            .filter(|i| i.category == ItemCategory::Domain && i.is_allowed)
            .map(|i| i.value.as_str())
            .collect();
        let claude_allowed = allowed_domains
            .iter()
            .any(|d| CLAUDE_DOMAINS.iter().any(|c| d.contains(c)));

        if !active {
            return Self {
                active,
                decision,
                processes: BTreeSet::new(),
                allowed_processes,
                claude_allowed,
                domains: BTreeSet::new(),
                block_doh: false,
            };
        }

        let mut processes = BTreeSet::new();
        let mut domains = BTreeSet::new();

        for item in &doc.items {
            if item.is_allowed || !group_enabled(item, &doc.toggles) {
                continue;
            }
            match item.category {
                ItemCategory::Process => {
                    let stem = process_stem(&item.value);
                    if !allowed_processes.contains(stem) {
                        processes.insert(stem.to_string());
                    }
                }
                ItemCategory::Domain => {
                    if !allowed_domains.iter().any(|a| domain_matches(&item.value, a)) {
                        domains.insert(item.value.clone());
                    }
                }
            }
        }

        let block_doh = doc.toggles.doh_firewall && !domains.is_empty();

        Self {
            active,
            decision,
            processes,
            allowed_processes,
            claude_allowed,
            domains,
            block_doh,
        }
    }

    /// Whether a running process with this name must be terminated
    ///
    /// Exact names match first; otherwise a name containing a game or AI
    /// keyword is blocked when a blocked process carries the same keyword and
    /// no whitelisted name is part of it.
    pub fn blocks_process(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        let stem = process_stem(&lower);

        if self.allowed_processes.contains(stem) {
            return false;
        }
        if self.claude_allowed && stem.contains("claude") {
            return false;
        }
        if self.processes.contains(stem) {
            return true;
        }
        if self.allowed_processes.iter().any(|a| stem.contains(a.as_str())) {
            return false;
        }

        GAME_KEYWORDS
            .iter()
            .chain(AI_KEYWORDS)
            .find(|keyword| stem.contains(*keyword))
            .is_some_and(|keyword| self.processes.iter().any(|p| p.contains(keyword)))
    }

    pub fn blocks_domain(&self, domain: &str) -> bool {
        self.domains.contains(&domain.to_lowercase())
    }
}

/// Whether `value` is enforced: listed, not whitelisted, group on and enforcement active
pub fn effective_block(
    doc: &PolicyDocument,
    decision: ScheduleDecision,
    category: ItemCategory,
    value: &str,
) -> bool {
    let plan = EnforcementPlan::build(doc, decision);
    match category {
        ItemCategory::Process => plan.blocks_process(value),
        ItemCategory::Domain => plan.blocks_domain(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::TogglesUpdate;

    fn doc_with(items: Vec<BlocklistItem>) -> PolicyDocument {
        let mut doc = PolicyDocument::new_default();
        doc.items.extend(items);
        doc
    }

    fn custom(category: ItemCategory, value: &str, allowed: bool) -> BlocklistItem {
        let mut item = BlocklistItem::custom(category, value.to_string());
        item.is_allowed = allowed;
        item
    }

    #[test]
    fn test_whitelist_takes_precedence() {
        let doc = doc_with(vec![custom(ItemCategory::Domain, "example.com", true)]);
        assert!(!effective_block(
            &doc,
            ScheduleDecision::Enforce,
            ItemCategory::Domain,
            "example.com"
        ));

        let doc = doc_with(vec![custom(ItemCategory::Domain, "example.com", false)]);
        assert!(effective_block(
            &doc,
            ScheduleDecision::Enforce,
            ItemCategory::Domain,
            "example.com"
        ));
    }

    #[test]
    fn test_whitelisted_domain_covers_default_subdomains() {
        let doc = doc_with(vec![custom(ItemCategory::Domain, "openai.com", true)]);
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(!plan.blocks_domain("chat.openai.com"));
        assert!(!plan.blocks_domain("openai.com"));
        assert!(plan.blocks_domain("claude.ai"));
    }

    #[test]
    fn test_process_matching_ignores_case_and_suffix() {
        let doc = doc_with(vec![custom(ItemCategory::Process, "game.exe", false)]);
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(plan.blocks_process("Game.exe"));
        assert!(plan.blocks_process("game"));
        assert!(plan.blocks_process("Steam.exe"));
        assert!(plan.blocks_process("Discord.app"));
        assert!(!plan.blocks_process("notepad.exe"));
    }

    #[test]
    fn test_keyword_variants_of_blocked_launchers() {
        let plan = EnforcementPlan::build(&PolicyDocument::new_default(), ScheduleDecision::Enforce);
        assert!(plan.blocks_process("DiscordCanary"));
        assert!(plan.blocks_process("SteamTmp.exe"));
        assert!(plan.blocks_process("ChatGPT Helper"));
        assert!(!plan.blocks_process("notepad"));

        // Keywords follow the group toggles
        let mut doc = PolicyDocument::new_default();
        doc.toggles.game_blocking = false;
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(!plan.blocks_process("DiscordCanary"));
        assert!(plan.blocks_process("ChatGPT Helper"));
    }

    #[test]
    fn test_whitelisted_name_exempts_its_variants() {
        let doc = doc_with(vec![custom(ItemCategory::Process, "steam", true)]);
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(!plan.blocks_process("SteamTmp.exe"));
        assert!(plan.blocks_process("DiscordCanary"));
    }

    #[test]
    fn test_claude_site_whitelist_allows_claude_process() {
        let plan = EnforcementPlan::build(&PolicyDocument::new_default(), ScheduleDecision::Enforce);
        assert!(plan.blocks_process("claude"));

        let doc = doc_with(vec![custom(ItemCategory::Domain, "claude.ai", true)]);
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(plan.claude_allowed);
        assert!(!plan.blocks_process("claude"));
        assert!(!plan.blocks_process("Claude.exe"));
        assert!(plan.blocks_process("chatgpt"));
    }

    #[test]
    fn test_whitelisted_process_with_suffix() {
        let doc = doc_with(vec![custom(ItemCategory::Process, "discord.exe", true)]);
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(!plan.blocks_process("discord"));
        assert!(!plan.blocks_process("Discord.exe"));
    }

    #[test]
    fn test_group_toggles_gate_defaults() {
        let mut doc = PolicyDocument::new_default();
        TogglesUpdate {
            game_blocking: Some(false),
            ..Default::default()
        }
        .apply_to(&mut doc.toggles);

        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(!plan.blocks_process("steam"));
        assert!(!plan.blocks_domain("roblox.com"));
        assert!(plan.blocks_process("chatgpt"));
        assert!(!plan.blocks_process("firefox"));

        doc.toggles.dns_blocking = true;
        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Enforce);
        assert!(plan.blocks_domain("roblox.com"));
        assert!(!plan.blocks_process("steam"));
    }

    #[test]
    fn test_pause_and_manual_decisions() {
        let mut doc = doc_with(vec![custom(ItemCategory::Process, "game.exe", false)]);

        let plan = EnforcementPlan::build(&doc, ScheduleDecision::Pause);
        assert!(!plan.active);
        assert!(!plan.blocks_process("game.exe"));
        assert!(!plan.block_doh);

        doc.toggles.manual_blocking = false;
        assert!(!EnforcementPlan::build(&doc, ScheduleDecision::Manual).active);
        doc.toggles.manual_blocking = true;
        assert!(EnforcementPlan::build(&doc, ScheduleDecision::Manual).active);
    }

    #[test]
    fn test_doh_firewall_follows_toggle() {
        let mut doc = PolicyDocument::new_default();
        assert!(EnforcementPlan::build(&doc, ScheduleDecision::Enforce).block_doh);

        doc.toggles.doh_firewall = false;
        assert!(!EnforcementPlan::build(&doc, ScheduleDecision::Enforce).block_doh);
    }
}
