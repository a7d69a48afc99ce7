//! Shipped default blocklists.
//!
//! Process names are stored without `.exe`/`.app`; the monitor strips those
//! suffixes from running process names before matching.

use super::model::{BlocklistItem, ItemCategory, ItemGroup};

const GAME_PROCESSES: &[&str] = &[
    "steam",
    "steamwebhelper",
    "steamservice",
    "epicgameslauncher",
    "epicwebhelper",
    "epic games launcher",
    "origin",
    "originwebhelperservice",
    "eadesktop",
    "eabackgroundservice",
    "battle.net",
    "ubisoftconnect",
    "upc",
    "uplaywebcore",
    "galaxyclient",
    "gog galaxy",
    "discord",
    "robloxplayerbeta",
    "robloxstudiobeta",
    "minecraft",
    "minecraft-launcher",
    "leagueclient",
    "league of legends",
    "fortniteclient-win64-shipping",
    "fortnitelauncher",
    "valorant",
    "valorant-win64-shipping",
    "cs2",
    "csgo",
    "overwatch",
    "genshinimpact",
    "playnite",
    "playnite.desktopapp",
    "lutris",
    "geforcenow",
    "xboxapp",
];

const AI_PROCESSES: &[&str] = &[
    "chatgpt",
    "claude",
    "copilot",
    "cursor",
    "codeium",
    "tabnine",
    "pieces",
    "raycast",
];

const BROWSER_PROCESSES: &[&str] = &[
    "chrome",
    "google chrome",
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "firefox",
    "firefox-esr",
    "msedge",
    "microsoft edge",
    "brave",
    "brave browser",
    "brave-browser",
    "opera",
    "opera_gx",
    "vivaldi",
    "safari",
    "arc",
    "tor browser",
    "iexplore",
    "waterfox",
    "librewolf",
    "floorp",
];

const GAME_DOMAINS: &[&str] = &[
    "steampowered.com",
    "store.steampowered.com",
    "steamcommunity.com",
    "epicgames.com",
    "store.epicgames.com",
    "gog.com",
    "battle.net",
    "blizzard.com",
    "origin.com",
    "ea.com",
    "ubisoft.com",
    "ubisoftconnect.com",
    "xbox.com",
    "playstation.com",
    "nintendo.com",
    "twitch.tv",
    "kick.com",
    "poki.com",
    "miniclip.com",
    "kongregate.com",
    "crazygames.com",
    "armorgames.com",
    "newgrounds.com",
    "itch.io",
    "coolmathgames.com",
    "y8.com",
    "friv.com",
    "now.gg",
    "agar.io",
    "slither.io",
    "krunker.io",
    "1v1.lol",
    "roblox.com",
    "minecraft.net",
    "leagueoflegends.com",
    "fortnite.com",
    "playvalorant.com",
    "hoyoverse.com",
    "runescape.com",
    "discord.com",
    "discord.gg",
    "discordapp.com",
];

const AI_DOMAINS: &[&str] = &[
    "chat.openai.com",
    "chatgpt.com",
    "openai.com",
    "api.openai.com",
    "claude.ai",
    "anthropic.com",
    "api.anthropic.com",
    "gemini.google.com",
    "bard.google.com",
    "aistudio.google.com",
    "generativelanguage.googleapis.com",
    "notebooklm.google.com",
    "copilot.microsoft.com",
    "copilot.github.com",
    "perplexity.ai",
    "poe.com",
    "character.ai",
    "you.com",
    "midjourney.com",
    "leonardo.ai",
    "stability.ai",
    "jasper.ai",
    "quillbot.com",
    "replit.com",
    "cursor.com",
    "codeium.com",
    "tabnine.com",
    "phind.com",
    "huggingface.co",
    "groq.com",
];

/// All default items in a stable order: processes first, then domains
pub fn default_items() -> Vec<BlocklistItem> {
    let groups: [(ItemCategory, ItemGroup, &[&str]); 5] = [
        (ItemCategory::Process, ItemGroup::Games, GAME_PROCESSES),
        (ItemCategory::Process, ItemGroup::Ai, AI_PROCESSES),
        (ItemCategory::Process, ItemGroup::Browsers, BROWSER_PROCESSES),
        (ItemCategory::Domain, ItemGroup::Games, GAME_DOMAINS),
        (ItemCategory::Domain, ItemGroup::Ai, AI_DOMAINS),
    ];

    let mut items: Vec<BlocklistItem> = Vec::new();
    for (category, group, values) in groups {
        for value in values {
            let item = BlocklistItem::default_item(category, group, value);
            if !items
                .iter()
                .any(|i| i.category == item.category && i.value == item.value)
            {
                items.push(item);
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::validate::normalize;
    use std::collections::HashSet;

    #[test]
    fn test_defaults_are_unique_per_category() {
        let items = default_items();
        let keys: HashSet<_> = items.iter().map(|i| (i.category, i.value.clone())).collect();
        assert_eq!(keys.len(), items.len());
    }

    #[test]
    fn test_defaults_pass_validation() {
        for item in default_items() {
            assert_eq!(
                normalize(item.category, &item.value).unwrap(),
                item.value,
                "default {} '{}' is not normalised",
                item.category,
                item.value
            );
        }
    }

    #[test]
    fn test_defaults_cover_every_group() {
        let items = default_items();
        for group in [ItemGroup::Games, ItemGroup::Ai, ItemGroup::Browsers] {
            assert!(items.iter().any(|i| i.group == group));
        }
        assert!(items.iter().all(|i| i.is_default && !i.is_allowed));
    }
}
