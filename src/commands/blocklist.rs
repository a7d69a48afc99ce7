use std::path::Path;

use anyhow::Result;

use crate::ipc::DaemonRequest;
use crate::policy::{BlocklistCategory, BlocklistItem, ItemCategory};

use super::utils::{call, call_as_parent, init_logging};

/// Print every blocklist, optionally only one category
pub fn list(config_path: &Path, category: Option<ItemCategory>, verbose: bool) -> Result<()> {
    init_logging(verbose);
    let categories: Vec<BlocklistCategory> = call(config_path, DaemonRequest::GetBlocklists)?;

    for cat in categories
        .iter()
        .filter(|c| category.is_none_or(|wanted| c.category == wanted))
    {
        println!("{} ({})", cat.name, cat.count);
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        for item in &cat.items {
            println!("  {}", describe(item));
        }
        println!();
    }

    Ok(())
}

fn describe(item: &BlocklistItem) -> String {
    let mut flags = Vec::new();
    if item.is_default {
        flags.push(format!("default, {:?}", item.group).to_lowercase());
    } else {
        flags.push("custom".to_string());
    }
    if item.is_allowed {
        flags.push("ALLOWED".to_string());
    }
    if item.whitelist_only {
        flags.push("whitelist only".to_string());
    }
    format!("{:<40} [{}]", item.value, flags.join(", "))
}

pub fn add(
    config_path: &Path,
    category: ItemCategory,
    value: String,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let request = match category {
        ItemCategory::Process => DaemonRequest::AddBlockedProcess {
            name: value,
            password: None,
        },
        ItemCategory::Domain => DaemonRequest::AddBlockedDomain {
            domain: value,
            password: None,
        },
    };
    let item: BlocklistItem = call_as_parent(config_path, password, request)?;
    println!("✓ Blocking {} {}", category, item.value);
    Ok(())
}

pub fn remove(
    config_path: &Path,
    category: ItemCategory,
    value: String,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let request = match category {
        ItemCategory::Process => DaemonRequest::RemoveBlockedProcess {
            name: value.clone(),
            password: None,
        },
        ItemCategory::Domain => DaemonRequest::RemoveBlockedDomain {
            domain: value.clone(),
            password: None,
        },
    };
    call_as_parent::<()>(config_path, password, request)?;
    println!("✓ Removed {} {}", category, value);
    Ok(())
}

/// Whitelist (or un-whitelist) an item so it is never blocked
pub fn set_allowed(
    config_path: &Path,
    category: ItemCategory,
    value: String,
    allowed: bool,
    password: Option<String>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose);
    let request = if allowed {
        DaemonRequest::AddToWhitelist {
            category,
            value: value.clone(),
            password: None,
        }
    } else {
        DaemonRequest::RemoveFromWhitelist {
            category,
            value: value.clone(),
            password: None,
        }
    };

    let item: Option<BlocklistItem> = call_as_parent(config_path, password, request)?;
    match (item, allowed) {
        (Some(item), true) => println!("✓ {} {} is now allowed", category, item.value),
        (Some(item), false) => println!("✓ {} {} is blocked again", category, item.value),
        (None, _) => println!("✓ {} {} is no longer on the whitelist", category, value),
    }
    Ok(())
}
