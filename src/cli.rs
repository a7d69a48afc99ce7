use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::get_config_path;
use crate::policy::{ItemCategory, TogglesUpdate};
use crate::schedule::SchedulePreset;

/// Parental control enforcement daemon
///
/// Blocks games, AI services, browsers and websites on a schedule by
/// terminating processes and redirecting domains, on Linux, macOS and Windows.
#[derive(Parser, Debug)]
#[command(name = "family-guard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to daemon configuration file
    #[arg(short, long, default_value_os_t = get_config_path(), global = true)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Parent password for policy changes, quit and password checks
    /// (prompted for when one is set and this is omitted)
    #[arg(long, global = true)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install, control and inspect the enforcement daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Manage blocked processes and domains
    Blocklist {
        #[command(subcommand)]
        command: BlocklistCommands,
    },
    /// Manage blocking schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Inspect and control enforcement
    Blocking {
        #[command(subcommand)]
        command: BlockingCommands,
    },
    /// Parent password and recovery
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Policy store maintenance
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
    /// Ask the running daemon to exit (needs the parent password once set)
    Quit,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Register the daemon as a system service and start it
    Install,
    /// Stop the daemon, remove its network rules, and unregister it
    Uninstall,
    /// Start the installed service
    Start,
    /// Stop the service (rules stay in place)
    Stop,
    /// Show service and enforcement status
    Status,
    /// Run the daemon in the foreground (used by the service manager)
    Run,
}

#[derive(Subcommand, Debug)]
pub enum BlocklistCommands {
    /// List blocked items
    List {
        /// Only this category (process or domain)
        #[arg(long)]
        category: Option<ItemCategory>,
    },
    /// Block a process or domain
    Add {
        category: ItemCategory,
        value: String,
    },
    /// Remove a custom process or domain
    Remove {
        category: ItemCategory,
        value: String,
    },
    /// Never block this process or domain
    Allow {
        category: ItemCategory,
        value: String,
    },
    /// Undo `allow`
    Disallow {
        category: ItemCategory,
        value: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// List schedules and whether blocking is active now
    List,
    /// Add a schedule
    Add {
        #[arg(long)]
        name: String,

        /// Comma-separated days, e.g. "mon,tue,wed" or "1,2,3" (0 = Sunday)
        #[arg(long)]
        days: String,

        /// Window start, HH:MM
        #[arg(long)]
        start: String,

        /// Window end, HH:MM (earlier than start wraps past midnight)
        #[arg(long)]
        end: String,

        /// Pause enforcement during this window instead of enforcing
        #[arg(long)]
        pause: bool,

        /// Create the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Add a built-in schedule (school, bedtime, weekend)
    Preset { preset: SchedulePreset },
    /// Enable a schedule
    Enable { id: Uuid },
    /// Disable a schedule
    Disable { id: Uuid },
    /// Delete a schedule
    Delete { id: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum BlockingCommands {
    /// Show what is being enforced right now
    Status,
    /// Change blocking toggles
    Toggle(ToggleArgs),
    /// Turn the DNS-over-HTTPS firewall on or off
    Firewall {
        #[arg(action = clap::ArgAction::Set, value_parser = parse_on_off)]
        state: bool,
    },
    /// Lock browsers' DNS-over-HTTPS off (or release the lock)
    BrowserDoh {
        /// "off" disables DoH in browsers, "on" removes the policy
        #[arg(action = clap::ArgAction::Set, value_parser = parse_on_off)]
        state: bool,
    },
    /// Apply network rules now
    Apply,
    /// Terminate blocked processes now
    Check,
    /// List running process names
    Processes,
    /// Show recently terminated processes
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct ToggleArgs {
    #[arg(long, value_parser = parse_on_off)]
    pub games: Option<bool>,
    #[arg(long, value_parser = parse_on_off)]
    pub ai: Option<bool>,
    #[arg(long, value_parser = parse_on_off)]
    pub browsers: Option<bool>,
    #[arg(long, value_parser = parse_on_off)]
    pub dns: Option<bool>,
    #[arg(long, value_parser = parse_on_off)]
    pub doh_firewall: Option<bool>,
    #[arg(long, value_parser = parse_on_off)]
    pub manual: Option<bool>,
}

impl From<ToggleArgs> for TogglesUpdate {
    fn from(args: ToggleArgs) -> Self {
        TogglesUpdate {
            game_blocking: args.games,
            ai_blocking: args.ai,
            browser_blocking: args.browsers,
            dns_blocking: args.dns,
            doh_firewall: args.doh_firewall,
            manual_blocking: args.manual,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Whether a parent password is set
    Status,
    /// Set the parent password for the first time
    Setup,
    /// Check a password
    Verify,
    /// Change the parent password
    Change {
        #[arg(long)]
        old_password: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
    },
    /// Reset the parent password with the recovery password
    Reset {
        #[arg(long)]
        recovery: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
    },
    /// Show the recovery password again
    ShowRecovery,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Move a corrupted policy store aside and restore defaults
    Reset {
        /// Required; the current blocklists and schedules are discarded
        #[arg(long)]
        confirm: bool,
    },
}

fn parse_on_off(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "enable" => Ok(true),
        "off" | "false" | "no" | "0" | "disable" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}
