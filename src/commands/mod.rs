pub mod auth;
pub mod blocking;
pub mod blocklist;
pub mod daemon;
pub mod schedule;
pub mod store;
pub mod utils;

use anyhow::Result;

use crate::cli::{
    Args, AuthCommands, BlockingCommands, BlocklistCommands, Commands, DaemonCommands,
    ScheduleCommands, StoreCommands,
};

/// Run the parsed command line
pub fn run(args: Args) -> Result<()> {
    let config = args.config.as_path();
    let verbose = args.verbose;
    let password = args.password;

    match args.command {
        Commands::Daemon { command } => match command {
            DaemonCommands::Install => daemon::install(config, verbose),
            DaemonCommands::Uninstall => daemon::uninstall(config, verbose),
            DaemonCommands::Start => daemon::start(config, verbose),
            DaemonCommands::Stop => daemon::stop(config, verbose),
            DaemonCommands::Status => daemon::status(config, verbose),
            DaemonCommands::Run => daemon::run(config, verbose),
        },
        Commands::Blocklist { command } => match command {
            BlocklistCommands::List { category } => blocklist::list(config, category, verbose),
            BlocklistCommands::Add { category, value } => {
                blocklist::add(config, category, value, password, verbose)
            }
            BlocklistCommands::Remove { category, value } => {
                blocklist::remove(config, category, value, password, verbose)
            }
            BlocklistCommands::Allow { category, value } => {
                blocklist::set_allowed(config, category, value, true, password, verbose)
            }
            BlocklistCommands::Disallow { category, value } => {
                blocklist::set_allowed(config, category, value, false, password, verbose)
            }
        },
        Commands::Schedule { command } => match command {
            ScheduleCommands::List => schedule::list(config, verbose),
            ScheduleCommands::Add {
                name,
                days,
                start,
                end,
                pause,
                disabled,
            } => schedule::add(
                config, name, &days, &start, &end, pause, disabled, password, verbose,
            ),
            ScheduleCommands::Preset { preset } => {
                schedule::add_preset(config, preset, password, verbose)
            }
            ScheduleCommands::Enable { id } => {
                schedule::set_enabled(config, id, true, password, verbose)
            }
            ScheduleCommands::Disable { id } => {
                schedule::set_enabled(config, id, false, password, verbose)
            }
            ScheduleCommands::Delete { id } => schedule::delete(config, id, password, verbose),
        },
        Commands::Blocking { command } => match command {
            BlockingCommands::Status => blocking::status(config, verbose),
            BlockingCommands::Toggle(toggles) => {
                blocking::set_toggles(config, toggles.into(), password, verbose)
            }
            BlockingCommands::Firewall { state } => {
                blocking::set_firewall(config, state, password, verbose)
            }
            // "off" means DoH is switched off in the browsers
            BlockingCommands::BrowserDoh { state } => {
                blocking::set_browser_doh(config, !state, password, verbose)
            }
            BlockingCommands::Apply => blocking::apply(config, verbose),
            BlockingCommands::Check => blocking::check(config, verbose),
            BlockingCommands::Processes => blocking::processes(config, verbose),
            BlockingCommands::Recent { limit } => blocking::recent(config, limit, verbose),
        },
        Commands::Auth { command } => match command {
            AuthCommands::Status => auth::status(config, verbose),
            AuthCommands::Setup => auth::setup(config, password, verbose),
            AuthCommands::Verify => auth::verify(config, password, verbose),
            AuthCommands::Change {
                old_password,
                new_password,
            } => auth::change(config, old_password, new_password, verbose),
            AuthCommands::Reset {
                recovery,
                new_password,
            } => auth::reset(config, recovery, new_password, verbose),
            AuthCommands::ShowRecovery => auth::show_recovery(config, password, verbose),
        },
        Commands::Store { command } => match command {
            StoreCommands::Reset { confirm } => store::reset(config, confirm, password, verbose),
        },
        Commands::Quit => auth::quit(config, password, verbose),
    }
}
