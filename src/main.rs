use clap::Parser;

use family_guard::cli::Args;
use family_guard::commands;

fn main() {
    let args = Args::parse();

    if let Err(e) = commands::run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
