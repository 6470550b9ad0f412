#![forbid(unsafe_code)]

//! alh: Apploop Harness CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        if e.should_report() {
            eprintln!("alh: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
