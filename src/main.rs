#![deny(unsafe_code)]
pub mod commands;
mod version;

use clap::Parser;
use clap::builder::styling::{AnsiColor, Effects, Styles};

/// Custom styles for CLI help output
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

use anyhow::Result;
use commands::command::Command;
use commands::markdups::MarkDuplicates;
use commands::memcalc::MemCalc;
use enum_dispatch::enum_dispatch;
use env_logger::Env;
use fgmark_lib::errors::FgmarkError;
use log::info;

#[derive(Parser, Debug)]
#[command(styles = STYLES)]
struct Args {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[enum_dispatch(Command)]
#[derive(Parser, Debug)]
#[command(version)]
enum Subcommand {
    #[command(display_order = 1)]
    Markdups(MarkDuplicates),
    #[command(display_order = 2)]
    Memcalc(MemCalc),
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Running fgmark version {}", version::VERSION);
    if let Err(err) = args.subcommand.execute() {
        eprintln!("error: {err:#}");
        let code = match err.downcast_ref::<FgmarkError>() {
            Some(e) if e.is_usage() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
