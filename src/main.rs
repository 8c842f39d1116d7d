mod cli;
mod commands;
mod config;
mod inventory;
mod progress;
mod render;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: Config::load(cli.config.as_deref())?,
    };

    match cli.command {
        Command::Check(args) => commands::check::run(&ctx, &args),
        Command::Remediate(args) => commands::remediate::run(&ctx, &args),
        Command::Apply(args) => commands::remediate::apply(&ctx, &args),
        Command::State(args) => commands::state::run(&ctx, &args),
        Command::Validate(args) => commands::validate::run(&ctx, &args),
        Command::Categories { format } => commands::categories::run(&ctx, format),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "vconverge", &mut io::stdout());
            Ok(())
        }
    }
}
