mod cli;
mod commands;
mod config;
mod local;
mod render;
mod schema;
mod stack;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use std::io;

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

    match cli.command {
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "atoll", &mut io::stdout());
            Ok(())
        }
        ref command => {
            let config = Config::load(cli.state_dir.as_deref(), None)?;
            match command {
                Command::Plan(args) => commands::plan::run(&config, &cli.stack, args),
                Command::Apply(args) => commands::apply::run(&config, &cli.stack, args, cli.quiet),
                Command::Status(args) => commands::status::run(&config, args),
                Command::Destroy(args) => commands::destroy::run(&config, args, cli.quiet),
                Command::Completions { .. } => unreachable!(),
            }
        }
    }
}
