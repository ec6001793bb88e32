mod builder;
mod cli;
mod commands;
mod config;
mod connection;
mod facts;
mod journal;
mod operation;
mod paths;
mod profile;
mod reconcile;
mod report;
mod steps;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use declarative::RunStatus;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Explicit config file from `--config`
    pub config: Option<PathBuf>,
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
        config: cli.config.clone(),
    };

    match &cli.command {
        Command::Plan { operation, target } => commands::plan::run(&ctx, *operation, target),
        Command::ShowKey(target) => commands::ssh_key::run(&ctx, target),
        Command::Logs(cmd) => commands::logs::run(&ctx, cmd),
        Command::Manage(args) => commands::manage::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "foreman", &mut io::stdout());
            Ok(())
        }
        command => match command.operation() {
            Some((operation, args)) => {
                if commands::run::run(&ctx, operation, args)? == RunStatus::Failed {
                    std::process::exit(1);
                }
                Ok(())
            }
            None => Ok(()),
        },
    }
}
