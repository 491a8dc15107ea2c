mod cli;
mod commands;
mod engine;
mod kinds;
mod paths;
mod progress;
mod provider;
mod runner;
mod signal;
mod stack;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use provider::BackendKind;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// `--stack`, if given
    pub stack: Option<String>,
    /// `--state`, if given
    pub state: Option<String>,
    pub backend: BackendKind,
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
        stack: cli.stack,
        state: cli.state,
        backend: cli.backend,
    };
    log::debug!("verbosity {}, backend {:?}", ctx.verbose, ctx.backend);

    match cli.command {
        Command::Validate => commands::validate::run(&ctx),
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Destroy(args) => commands::destroy::run(&ctx, &args),
        Command::Graph(args) => commands::graph::run(&ctx, &args),
        Command::State(cmd) => commands::state::run(&ctx, &cmd),
        Command::Refresh => commands::refresh::run(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "lakeform", &mut io::stdout());
            Ok(())
        }
    }
}
