// src/cli.rs
use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::{env, path::PathBuf};

use crate::core::config::{DEFAULT_PLAN_FILE, Overrides};
use crate::infra::t;

pub mod commands;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` argument.
fn pre_parse_language() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    let pos = args.iter().position(|arg| arg == "--lang")?;
    args.get(pos + 1).cloned()
}

fn build_cli(locale: &str) -> Command {
    Command::new("suite-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli.about", locale = locale).to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli.lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cli.run_about", locale = locale).to_string())
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .help(t!("cli.arg_config", locale = locale).to_string())
                        .value_name("CONFIG")
                        .default_value(DEFAULT_PLAN_FILE)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help(t!("cli.arg_jobs", locale = locale).to_string())
                        .value_name("JOBS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("retries")
                        .short('r')
                        .long("retries")
                        .help(t!("cli.arg_retries", locale = locale).to_string())
                        .value_name("RETRIES")
                        .value_parser(clap::value_parser!(u32))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .help(t!("cli.arg_timeout", locale = locale).to_string())
                        .value_name("SECONDS")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("failfast")
                        .long("failfast")
                        .help(t!("cli.arg_failfast", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("interactive")
                        .long("interactive")
                        .help(t!("cli.arg_interactive", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .help(t!("cli.arg_filter", locale = locale).to_string())
                        .value_name("PATTERNS")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("skip-filter")
                        .long("skip-filter")
                        .help(t!("cli.arg_skip_filter", locale = locale).to_string())
                        .value_name("PATTERNS")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("worker")
                .about("Runs one suite assignment read from stdin. Used internally.")
                .hide(true),
        )
}

/// Parses the command line and runs the selected command.
///
/// # Returns
/// The process exit status
pub async fn run() -> Result<u8> {
    // Pre-parse language and initialize i18n first.
    let explicit_language = pre_parse_language();
    match &explicit_language {
        Some(language) => crate::set_language(language),
        None => crate::init(),
    }
    let language = rust_i18n::locale().to_string();

    let matches = build_cli(&language).get_matches();

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let args = commands::run::RunArgs {
                config: run_matches
                    .get_one::<PathBuf>("config")
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAN_FILE)),
                overrides: Overrides {
                    jobs: run_matches.get_one::<usize>("jobs").copied(),
                    retries: run_matches.get_one::<u32>("retries").copied(),
                    timeout_secs: run_matches.get_one::<u64>("timeout").copied(),
                    failfast: run_matches.get_flag("failfast"),
                    interactive: run_matches.get_flag("interactive"),
                },
                filter: run_matches.get_one::<String>("filter").cloned(),
                skip_filter: run_matches.get_one::<String>("skip-filter").cloned(),
                language_fixed: explicit_language.is_some(),
            };
            commands::run::execute(args).await
        }
        Some(("worker", _)) => commands::worker::execute().await,
        // `subcommand_required` makes clap exit before reaching this.
        _ => Ok(0),
    }
}
