//! # Run Command Module / 运行命令模块
//!
//! This module implements the `run` command: it loads the test plan, builds
//! the suites, and hands them to the run controller with the chosen strategy.
//!
//! 此模块实现 `run` 命令：加载测试计划、构建套件，并以所选策略交给运行控制器。

use anyhow::{Context, Result};
use colored::*;
use std::{fs, path::PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        config::{self, Overrides, Settings},
        controller::{ExecutionStrategy, RunController},
        handle::WorkerLaunch,
        planner,
        scheduler::SchedulerSettings,
        suite::TestCase,
    },
    infra::t,
};

/// Arguments of the `run` command.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub overrides: Overrides,
    pub filter: Option<String>,
    pub skip_filter: Option<String>,
    /// `--lang` was given, so the plan's `language` is ignored.
    pub language_fixed: bool,
}

/// Executes the run command with the provided arguments.
///
/// # Returns
/// The exit status of the run: 0 success, 1 failed tests, 255 crashed suites
pub async fn execute(args: RunArgs) -> Result<u8> {
    let config_path = fs::canonicalize(&args.config)
        .with_context(|| t!("run.config_not_found", path = args.config.display()).to_string())?;
    let plan = config::load_test_plan(&config_path)
        .with_context(|| t!("run.config_parse_failed").to_string())?;
    if !args.language_fixed {
        crate::set_language(&plan.language);
    }

    println!(
        "{}",
        t!("run.loading_plan", path = config_path.display())
    );

    let mut settings = plan.settings;
    settings.apply(&args.overrides);
    settings
        .validate()
        .with_context(|| t!("run.invalid_settings").to_string())?;

    let filters = planner::parse_filters(args.filter.as_deref().unwrap_or_default())
        .with_context(|| t!("run.invalid_filter").to_string())?;
    let skip_filters = planner::parse_filters(args.skip_filter.as_deref().unwrap_or_default())
        .with_context(|| t!("run.invalid_filter").to_string())?;
    let cases: Vec<TestCase> = plan.cases.into_iter().map(TestCase::from).collect();
    let suite_plan = planner::plan_suites(cases, &filters, &skip_filters, settings.max_cpus());

    println!(
        "{}",
        t!(
            "run.cases_matched",
            matched = suite_plan.matched,
            total = suite_plan.total,
            suites = suite_plan.suites.len()
        )
        .cyan()
    );
    if suite_plan.cpu_shortage_suites > 0 {
        println!(
            "{}",
            t!(
                "run.cpu_shortage_suites",
                count = suite_plan.cpu_shortage_suites,
                max = settings.max_cpus()
            )
            .yellow()
        );
    }

    if suite_plan.suites.is_empty() {
        println!("{}", t!("run.no_cases_to_run").green());
        return Ok(0);
    }

    let strategy = if settings.interactive {
        ExecutionStrategy::Interactive
    } else {
        ExecutionStrategy::Forked
    };
    let scheduler_settings = scheduler_settings(&settings)?;
    println!(
        "{}",
        t!(
            "run.running_with",
            jobs = scheduler_settings.max_concurrent_tests,
            cpus = scheduler_settings.cpus.len(),
            retries = settings.retries
        )
        .bold()
    );

    let cancel = setup_signal_handler();
    let controller = RunController::new(strategy, scheduler_settings, settings.retries, cancel);
    let report = controller.run(suite_plan.suites).await?;

    let code = report.exit_code();
    if code == 0 {
        println!("\n{}", t!("run.all_passed").green().bold());
    } else {
        println!("\n{}", t!("run.finished_with_failures", code = code).red().bold());
    }
    Ok(code)
}

/// Translates the plan's settings into what the scheduler needs.
fn scheduler_settings(settings: &Settings) -> Result<SchedulerSettings> {
    let mut scheduler = SchedulerSettings::new(
        settings.cpu_pool(),
        settings.work_dir(),
        WorkerLaunch::current_exe()?,
    );
    scheduler.max_concurrent_tests = settings.jobs();
    scheduler.max_vpp_cpus = settings.max_cpus();
    scheduler.timeout = settings.timeout();
    scheduler.core_timeout = settings.core_timeout();
    scheduler.failfast = settings.failfast;
    scheduler.failed_dir = settings.failed_dir();
    Ok(scheduler)
}

/// Sets up a signal handler for graceful shutdown.
fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\n{}", t!("run.shutdown_signal").yellow());
                token_clone.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    token
}
