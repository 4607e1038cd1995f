//! # Run Controller Module / 运行控制器模块
//!
//! The outer retry loop. Each attempt runs the remaining suites through an
//! [`ExecutionStrategy`], prints the summary and keeps only the suites that
//! need another go, narrowed to the tests that did not end cleanly.
//!
//! 外层重试循环。每次尝试通过 [`ExecutionStrategy`] 运行剩余的套件，打印摘要，
//! 并只保留需要再次运行的套件，且仅包含未干净结束的测试。

use anyhow::{Result, bail};
use colored::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::protocol::{EventSink, Heartbeat, WorkerAssignment, WorkerEvent};
use crate::core::result::{AggregateRun, RunStatus, SuiteResult};
use crate::core::scheduler::{Scheduler, SchedulerSettings};
use crate::core::suite::Suite;
use crate::core::worker;
use crate::infra::command::OutputMode;
use crate::infra::fs::{self, FailedSuite};
use crate::infra::t;
use crate::reporting::console::print_results;

/// How the suites of one attempt are executed.
/// 一次尝试中套件的执行方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Each suite in its own worker process, in parallel under the scheduler.
    /// 每个套件在各自的工作进程中运行，由调度器并行调度。
    Forked,
    /// Suites one after another inside this process, with inherited output.
    /// There is no isolation: a hung test hangs the run.
    /// 在本进程中依次运行套件，输出直接继承。没有隔离：挂起的测试会挂起整个运行。
    Interactive,
}

impl ExecutionStrategy {
    /// Runs one attempt and returns one result per suite.
    pub async fn run_pass(
        self,
        settings: &SchedulerSettings,
        suites: Vec<Suite>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SuiteResult>> {
        match self {
            ExecutionStrategy::Forked => {
                let report = Scheduler::new(settings.clone()).run(suites, cancel).await?;
                Ok(report.results)
            }
            ExecutionStrategy::Interactive => run_interactive(settings, suites, cancel).await,
        }
    }
}

/// Feeds worker events straight into a suite's ledger.
struct LedgerSink<'a> {
    result: &'a mut SuiteResult,
    last: Heartbeat,
}

impl EventSink for LedgerSink<'_> {
    fn emit(&mut self, event: WorkerEvent) -> Result<()> {
        match event {
            WorkerEvent::Heartbeat(heartbeat) => self.last = heartbeat,
            WorkerEvent::Result { test_id, code } => self.result.record(test_id, code),
            WorkerEvent::Completion { .. } => {}
        }
        Ok(())
    }
}

async fn run_interactive(
    settings: &SchedulerSettings,
    suites: Vec<Suite>,
    cancel: &CancellationToken,
) -> Result<Vec<SuiteResult>> {
    let mut results = Vec::with_capacity(suites.len());
    let mut queue = suites.into_iter();

    for suite in queue.by_ref() {
        if cancel.is_cancelled() {
            bail!("Run interrupted before suite {}", suite.name());
        }

        let cpus = if suite.cpus_used() > settings.max_vpp_cpus {
            Vec::new()
        } else {
            settings.cpus.iter().take(suite.cpus_used()).copied().collect()
        };
        let assignment = WorkerAssignment {
            suite,
            cpus,
            work_root: settings.work_root.clone(),
            failfast: settings.failfast,
        };
        let mut result = SuiteResult::new(Arc::new(assignment.suite.clone()));
        let mut sink = LedgerSink {
            result: &mut result,
            last: Heartbeat::default(),
        };
        worker::execute_suite(&assignment, &mut sink, OutputMode::Inherit).await?;
        let last = sink.last;

        let successful = result.is_successful();
        if !successful {
            fs::handle_failed_suite(
                &settings.failed_dir,
                &FailedSuite {
                    suite_dir_name: &assignment.suite.dir_name(),
                    working_dir: last.working_dir.as_deref(),
                    native_pid: last.native_pid,
                    native_binary: last.native_binary.as_deref(),
                },
            );
        }
        results.push(result);

        if !successful && settings.failfast {
            break;
        }
    }

    results.extend(queue.map(|suite| SuiteResult::new(Arc::new(suite))));
    Ok(results)
}

/// Outcome of all attempts of a run.
/// 一次运行中所有尝试的结果。
#[derive(Debug)]
pub struct RunReport {
    /// Classification of the last attempt.
    pub status: RunStatus,
    pub attempts: Vec<AggregateRun>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

pub struct RunController {
    strategy: ExecutionStrategy,
    settings: SchedulerSettings,
    retries: u32,
    cancel: CancellationToken,
}

impl RunController {
    pub fn new(
        strategy: ExecutionStrategy,
        settings: SchedulerSettings,
        retries: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            strategy,
            settings,
            retries,
            cancel,
        }
    }

    /// Runs `suites`, retrying the ones that need it up to `retries` times.
    ///
    /// 运行 `suites`，对需要重跑的套件最多重试 `retries` 次。
    ///
    /// # Returns
    /// The report; its status is that of the last attempt
    pub async fn run(&self, suites: Vec<Suite>) -> Result<RunReport> {
        let max_attempts = self.retries + 1;
        let mut attempts_left = max_attempts;
        let mut suites = suites;
        let mut status = RunStatus::Success;
        let mut attempts = Vec::new();

        while !suites.is_empty() && attempts_left > 0 {
            let attempt = max_attempts - attempts_left + 1;
            fs::clear_failed_markers(&self.settings.failed_dir, &suites);
            let test_count: usize = suites.iter().map(Suite::len).sum();
            println!(
                "\n{}",
                t!(
                    "run.attempt_start",
                    attempt = attempt,
                    max = max_attempts,
                    suites = suites.len(),
                    tests = test_count
                )
                .bold()
            );

            let results = self
                .strategy
                .run_pass(&self.settings, suites, &self.cancel)
                .await?;
            let aggregate = AggregateRun::from_results(results);
            print_results(&aggregate);

            status = aggregate.status();
            suites = aggregate.rerun_suites();
            attempts_left -= 1;
            attempts.push(aggregate);

            if status == RunStatus::Success {
                println!("{}", t!("run.attempt_successful").green().bold());
            } else {
                println!(
                    "{}",
                    t!("run.attempts_left", count = attempts_left).yellow()
                );
            }
        }

        Ok(RunReport { status, attempts })
    }
}
