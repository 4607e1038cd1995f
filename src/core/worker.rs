//! # Worker Execution Module / 工作进程执行模块
//!
//! Runs the tests of one suite and reports progress through an [`EventSink`].
//! In forked mode this code runs inside the worker process and the sink is the
//! process's stdout; in interactive mode it runs in the scheduler's own process.
//!
//! 运行一个套件中的测试，并通过 [`EventSink`] 报告进度。
//! 在派生模式下，这段代码在工作进程中运行，事件写入进程的 stdout；
//! 在交互模式下，它在调度器自身的进程中运行。

use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::core::protocol::{EventSink, Heartbeat, WorkerAssignment, WorkerEvent};
use crate::core::result::ResultCode;
use crate::core::suite::{TestCase, TestState};
use crate::infra::command::{self, NativeCommand, OutputMode};
use crate::infra::fs;

/// Exit status with which a native test reports that it skipped itself.
pub const SKIP_EXIT_CODE: i32 = 77;

/// Maps a native exit status to a result code.
///
/// `None` means the process was killed by a signal, which is an `ERROR`
/// rather than a test failure.
///
/// 将原生退出状态映射为结果代码。`None` 表示进程被信号终止，记为 `ERROR` 而非测试失败。
pub fn classify_exit(code: Option<i32>, expected_failure: bool) -> ResultCode {
    match code {
        Some(0) if expected_failure => ResultCode::UnexpectedPass,
        Some(0) => ResultCode::Pass,
        Some(SKIP_EXIT_CODE) => ResultCode::Skip,
        Some(_) if expected_failure => ResultCode::ExpectedFail,
        Some(_) => ResultCode::Fail,
        None => ResultCode::Error,
    }
}

/// Executes every test of the assigned suite in order.
///
/// Each test is announced with a heartbeat and a `TEST_RUN` result before
/// anything else happens, so a parent that kills this worker still knows
/// which tests were started. The final `Completion` event carries whether
/// the whole suite succeeded.
///
/// # Returns
/// Whether the suite succeeded
pub async fn execute_suite(
    assignment: &WorkerAssignment,
    sink: &mut dyn EventSink,
    mode: OutputMode,
) -> Result<bool> {
    let suite = &assignment.suite;
    let working_dir = fs::create_suite_dir(&assignment.work_root, &suite.dir_name())?;
    let cpus = assignment
        .cpus
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");

    tracing::debug!(
        "Running suite {} in {} on cpus [{}]",
        suite.name(),
        working_dir.display(),
        cpus
    );

    let mut succeeded = true;
    for case in suite.cases() {
        let command = command::parse_command(&case.command);
        let mut heartbeat = Heartbeat {
            last_test: Some(case.id.clone()),
            native_binary: command.as_ref().ok().map(|c| c.program.clone()),
            working_dir: Some(working_dir.clone()),
            native_pid: None,
        };
        sink.emit(WorkerEvent::Heartbeat(heartbeat.clone()))?;
        sink.emit(WorkerEvent::Result {
            test_id: case.id.clone(),
            code: ResultCode::TestRun,
        })?;

        let code = match case.state {
            TestState::Disabled => ResultCode::Skip,
            TestState::SkippedForCpuShortage => ResultCode::SkipCpuShortage,
            TestState::Runnable => match command {
                Ok(command) => {
                    run_case(case, &command, &working_dir, &cpus, &mut heartbeat, sink, mode).await?
                }
                Err(e) => {
                    tracing::error!("{}: {:#}", case.id, e);
                    ResultCode::Error
                }
            },
        };

        sink.emit(WorkerEvent::Result {
            test_id: case.id.clone(),
            code,
        })?;
        if let Err(e) = writeln!(std::io::stderr(), "{} ... {}", case.id, code) {
            tracing::debug!("Failed to write progress for {}: {}", case.id, e);
        }

        if code.is_failing() {
            succeeded = false;
            if assignment.failfast {
                break;
            }
        }
    }

    sink.emit(WorkerEvent::Completion { succeeded })?;
    Ok(succeeded)
}

async fn run_case(
    case: &TestCase,
    command: &NativeCommand,
    working_dir: &Path,
    cpus: &str,
    heartbeat: &mut Heartbeat,
    sink: &mut dyn EventSink,
    mode: OutputMode,
) -> Result<ResultCode> {
    let envs = [
        ("SUITE_RUNNER_TEST_ID", case.id.clone()),
        ("SUITE_RUNNER_CPUS", cpus.to_string()),
        (
            "SUITE_RUNNER_WORK_DIR",
            working_dir.display().to_string(),
        ),
    ];

    let process = match command::spawn_native(command, working_dir, &envs, mode) {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(
                "{}: failed to spawn {}: {}",
                case.id,
                command.program.display(),
                e
            );
            return Ok(ResultCode::Error);
        }
    };

    heartbeat.native_pid = process.pid();
    sink.emit(WorkerEvent::Heartbeat(heartbeat.clone()))?;

    match process.wait().await {
        Ok(status) => Ok(classify_exit(status.code(), case.expected_failure)),
        Err(e) => {
            tracing::error!("{}: failed to wait for native process: {}", case.id, e);
            Ok(ResultCode::Error)
        }
    }
}
