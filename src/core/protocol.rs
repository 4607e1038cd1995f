//! # Worker Protocol Module / 工作进程协议模块
//!
//! Messages exchanged between the scheduler and a worker process. The
//! scheduler writes one [`WorkerAssignment`] to the worker's stdin; the worker
//! answers with newline-delimited JSON [`WorkerEvent`]s on its stdout.
//!
//! 调度器与工作进程之间交换的消息。调度器向工作进程的 stdin 写入一个
//! [`WorkerAssignment`]；工作进程在其 stdout 上以换行分隔的 JSON 返回 [`WorkerEvent`]。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::core::result::ResultCode;
use crate::core::suite::Suite;

/// Everything a worker needs to execute one suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub suite: Suite,
    /// CPU ids reserved for this suite; empty for over-budget suites.
    pub cpus: Vec<usize>,
    /// Directory under which the suite's working directory is created.
    pub work_root: PathBuf,
    /// Stop after the first failing test.
    pub failfast: bool,
}

/// Liveness and progress report: which test runs where, and under which native pid.
/// 存活与进度报告：哪个测试在哪里运行，以及对应的原生进程 pid。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub last_test: Option<String>,
    pub native_binary: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub native_pid: Option<u32>,
}

/// One message from a worker.
/// 来自工作进程的一条消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Heartbeat(Heartbeat),
    Result { test_id: String, code: ResultCode },
    Completion { succeeded: bool },
}

impl WorkerEvent {
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode worker event")
    }

    /// Parses one stdout line. Lines that are not protocol messages yield `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

/// Destination of a worker's events.
///
/// A forked worker writes them to its stdout; the interactive strategy feeds
/// them straight into the scheduler-side ledger.
///
/// 工作进程事件的去向。派生的工作进程将其写入 stdout；
/// 交互式策略则直接写入调度端的结果账本。
pub trait EventSink: Send {
    fn emit(&mut self, event: WorkerEvent) -> Result<()>;
}

/// Writes events as JSON lines, flushing after each one so the scheduler sees
/// progress as it happens.
pub struct JsonLineSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for JsonLineSink<W> {
    fn emit(&mut self, event: WorkerEvent) -> Result<()> {
        let line = event.to_line()?;
        writeln!(self.out, "{line}").context("Failed to write worker event")?;
        self.out.flush().context("Failed to flush worker event")?;
        Ok(())
    }
}
