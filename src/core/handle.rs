//! # Worker Handle Module / 工作进程句柄模块
//!
//! A [`WorkerHandle`] owns one spawned worker process. The worker's stdout is
//! demultiplexed into heartbeat, result and completion channels; its stderr and
//! any stray stdout lines go to an output channel that the stream drain reads.
//! The scheduler polls each handle once per tick with [`WorkerHandle::poll`].
//!
//! [`WorkerHandle`] 拥有一个已派生的工作进程。工作进程的 stdout 被拆分为心跳、
//! 结果和完成三个通道；其 stderr 以及 stdout 中的非协议行进入输出通道，由输出排空任务读取。
//! 调度器在每个周期通过 [`WorkerHandle::poll`] 轮询每个句柄一次。

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::core::error::WorkerFailure;
use crate::core::protocol::{Heartbeat, WorkerAssignment, WorkerEvent};
use crate::core::result::{ResultCode, SuiteResult};
use crate::core::suite::Suite;
use crate::infra::command;
use crate::infra::fs;

/// Identifier the scheduler gives each spawned worker.
pub type WorkerId = u64;

/// How to start a worker process.
/// 如何启动一个工作进程。
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerLaunch {
    /// Re-executes the current binary with the hidden `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self {
            program,
            args: vec!["worker".to_string()],
        })
    }
}

/// Lifecycle of a worker. `Running` is re-entered on every message; the
/// terminal states never go back.
///
/// 工作进程的生命周期。每收到一条消息都会重新进入 `Running`；终止状态不会回退。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    Running,
    Completed,
    TimedOut,
    Crashed,
    StuckAfterCore,
    Finalized,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkerState::Spawned | WorkerState::Running)
    }
}

/// Outcome of one monitor poll.
#[derive(Debug)]
pub enum WorkerPoll {
    Pending,
    Completed,
    Failed(WorkerFailure),
}

/// A test class that left a core file behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSighting {
    pub native_binary: PathBuf,
    pub working_dir: PathBuf,
}

pub struct WorkerHandle {
    id: WorkerId,
    child: Child,
    pid: Option<u32>,
    assigned_cpus: Vec<usize>,
    heartbeats: UnboundedReceiver<Heartbeat>,
    results: UnboundedReceiver<(String, ResultCode)>,
    completion: UnboundedReceiver<bool>,
    events_reader: JoinHandle<()>,
    result: SuiteResult,
    state: WorkerState,
    last_heard: Instant,
    last: Heartbeat,
    core_detected_at: Option<Instant>,
    classes_with_core: BTreeMap<String, CoreSighting>,
    succeeded: Option<bool>,
}

impl WorkerHandle {
    /// Spawns a worker for `suite` and sends it its assignment.
    ///
    /// # Returns
    /// The handle and the receiving end of its output channel, which the
    /// caller hands to the stream drain
    pub fn spawn(
        id: WorkerId,
        suite: Arc<Suite>,
        assigned_cpus: Vec<usize>,
        launch: &WorkerLaunch,
        work_root: PathBuf,
        failfast: bool,
    ) -> Result<(Self, UnboundedReceiver<Vec<u8>>)> {
        let assignment = WorkerAssignment {
            suite: suite.as_ref().clone(),
            cpus: assigned_cpus.clone(),
            work_root,
            failfast,
        };
        let mut payload =
            serde_json::to_vec(&assignment).context("Failed to encode worker assignment")?;
        payload.push(b'\n');

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn worker {} for suite {}",
                launch.program.display(),
                suite.name()
            )
        })?;
        let pid = child.id();

        let mut stdin = child.stdin.take().context("Worker stdin was not captured")?;
        let stdout = child.stdout.take().context("Worker stdout was not captured")?;
        let stderr = child.stderr.take().context("Worker stderr was not captured")?;

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!("Failed to send assignment to worker {}: {}", id, e);
            }
        });

        let (heartbeat_tx, heartbeats) = mpsc::unbounded_channel();
        let (result_tx, results) = mpsc::unbounded_channel();
        let (completion_tx, completion) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        let events_reader = tokio::spawn(read_events(
            stdout,
            heartbeat_tx,
            result_tx,
            completion_tx,
            output_tx.clone(),
        ));
        tokio::spawn(forward_output(stderr, output_tx));

        tracing::debug!(
            "Spawned worker {} (pid {:?}) for suite {} on cpus {:?}",
            id,
            pid,
            suite.name(),
            assigned_cpus
        );

        let handle = Self {
            id,
            child,
            pid,
            assigned_cpus,
            heartbeats,
            results,
            completion,
            events_reader,
            result: SuiteResult::new(suite),
            state: WorkerState::Spawned,
            last_heard: Instant::now(),
            last: Heartbeat::default(),
            core_detected_at: None,
            classes_with_core: BTreeMap::new(),
            succeeded: None,
        };
        Ok((handle, output_rx))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn suite(&self) -> &Arc<Suite> {
        self.result.suite()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn result(&self) -> &SuiteResult {
        &self.result
    }

    pub fn last_heartbeat(&self) -> &Heartbeat {
        &self.last
    }

    pub fn succeeded(&self) -> Option<bool> {
        self.succeeded
    }

    pub fn classes_with_core(&self) -> &BTreeMap<String, CoreSighting> {
        &self.classes_with_core
    }

    /// Gives the reserved CPUs back to the caller. Subsequent calls return nothing.
    pub fn take_assigned_cpus(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.assigned_cpus)
    }

    /// One monitor step: drains pending messages and checks, in order,
    /// completion, heartbeat timeout, unexpected death and a lingering core file.
    ///
    /// 一次监控步骤：读取待处理消息，并依次检查完成、心跳超时、意外退出和残留的 core 文件。
    pub fn poll(&mut self, now: Instant, timeout: Duration, core_timeout: Duration) -> WorkerPoll {
        if self.state.is_terminal() {
            return WorkerPoll::Pending;
        }

        self.pump(now);
        if self.take_completion(now) {
            return WorkerPoll::Completed;
        }

        if now.saturating_duration_since(self.last_heard) > timeout {
            self.state = WorkerState::TimedOut;
            return WorkerPoll::Failed(WorkerFailure::Timeout {
                timeout,
                last_test: self.last_test_label(),
                working_dir: self.working_dir_label(),
            });
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                // The event stream may still hold the completion written just
                // before exit.
                if !self.events_reader.is_finished() {
                    return WorkerPoll::Pending;
                }
                self.pump(now);
                if self.take_completion(now) {
                    return WorkerPoll::Completed;
                }
                tracing::debug!("Worker {} exited with {} before completing", self.id, status);
                self.state = WorkerState::Crashed;
                return WorkerPoll::Failed(WorkerFailure::Crash {
                    last_test: self.last_test_label(),
                    working_dir: self.working_dir_label(),
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to query worker {}: {}", self.id, e),
        }

        if let (Some(working_dir), Some(binary)) = (&self.last.working_dir, &self.last.native_binary) {
            if fs::is_core_present(working_dir) {
                let class = self.last_test_class();
                self.classes_with_core.entry(class).or_insert_with(|| CoreSighting {
                    native_binary: binary.clone(),
                    working_dir: working_dir.clone(),
                });
                match self.core_detected_at {
                    None => {
                        tracing::warn!(
                            "Core file detected in {} (last test {})",
                            working_dir.display(),
                            self.last_test_label()
                        );
                        self.core_detected_at = Some(now);
                    }
                    Some(at) if now.saturating_duration_since(at) > core_timeout => {
                        self.state = WorkerState::StuckAfterCore;
                        return WorkerPoll::Failed(WorkerFailure::StuckAfterCore {
                            last_test: self.last_test_label(),
                            working_dir: self.working_dir_label(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        WorkerPoll::Pending
    }

    /// Applies a forced-termination failure: kills the worker, records an
    /// `ERROR` for the last test and marks the result as crashed.
    ///
    /// 应用强制终止失败：终止工作进程，为最后一个测试记录 `ERROR`，并将结果标记为崩溃。
    pub fn fail(&mut self, failure: &WorkerFailure) {
        tracing::error!("{}", failure);
        self.terminate();
        let test_id = self
            .last
            .last_test
            .clone()
            .unwrap_or_else(|| self.suite().name().to_string());
        self.result.record(test_id, ResultCode::Error);
        self.result.mark_crashed();
        if !self.state.is_terminal() {
            self.state = WorkerState::Crashed;
        }
    }

    /// Kills the worker and sends SIGTERM to the last reported native pid.
    /// Safe to call any number of times; never touches the result.
    ///
    /// 终止工作进程，并向最后报告的原生 pid 发送 SIGTERM。可重复调用；不会改动结果。
    pub fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Worker {} already gone: {}", self.id, e);
        }
        if let Some(pid) = self.last.native_pid {
            if let Err(e) = command::terminate_pid(pid) {
                tracing::warn!("Failed to terminate native process {}: {}", pid, e);
            }
        }
    }

    /// Waits up to `timeout` for the worker process to exit.
    pub async fn join(&mut self, timeout: Duration) -> Option<WorkerFailure> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait for worker {}: {}", self.id, e);
                None
            }
            Err(_) => Some(WorkerFailure::JoinTimeout {
                last_test: self.last_test_label(),
                pid: self.pid.unwrap_or_default(),
            }),
        }
    }

    /// Freezes the ledger of this worker.
    pub fn into_result(mut self) -> SuiteResult {
        self.state = WorkerState::Finalized;
        self.result
    }

    fn pump(&mut self, now: Instant) {
        while let Ok((test_id, code)) = self.results.try_recv() {
            self.result.record(test_id, code);
            self.touch(now);
        }
        while let Ok(heartbeat) = self.heartbeats.try_recv() {
            self.last = heartbeat;
            self.touch(now);
        }
    }

    fn take_completion(&mut self, now: Instant) -> bool {
        match self.completion.try_recv() {
            Ok(succeeded) => {
                self.succeeded = Some(succeeded);
                self.touch(now);
                self.state = WorkerState::Completed;
                true
            }
            Err(_) => false,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_heard = now;
        if self.state == WorkerState::Spawned {
            self.state = WorkerState::Running;
        }
    }

    fn last_test_label(&self) -> String {
        self.last
            .last_test
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    fn last_test_class(&self) -> String {
        let test = self.last_test_label();
        match test.rsplit_once('.') {
            Some((class, _)) => class.to_string(),
            None => test,
        }
    }

    fn working_dir_label(&self) -> String {
        WorkerFailure::working_dir_label(self.last.working_dir.as_ref())
    }
}

async fn read_events<R>(
    stdout: R,
    heartbeats: UnboundedSender<Heartbeat>,
    results: UnboundedSender<(String, ResultCode)>,
    completion: UnboundedSender<bool>,
    output: UnboundedSender<Vec<u8>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            // A closed receiver only means the handle is gone.
            Ok(_) => match decode_event(&line) {
                Some(WorkerEvent::Heartbeat(heartbeat)) => {
                    let _ = heartbeats.send(heartbeat);
                }
                Some(WorkerEvent::Result { test_id, code }) => {
                    let _ = results.send((test_id, code));
                }
                Some(WorkerEvent::Completion { succeeded }) => {
                    let _ = completion.send(succeeded);
                }
                None => {
                    let _ = output.send(line.clone());
                }
            },
            Err(e) => {
                tracing::debug!("Worker event stream closed: {}", e);
                break;
            }
        }
    }
}

/// Stray lines, including ones that are not UTF-8, are not events.
fn decode_event(line: &[u8]) -> Option<WorkerEvent> {
    let text = std::str::from_utf8(line).ok()?;
    WorkerEvent::from_line(text)
}

/// Copies the worker's stderr as raw bytes until EOF. Reading stops early
/// only on an I/O error; content never ends it.
async fn forward_output<R>(stderr: R, output: UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut closed = false;
    loop {
        let mut chunk = Vec::new();
        match reader.read_until(b'\n', &mut chunk).await {
            Ok(0) => break,
            // Keep reading after the drain is gone so the worker never hits a
            // broken pipe.
            Ok(_) => {
                if !closed && output.send(chunk).is_err() {
                    closed = true;
                }
            }
            Err(e) => {
                tracing::debug!("Worker output stream closed: {}", e);
                break;
            }
        }
    }
}
