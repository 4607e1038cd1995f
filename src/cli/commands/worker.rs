//! # Worker Command Module / 工作进程命令模块
//!
//! The hidden `worker` subcommand. Reads one [`WorkerAssignment`] from stdin,
//! runs it and reports events on stdout. Everything else goes to stderr.
//!
//! 隐藏的 `worker` 子命令。从 stdin 读取一个 [`WorkerAssignment`]，执行它并在 stdout
//! 上报告事件。其他所有输出都写到 stderr。

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use crate::core::protocol::{JsonLineSink, WorkerAssignment};
use crate::core::worker;
use crate::infra::command::OutputMode;

/// Runs the assignment found on stdin.
///
/// # Returns
/// 0 when the suite succeeded, 1 otherwise
pub async fn execute() -> Result<u8> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read worker assignment")?;
    let assignment: WorkerAssignment =
        serde_json::from_str(&input).context("Failed to decode worker assignment")?;

    let mut sink = JsonLineSink::new(std::io::stdout());
    let succeeded = worker::execute_suite(&assignment, &mut sink, OutputMode::Capture).await?;
    Ok(if succeeded { 0 } else { 1 })
}
