//! # Stream Drain Module / 输出排空模块
//!
//! A background task that copies the captured output of workers to the
//! process's own output. Each worker's output is written as one contiguous
//! block, byte for byte. Workers that already finished are drained first so their buffers do
//! not pile up while a long-running worker is being read.
//!
//! 一个后台任务，将工作进程捕获的输出复制到本进程的输出。
//! 每个工作进程的输出作为一个连续的块写出。已结束的工作进程优先排空，
//! 以免在读取长时间运行的工作进程时其缓冲区不断堆积。

use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::core::handle::WorkerId;

enum DrainCommand {
    Track {
        id: WorkerId,
        output: UnboundedReceiver<Vec<u8>>,
    },
    Finished(WorkerId),
}

/// Handle to the drain task. The unread and finished sets live inside the
/// task; the coordinator only sends it messages.
pub struct StreamDrain<W> {
    commands: UnboundedSender<DrainCommand>,
    task: JoinHandle<W>,
}

impl<W> StreamDrain<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn spawn(sink: W) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drain_loop(rx, sink));
        Self { commands, task }
    }

    /// Starts tracking the output of a newly spawned worker.
    pub fn track(&self, id: WorkerId, output: UnboundedReceiver<Vec<u8>>) {
        if self.commands.send(DrainCommand::Track { id, output }).is_err() {
            tracing::warn!("Output drain stopped; output of worker {} is lost", id);
        }
    }

    /// Tells the drain that a worker finished and its output should be
    /// flushed before that of still-running workers.
    pub fn finished(&self, id: WorkerId) {
        let _ = self.commands.send(DrainCommand::Finished(id));
    }

    /// Stops accepting new workers, waits up to `timeout` for all tracked
    /// output to be written and returns the sink.
    pub async fn shutdown(self, timeout: Duration) -> Option<W> {
        drop(self.commands);
        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(sink)) => Some(sink),
            Ok(Err(e)) => {
                tracing::warn!("Output drain task failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("Timed out flushing worker output after {:?}", timeout);
                abort.abort();
                None
            }
        }
    }
}

async fn drain_loop<W>(mut commands: UnboundedReceiver<DrainCommand>, mut sink: W) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut unread: VecDeque<(WorkerId, UnboundedReceiver<Vec<u8>>)> = VecDeque::new();
    let mut finished: HashSet<WorkerId> = HashSet::new();
    let mut accepting = true;

    loop {
        while accepting {
            match commands.try_recv() {
                Ok(command) => apply(command, &mut unread, &mut finished),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => accepting = false,
            }
        }

        let next = unread
            .iter()
            .position(|(id, _)| finished.contains(id))
            .or(if unread.is_empty() { None } else { Some(0) });

        if let Some((id, mut output)) = next.and_then(|index| unread.remove(index)) {
            let mut write_failed = false;
            while let Some(chunk) = output.recv().await {
                if write_failed {
                    continue;
                }
                if let Err(e) = sink.write_all(&chunk).await {
                    tracing::debug!("Dropping output of worker {}: {}", id, e);
                    write_failed = true;
                }
            }
            if let Err(e) = sink.flush().await {
                tracing::debug!("Failed to flush output of worker {}: {}", id, e);
            }
            finished.remove(&id);
        } else if !accepting {
            break;
        } else {
            match commands.recv().await {
                Some(command) => apply(command, &mut unread, &mut finished),
                None => accepting = false,
            }
        }
    }

    sink
}

fn apply(
    command: DrainCommand,
    unread: &mut VecDeque<(WorkerId, UnboundedReceiver<Vec<u8>>)>,
    finished: &mut HashSet<WorkerId>,
) {
    match command {
        DrainCommand::Track { id, output } => unread.push_back((id, output)),
        DrainCommand::Finished(id) => {
            if unread.iter().any(|(unread_id, _)| *unread_id == id) {
                finished.insert(id);
            }
        }
    }
}
