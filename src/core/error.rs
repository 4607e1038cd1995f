//! Worker failure taxonomy.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why the scheduler gave up on a worker. All variants except `JoinTimeout`
/// force termination; `JoinTimeout` is only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    #[error("worker timed out after {timeout:?} without a heartbeat (last test running was `{last_test}' in `{working_dir}')")]
    Timeout {
        timeout: Duration,
        last_test: String,
        working_dir: String,
    },

    #[error("worker unexpectedly died (last test running was `{last_test}' in `{working_dir}')")]
    Crash {
        last_test: String,
        working_dir: String,
    },

    #[error("worker unresponsive and core file exists in test working directory (last test running was `{last_test}' in `{working_dir}')")]
    StuckAfterCore {
        last_test: String,
        working_dir: String,
    },

    #[error("timeout joining finished worker for `{last_test}' (pid {pid})")]
    JoinTimeout { last_test: String, pid: u32 },
}

impl WorkerFailure {
    pub fn working_dir_label(dir: Option<&PathBuf>) -> String {
        dir.map(|d| d.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}
