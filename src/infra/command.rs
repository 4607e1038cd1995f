//! # Command Execution Module / 命令执行模块
//!
//! Parsing and spawning of the native commands that implement test cases, and
//! best-effort signalling of native processes left behind by killed workers.
//!
//! 解析并派生实现测试用例的原生命令，并尽力向被终止的工作进程遗留的原生进程发送信号。

use anyhow::{Result, anyhow};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// A parsed test command: the native binary and its arguments.
/// 解析后的测试命令：原生二进制文件及其参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Expands environment variables and `~` in a command line and splits it
/// with shell quoting rules. Variables unknown to this process (such as the
/// `SUITE_RUNNER_*` ones set only for the test) are left for the test's shell.
///
/// 展开命令行中的环境变量和 `~`，并按 shell 引号规则拆分。
/// 本进程未知的变量保持原样，留给测试自身的 shell 处理。
pub fn parse_command(command: &str) -> Result<NativeCommand> {
    let with_env =
        shellexpand::env_with_context_no_errors(command, |name| std::env::var(name).ok());
    let expanded = shellexpand::tilde(&with_env).to_string();

    let parts = shlex::split(&expanded)
        .ok_or_else(|| anyhow!("Failed to parse command: {}", expanded))?;

    let (program, args) = parts
        .split_first()
        .ok_or_else(|| anyhow!("Empty command after parsing."))?;

    Ok(NativeCommand {
        program: PathBuf::from(program),
        args: args.to_vec(),
    })
}

/// Where the native process's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Both streams are copied to this process's stderr, which a worker's
    /// parent captures.
    Capture,
    /// Both streams are inherited; used when running in the foreground.
    Inherit,
}

/// A running native process and the tasks forwarding its output.
pub struct NativeProcess {
    child: Child,
    forwarders: Vec<JoinHandle<()>>,
}

impl NativeProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the process to exit and for all of its output to be forwarded.
    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await;
        for forwarder in self.forwarders {
            if let Err(e) = forwarder.await {
                tracing::warn!("Failed to join output forwarder: {}", e);
            }
        }
        status
    }
}

/// Spawns a native command in `cwd` with the extra environment `envs`.
pub fn spawn_native(
    command: &NativeCommand,
    cwd: &Path,
    envs: &[(&str, String)],
    mode: OutputMode,
) -> io::Result<NativeProcess> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    match mode {
        OutputMode::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let child = cmd.spawn()?;
            Ok(NativeProcess {
                child,
                forwarders: Vec::new(),
            })
        }
        OutputMode::Capture => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = cmd.spawn()?;
            let mut forwarders = Vec::with_capacity(2);

            if let Some(mut stdout) = child.stdout.take() {
                forwarders.push(tokio::spawn(async move {
                    let mut sink = tokio::io::stderr();
                    if let Err(e) = tokio::io::copy(&mut stdout, &mut sink).await {
                        tracing::debug!("Native stdout forwarding stopped: {}", e);
                    }
                }));
            }
            if let Some(mut stderr) = child.stderr.take() {
                forwarders.push(tokio::spawn(async move {
                    let mut sink = tokio::io::stderr();
                    if let Err(e) = tokio::io::copy(&mut stderr, &mut sink).await {
                        tracing::debug!("Native stderr forwarding stopped: {}", e);
                    }
                }));
            }

            Ok(NativeProcess { child, forwarders })
        }
    }
}

/// Sends SIGTERM to a native process. A process that is already gone counts
/// as terminated.
///
/// 向原生进程发送 SIGTERM。已经不存在的进程视为已终止。
#[cfg(unix)]
pub fn terminate_pid(pid: u32) -> io::Result<()> {
    if pid == 0 {
        // kill(0, ..) would signal our own process group.
        return Ok(());
    }
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_honours_quotes() {
        let cmd = parse_command(r#"sh -c "echo 'a b'; exit 3""#).unwrap();
        assert_eq!(cmd.program, PathBuf::from("sh"));
        assert_eq!(cmd.args, vec!["-c", "echo 'a b'; exit 3"]);
    }

    #[test]
    fn parse_command_rejects_empty_and_unbalanced_input() {
        assert!(parse_command("   ").is_err());
        assert!(parse_command("sh -c \"unterminated").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captured_process_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = parse_command("sh -c 'echo hidden; exit 7'").unwrap();
        let process = spawn_native(&cmd, dir.path(), &[], OutputMode::Capture).unwrap();
        assert!(process.pid().is_some());
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[cfg(unix)]
    #[test]
    fn terminating_a_missing_pid_is_not_an_error() {
        // Above any configurable pid_max, so no such process can exist.
        assert!(terminate_pid(i32::MAX as u32).is_ok());
        assert!(terminate_pid(i32::MAX as u32).is_ok());
        assert!(terminate_pid(0).is_ok());
    }
}
