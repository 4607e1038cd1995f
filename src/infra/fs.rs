//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides the file system side of a run: per-suite working
//! directories, core-file detection, and the markers left behind for failed
//! suites.
//!
//! 此模块提供运行过程中的文件系统操作：每个套件的工作目录、
//! core 文件检测，以及为失败套件留下的标记。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::suite::Suite;

/// Name of the core file a crashing native process leaves in its working directory.
pub const CORE_FILE_NAME: &str = "core";

/// Creates a fresh working directory for a suite under `work_root`.
///
/// The directory is kept after the run so failed suites can be inspected.
///
/// # Arguments
/// * `work_root` - Directory under which suite directories are created
/// * `suite_dir_name` - File-system friendly suite name, used as prefix
///
/// # Returns
/// The path of the new directory
pub fn create_suite_dir(work_root: &Path, suite_dir_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(work_root).with_context(|| {
        format!("Failed to create work directory: {}", work_root.display())
    })?;

    let temp_dir = tempfile::Builder::new()
        .prefix(&format!("{suite_dir_name}-"))
        .tempdir_in(work_root)
        .with_context(|| {
            format!(
                "Failed to create suite directory in {}",
                work_root.display()
            )
        })?;

    Ok(temp_dir.keep())
}

pub fn core_path(working_dir: &Path) -> PathBuf {
    working_dir.join(CORE_FILE_NAME)
}

/// Whether a native core file is present in `working_dir`. A single `stat`.
/// 检查 `working_dir` 中是否存在原生 core 文件。仅一次 `stat`。
pub fn is_core_present(working_dir: &Path) -> bool {
    core_path(working_dir).exists()
}

/// Path of the marker that points at a failed suite's working directory.
pub fn failed_marker_path(failed_dir: &Path, suite_dir_name: &str) -> PathBuf {
    failed_dir.join(format!("{suite_dir_name}-FAILED"))
}

/// What the failure hook knows about a failed suite.
/// 失败钩子所知道的关于失败套件的信息。
#[derive(Debug, Clone, Default)]
pub struct FailedSuite<'a> {
    pub suite_dir_name: &'a str,
    pub working_dir: Option<&'a Path>,
    pub native_pid: Option<u32>,
    pub native_binary: Option<&'a Path>,
}

/// Leaves a marker for a failed suite and reports a core file if one exists.
///
/// The marker is a symlink `<failed_dir>/<suite>-FAILED` pointing at the
/// suite's working directory. Errors are logged and never propagated.
///
/// 为失败的套件留下标记，并在存在 core 文件时报告。
/// 标记是指向套件工作目录的符号链接 `<failed_dir>/<suite>-FAILED`。错误只记录，不传播。
pub fn handle_failed_suite(failed_dir: &Path, failed: &FailedSuite<'_>) {
    let Some(working_dir) = failed.working_dir else {
        return;
    };

    let link_path = failed_marker_path(failed_dir, failed.suite_dir_name);
    if let Err(e) = create_marker(failed_dir, &link_path, working_dir) {
        tracing::warn!("Failed to create failed-suite marker {}: {:#}", link_path.display(), e);
    } else {
        tracing::error!(
            "Symlink to failed testcase directory: {} -> {}",
            link_path.display(),
            working_dir.display()
        );
    }

    let core = core_path(working_dir);
    if core.exists() {
        tracing::error!("Core-file exists in test working directory: {}!", core.display());
        if let Some(binary) = failed.native_binary {
            tracing::error!("gdb {} {}", binary.display(), core.display());
        }
    }
    if let Some(pid) = failed.native_pid {
        tracing::debug!("Native process of failed suite had pid {}", pid);
    }
}

fn create_marker(failed_dir: &Path, link_path: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(failed_dir).with_context(|| {
        format!("Failed to create failed-suite directory: {}", failed_dir.display())
    })?;
    if link_path.symlink_metadata().is_ok() {
        return Ok(());
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link_path)
        .with_context(|| format!("Failed to symlink {}", link_path.display()))?;
    #[cfg(not(unix))]
    fs::write(link_path, target.display().to_string())
        .with_context(|| format!("Failed to write {}", link_path.display()))?;
    Ok(())
}

/// Removes stale failed markers of the suites that are about to run again.
/// 删除即将重新运行的套件的过期失败标记。
pub fn clear_failed_markers(failed_dir: &Path, suites: &[Suite]) {
    for suite in suites {
        let link_path = failed_marker_path(failed_dir, &suite.dir_name());
        let is_marker = link_path
            .symlink_metadata()
            .map(|meta| meta.file_type().is_symlink() || meta.is_file())
            .unwrap_or(false);
        if is_marker {
            if let Err(e) = fs::remove_file(&link_path) {
                tracing::warn!("Failed to remove stale marker {}: {}", link_path.display(), e);
            }
        }
    }
}
