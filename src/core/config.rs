//! # Configuration Module / 配置模块
//!
//! The test plan file (`Suites.toml`): global `[settings]` and the list of
//! `[[cases]]`. Command-line values are layered on top with [`Overrides`].
//!
//! 测试计划文件（`Suites.toml`）：全局 `[settings]` 与 `[[cases]]` 列表。
//! 命令行参数通过 [`Overrides`] 覆盖文件中的值。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::suite::{TestCase, TestState};

/// Default name of the test plan file.
pub const DEFAULT_PLAN_FILE: &str = "Suites.toml";

/// Represents the entire test plan, loaded from a TOML file.
/// 代表从 TOML 文件加载的整个测试计划。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestPlan {
    /// The language for the runner's output messages (e.g., "en", "zh-CN").
    /// Defaults to "en" if not specified.
    ///
    /// 运行器输出消息的语言（例如 "en", "zh-CN"）。如果未指定，则默认为 "en"。
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub settings: Settings,

    /// All test cases of the plan, in file order.
    /// 计划中的所有测试用例，按文件顺序排列。
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
}

fn default_language() -> String {
    "en".to_string()
}

/// Run-wide settings. Every field may be omitted.
/// 运行级设置。每个字段都可以省略。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of suites running at once. Defaults to the number of
    /// CPUs, or 1 in interactive mode.
    /// 同时运行的最大套件数。默认为 CPU 数量，交互模式下为 1。
    pub jobs: Option<usize>,
    /// Largest CPU requirement a suite may have and still run.
    /// 单个套件可运行的最大 CPU 需求。
    pub max_cpus: Option<usize>,
    /// Explicit pool of CPU ids. Defaults to `0..num_cpus`.
    /// 显式的 CPU id 池。默认为 `0..num_cpus`。
    pub cpus: Option<Vec<usize>>,
    pub timeout_secs: u64,
    pub core_timeout_secs: u64,
    pub retries: u32,
    pub failfast: bool,
    pub interactive: bool,
    pub work_dir: Option<PathBuf>,
    pub failed_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: None,
            max_cpus: None,
            cpus: None,
            timeout_secs: 600,
            core_timeout_secs: 3,
            retries: 0,
            failfast: false,
            interactive: false,
            work_dir: None,
            failed_dir: None,
        }
    }
}

/// Values given on the command line; `None`/`false` keep the file's value.
/// 命令行给出的值；`None`/`false` 表示保留文件中的值。
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub failfast: bool,
    pub interactive: bool,
}

impl Settings {
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(jobs) = overrides.jobs {
            self.jobs = Some(jobs);
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = timeout;
        }
        self.failfast |= overrides.failfast;
        self.interactive |= overrides.interactive;
    }

    /// Rejects combinations the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == Some(0) {
            bail!("`jobs` must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("`timeout_secs` must be at least 1");
        }
        if self.interactive && self.jobs.is_some_and(|jobs| jobs > 1) {
            bail!("Interactive mode runs one suite at a time; `jobs` must be 1");
        }
        if self.cpus.as_ref().is_some_and(Vec::is_empty) {
            bail!("`cpus` must list at least one CPU id");
        }
        Ok(())
    }

    pub fn cpu_pool(&self) -> Vec<usize> {
        match &self.cpus {
            Some(cpus) => cpus.clone(),
            None => (0..num_cpus::get()).collect(),
        }
    }

    pub fn jobs(&self) -> usize {
        match self.jobs {
            Some(jobs) => jobs,
            None if self.interactive => 1,
            None => num_cpus::get(),
        }
    }

    /// Per-suite CPU limit, never larger than the pool.
    pub fn max_cpus(&self) -> usize {
        let pool = self.cpu_pool().len();
        self.max_cpus.map_or(pool, |max| max.min(pool))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn core_timeout(&self) -> Duration {
        Duration::from_secs(self.core_timeout_secs)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("suite-runner"))
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.failed_dir
            .clone()
            .unwrap_or_else(|| self.work_dir().join("failed"))
    }
}

/// One `[[cases]]` entry.
/// 一个 `[[cases]]` 条目。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaseSpec {
    /// Identifier in `file.Class.method` form.
    pub id: String,
    pub command: String,
    #[serde(default = "default_cpus")]
    pub cpus: usize,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub expected_failure: bool,
    #[serde(default)]
    pub disabled: bool,
}

fn default_cpus() -> usize {
    1
}

impl From<CaseSpec> for TestCase {
    fn from(spec: CaseSpec) -> Self {
        TestCase {
            id: spec.id,
            command: spec.command,
            cpus: spec.cpus,
            solo: spec.solo,
            expected_failure: spec.expected_failure,
            state: if spec.disabled {
                TestState::Disabled
            } else {
                TestState::Runnable
            },
        }
    }
}

/// Reads and parses a test plan.
pub fn load_test_plan(path: &Path) -> Result<TestPlan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read test plan: {}", path.display()))?;
    let plan: TestPlan = toml::from_str(&content)
        .with_context(|| format!("Failed to parse test plan: {}", path.display()))?;
    for case in &plan.cases {
        if case.id.trim().is_empty() {
            bail!("Test plan {} contains a case without an id", path.display());
        }
    }
    Ok(plan)
}
