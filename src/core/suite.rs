//! # Suite Model Module / 套件模型模块
//!
//! A suite is a group of test cases that runs together in one worker process.
//! It carries the CPU requirement of its most demanding test and whether it
//! must run with no other suite active.
//!
//! 套件是在一个工作进程中一起运行的一组测试用例。
//! 它记录其最高 CPU 需求，以及是否必须在没有其他套件运行时单独运行。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a test body may be executed by the worker.
/// 测试主体是否可以由工作进程执行。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    /// The test runs normally. / 测试正常运行。
    #[default]
    Runnable,
    /// The owning suite needs more CPUs than a suite may use; the test is
    /// reported as `SKIP_CPU_SHORTAGE` without running.
    /// 所属套件需要的 CPU 超过单个套件的上限；测试不运行，报告为 `SKIP_CPU_SHORTAGE`。
    SkippedForCpuShortage,
    /// The test is disabled in the plan and reported as `SKIP`.
    /// 测试在计划中被禁用，报告为 `SKIP`。
    Disabled,
}

/// A single test case: an identifier and the native command that runs it.
/// 单个测试用例：一个标识符和运行它的原生命令。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Identifier in `file.Class.method` form. / `file.Class.method` 形式的标识符。
    pub id: String,
    /// Shell-like command line executed for this test. / 为此测试执行的类 shell 命令行。
    pub command: String,
    /// CPUs the native process under test needs. / 被测原生进程需要的 CPU 数。
    pub cpus: usize,
    /// The test must run with no other suite active. / 测试必须在没有其他套件运行时执行。
    pub solo: bool,
    /// A failing exit status is the expected outcome. / 失败的退出状态是预期结果。
    pub expected_failure: bool,
    pub state: TestState,
}

impl TestCase {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            cpus: 1,
            solo: false,
            expected_failure: false,
            state: TestState::Runnable,
        }
    }

    /// The `file.Class` part of the identifier, used to group tests into suites.
    /// Identifiers without a `.` form their own class.
    pub fn class_name(&self) -> &str {
        self.id.rsplit_once('.').map_or(self.id.as_str(), |(class, _)| class)
    }
}

/// A group of test cases executed together by one worker.
///
/// `cpus_used` and `is_solo` are derived from the members as they are added:
/// `cpus_used` only ever grows, and a single solo member makes the whole suite solo.
///
/// 由一个工作进程一起执行的一组测试用例。
/// `cpus_used` 和 `is_solo` 在添加成员时推导：`cpus_used` 只增不减，
/// 只要有一个独占成员，整个套件即为独占。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    name: String,
    cases: Vec<TestCase>,
    cpus_used: usize,
    is_solo: bool,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
            cpus_used: 0,
            is_solo: false,
        }
    }

    /// Builds a suite from a list of cases.
    pub fn with_cases(name: impl Into<String>, cases: impl IntoIterator<Item = TestCase>) -> Self {
        let mut suite = Self::new(name);
        for case in cases {
            suite.add_case(case);
        }
        suite
    }

    pub fn add_case(&mut self, case: TestCase) {
        self.cpus_used = self.cpus_used.max(case.cpus);
        self.is_solo |= case.solo;
        self.cases.push(case);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn cpus_used(&self) -> usize {
        self.cpus_used
    }

    pub fn is_solo(&self) -> bool {
        self.is_solo
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn contains(&self, test_id: &str) -> bool {
        self.cases.iter().any(|case| case.id == test_id)
    }

    pub fn test_ids(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|case| case.id.as_str())
    }

    /// File-system friendly form of the suite name, used for working
    /// directories and failed-suite markers.
    ///
    /// 套件名称的文件系统友好形式，用于工作目录和失败套件标记。
    pub fn dir_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }

    /// Marks every member as skipped for lack of CPUs. The CPU requirement is
    /// kept so reports still show what the suite would have needed.
    pub fn mark_cpu_shortage(&mut self) {
        for case in &mut self.cases {
            if case.state == TestState::Runnable {
                case.state = TestState::SkippedForCpuShortage;
            }
        }
    }

    /// Returns a new suite with only the given tests, or `None` when no member matches.
    /// 返回只包含给定测试的新套件；如果没有匹配的成员，则返回 `None`。
    pub fn narrowed(&self, test_ids: &BTreeSet<String>) -> Option<Suite> {
        let cases: Vec<TestCase> = self
            .cases
            .iter()
            .filter(|case| test_ids.contains(&case.id))
            .cloned()
            .collect();
        if cases.is_empty() {
            None
        } else {
            Some(Suite::with_cases(self.name.clone(), cases))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, cpus: usize) -> TestCase {
        TestCase {
            cpus,
            ..TestCase::new(id, "true")
        }
    }

    #[test]
    fn cpus_used_is_the_running_maximum() {
        let mut suite = Suite::new("test_a.A");
        assert_eq!(suite.cpus_used(), 0);
        let mut seen = Vec::new();
        for cpus in [2, 1, 4, 3, 0] {
            suite.add_case(case(&format!("test_a.A.t{cpus}"), cpus));
            seen.push(suite.cpus_used());
        }
        assert_eq!(seen, vec![2, 2, 4, 4, 4]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn one_solo_member_makes_the_suite_solo() {
        let mut suite = Suite::new("test_a.A");
        suite.add_case(case("test_a.A.one", 1));
        assert!(!suite.is_solo());
        suite.add_case(TestCase {
            solo: true,
            ..case("test_a.A.two", 1)
        });
        assert!(suite.is_solo());
    }

    #[test]
    fn class_name_strips_the_method() {
        assert_eq!(case("test_ip4.TestIPv4.test_ping", 1).class_name(), "test_ip4.TestIPv4");
        assert_eq!(case("standalone", 1).class_name(), "standalone");
    }

    #[test]
    fn narrowed_keeps_only_requested_ids_and_recomputes_cpus() {
        let suite = Suite::with_cases(
            "test_a.A",
            vec![case("test_a.A.big", 4), case("test_a.A.small", 1)],
        );
        let ids: BTreeSet<String> = ["test_a.A.small".to_string()].into();
        let narrowed = suite.narrowed(&ids).unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed.cpus_used(), 1);
        assert_eq!(narrowed.name(), "test_a.A");

        let none: BTreeSet<String> = ["test_b.B.x".to_string()].into();
        assert!(suite.narrowed(&none).is_none());
    }

    #[test]
    fn mark_cpu_shortage_leaves_disabled_tests_alone() {
        let mut suite = Suite::with_cases(
            "test_a.A",
            vec![
                case("test_a.A.one", 8),
                TestCase {
                    state: TestState::Disabled,
                    ..case("test_a.A.two", 1)
                },
            ],
        );
        suite.mark_cpu_shortage();
        assert_eq!(suite.cases()[0].state, TestState::SkippedForCpuShortage);
        assert_eq!(suite.cases()[1].state, TestState::Disabled);
        assert_eq!(suite.cpus_used(), 8);
    }

    #[test]
    fn dir_name_is_filesystem_friendly() {
        let suite = Suite::new("test_ip4.TestIPv4 extra/part");
        assert_eq!(suite.dir_name(), "test_ip4_TestIPv4_extra_part");
    }
}
