//! # Result Ledger Module / 结果账本模块
//!
//! This module records the outcome of every test of a suite as messages arrive
//! from its worker, and aggregates per-suite results into run-level totals,
//! the set of suites to rerun, and the final run classification.
//!
//! 此模块在工作进程消息到达时记录套件中每个测试的结果，
//! 并将各套件结果汇总为运行级统计、需要重跑的套件集合以及最终的运行分类。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::core::suite::Suite;

/// Closed classification of a single test's outcome.
/// 单个测试结果的封闭分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    /// The test was started. Reported before any terminal code.
    /// 测试已开始。在任何终止结果之前报告。
    TestRun,
    Pass,
    Fail,
    Error,
    Skip,
    SkipCpuShortage,
    ExpectedFail,
    UnexpectedPass,
}

impl ResultCode {
    pub const ALL: [ResultCode; 8] = [
        ResultCode::TestRun,
        ResultCode::Pass,
        ResultCode::Fail,
        ResultCode::Error,
        ResultCode::Skip,
        ResultCode::SkipCpuShortage,
        ResultCode::ExpectedFail,
        ResultCode::UnexpectedPass,
    ];

    /// Codes that make a suite unsuccessful.
    pub const FAILING: [ResultCode; 3] =
        [ResultCode::Fail, ResultCode::Error, ResultCode::UnexpectedPass];

    /// Codes under which a test needs no rerun.
    pub const CLEAN: [ResultCode; 4] = [
        ResultCode::Pass,
        ResultCode::Skip,
        ResultCode::SkipCpuShortage,
        ResultCode::ExpectedFail,
    ];

    pub fn is_failing(self) -> bool {
        Self::FAILING.contains(&self)
    }

    pub fn is_clean(self) -> bool {
        Self::CLEAN.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::TestRun => "TEST_RUN",
            ResultCode::Pass => "PASS",
            ResultCode::Fail => "FAIL",
            ResultCode::Error => "ERROR",
            ResultCode::Skip => "SKIP",
            ResultCode::SkipCpuShortage => "SKIP_CPU_SHORTAGE",
            ResultCode::ExpectedFail => "EXPECTED_FAIL",
            ResultCode::UnexpectedPass => "UNEXPECTED_PASS",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome ledger of one suite.
///
/// `TEST_RUN` is tracked as the set of executed tests; every other code is a
/// terminal outcome and each test id holds at most one of them. A later
/// terminal code replaces an earlier one, so the `ERROR` injected after a
/// forced kill wins over whatever the test reported before.
///
/// 单个套件的结果账本。
/// `TEST_RUN` 作为已执行测试集合单独记录；其他结果都是终止结果，
/// 每个测试 id 最多只有一个。后到的终止结果会替换先前的结果。
#[derive(Debug, Clone)]
pub struct SuiteResult {
    suite: Arc<Suite>,
    executed: BTreeSet<String>,
    outcomes: BTreeMap<String, ResultCode>,
    crashed: bool,
}

impl SuiteResult {
    pub fn new(suite: Arc<Suite>) -> Self {
        Self {
            suite,
            executed: BTreeSet::new(),
            outcomes: BTreeMap::new(),
            crashed: false,
        }
    }

    pub fn suite(&self) -> &Arc<Suite> {
        &self.suite
    }

    pub fn record(&mut self, test_id: impl Into<String>, code: ResultCode) {
        let test_id = test_id.into();
        if code == ResultCode::TestRun {
            self.executed.insert(test_id);
        } else {
            self.outcomes.insert(test_id, code);
        }
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    pub fn mark_crashed(&mut self) {
        self.crashed = true;
    }

    pub fn count(&self, code: ResultCode) -> usize {
        if code == ResultCode::TestRun {
            self.executed.len()
        } else {
            self.outcomes.values().filter(|c| **c == code).count()
        }
    }

    /// Test ids recorded under `code`, in id order.
    pub fn ids_with(&self, code: ResultCode) -> Vec<&str> {
        if code == ResultCode::TestRun {
            self.executed.iter().map(String::as_str).collect()
        } else {
            self.outcomes
                .iter()
                .filter(|(_, c)| **c == code)
                .map(|(id, _)| id.as_str())
                .collect()
        }
    }

    pub fn outcome_of(&self, test_id: &str) -> Option<ResultCode> {
        self.outcomes.get(test_id).copied()
    }

    /// No failing outcome, and every test of the suite ended cleanly.
    /// 没有失败结果，且套件中的每个测试都干净地结束。
    pub fn is_successful(&self) -> bool {
        let failing: usize = ResultCode::FAILING.iter().map(|c| self.count(*c)).sum();
        let clean: usize = ResultCode::CLEAN.iter().map(|c| self.count(*c)).sum();
        failing == 0 && clean == self.suite.len()
    }

    pub fn no_tests_run(&self) -> bool {
        self.executed.is_empty()
    }

    /// Ids of the suite's tests that did not end cleanly and must run again.
    /// 套件中未干净结束、必须重新运行的测试 id。
    pub fn rerun_subset(&self) -> BTreeSet<String> {
        self.suite
            .test_ids()
            .filter(|id| !self.outcome_of(id).is_some_and(ResultCode::is_clean))
            .map(str::to_string)
            .collect()
    }
}

/// How one suite contributed to the run classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteVerdict {
    Passed,
    Failed,
    Crashed,
}

/// Final classification of an attempt, and the process exit contract.
/// 一次尝试的最终分类，以及进程退出约定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Crashed,
}

impl RunStatus {
    /// 0 on success, 1 on test failures, 255 (-1 as an 8-bit status) when the
    /// run infrastructure crashed.
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Crashed => 255,
        }
    }
}

/// All suite results of one attempt with run-level totals.
///
/// 一次尝试中所有套件的结果及运行级统计。
#[derive(Debug, Clone)]
pub struct AggregateRun {
    started_at: DateTime<Local>,
    all_testcases: usize,
    counts: BTreeMap<ResultCode, usize>,
    results: Vec<SuiteResult>,
    rerun: Vec<usize>,
    no_tests_run: Vec<usize>,
    crashed: bool,
    failed: bool,
}

impl Default for AggregateRun {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateRun {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            all_testcases: 0,
            counts: ResultCode::ALL.iter().map(|c| (*c, 0)).collect(),
            results: Vec::new(),
            rerun: Vec::new(),
            no_tests_run: Vec::new(),
            crashed: false,
            failed: false,
        }
    }

    pub fn from_results(results: impl IntoIterator<Item = SuiteResult>) -> Self {
        let mut aggregate = Self::new();
        for result in results {
            aggregate.add_result(result);
        }
        aggregate
    }

    /// Adds one suite's result and returns its verdict.
    pub fn add_result(&mut self, result: SuiteResult) -> SuiteVerdict {
        self.all_testcases += result.suite().len();
        for code in ResultCode::ALL {
            *self.counts.entry(code).or_default() += result.count(code);
        }

        let index = self.results.len();
        let verdict = if result.no_tests_run() {
            self.no_tests_run.push(index);
            if result.crashed() {
                SuiteVerdict::Crashed
            } else {
                SuiteVerdict::Failed
            }
        } else if !result.is_successful() {
            SuiteVerdict::Failed
        } else {
            SuiteVerdict::Passed
        };

        match verdict {
            SuiteVerdict::Crashed => self.crashed = true,
            SuiteVerdict::Failed => self.failed = true,
            SuiteVerdict::Passed => {}
        }
        if verdict != SuiteVerdict::Passed {
            self.rerun.push(index);
        }
        self.results.push(result);
        verdict
    }

    pub fn status(&self) -> RunStatus {
        if self.crashed {
            RunStatus::Crashed
        } else if self.failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn all_testcases(&self) -> usize {
        self.all_testcases
    }

    pub fn count(&self, code: ResultCode) -> usize {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    pub fn not_executed(&self) -> usize {
        self.all_testcases.saturating_sub(self.count(ResultCode::TestRun))
    }

    pub fn all_failed(&self) -> usize {
        ResultCode::FAILING.iter().map(|c| self.count(*c)).sum()
    }

    pub fn results(&self) -> &[SuiteResult] {
        &self.results
    }

    /// Suites in which not a single test was started.
    pub fn suites_without_tests_run(&self) -> impl Iterator<Item = &Arc<Suite>> {
        self.no_tests_run.iter().map(|i| self.results[*i].suite())
    }

    /// Results of the suites that need another attempt.
    pub fn rerun_results(&self) -> impl Iterator<Item = &SuiteResult> {
        self.rerun.iter().map(|i| &self.results[*i])
    }

    /// New suites restricted to the tests that must run again.
    /// 仅包含需要重新运行的测试的新套件。
    pub fn rerun_suites(&self) -> Vec<Suite> {
        self.rerun_results()
            .filter_map(|result| result.suite().narrowed(&result.rerun_subset()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suite::TestCase;

    fn suite(name: &str, tests: &[&str]) -> Arc<Suite> {
        Arc::new(Suite::with_cases(
            name,
            tests.iter().map(|t| TestCase::new(format!("{name}.{t}"), "true")),
        ))
    }

    #[test]
    fn successful_suite_needs_every_test_clean() {
        let s = suite("test_a.A", &["one", "two"]);
        let mut result = SuiteResult::new(s);
        result.record("test_a.A.one", ResultCode::TestRun);
        result.record("test_a.A.one", ResultCode::Pass);
        assert!(!result.is_successful(), "one test never reported");
        result.record("test_a.A.two", ResultCode::TestRun);
        result.record("test_a.A.two", ResultCode::ExpectedFail);
        assert!(result.is_successful());
        assert!(result.rerun_subset().is_empty());
    }

    #[test]
    fn later_terminal_code_replaces_earlier_one() {
        let s = suite("test_a.A", &["one"]);
        let mut result = SuiteResult::new(s);
        result.record("test_a.A.one", ResultCode::TestRun);
        result.record("test_a.A.one", ResultCode::Pass);
        result.record("test_a.A.one", ResultCode::Error);
        assert_eq!(result.count(ResultCode::Pass), 0);
        assert_eq!(result.count(ResultCode::Error), 1);
        assert_eq!(result.count(ResultCode::TestRun), 1);
        assert_eq!(result.outcome_of("test_a.A.one"), Some(ResultCode::Error));
    }

    #[test]
    fn terminal_code_sets_partition_test_ids() {
        let s = suite("test_a.A", &["a", "b", "c", "d"]);
        let mut result = SuiteResult::new(s);
        let codes = [
            ResultCode::Pass,
            ResultCode::Fail,
            ResultCode::Skip,
            ResultCode::Fail,
            ResultCode::UnexpectedPass,
        ];
        for (i, code) in codes.iter().enumerate() {
            let id = format!("test_a.A.{}", ["a", "b", "c", "d"][i % 4]);
            result.record(id, *code);
        }
        let mut seen = BTreeSet::new();
        for code in ResultCode::ALL.iter().filter(|c| **c != ResultCode::TestRun) {
            for id in result.ids_with(*code) {
                assert!(seen.insert(id.to_string()), "{id} appears in two code sets");
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn rerun_subset_contains_unfinished_and_failing_tests() {
        let s = suite("test_a.A", &["pass", "fail", "missing", "cpu"]);
        let mut result = SuiteResult::new(s);
        result.record("test_a.A.pass", ResultCode::Pass);
        result.record("test_a.A.fail", ResultCode::Fail);
        result.record("test_a.A.cpu", ResultCode::SkipCpuShortage);
        let rerun: Vec<String> = result.rerun_subset().into_iter().collect();
        assert_eq!(rerun, vec!["test_a.A.fail", "test_a.A.missing"]);
    }

    #[test]
    fn crashed_suite_with_no_tests_classifies_run_as_crashed() {
        let mut crashed = SuiteResult::new(suite("test_a.A", &["one"]));
        crashed.mark_crashed();
        crashed.record("test_a.A", ResultCode::Error);

        let mut passed = SuiteResult::new(suite("test_b.B", &["one"]));
        passed.record("test_b.B.one", ResultCode::TestRun);
        passed.record("test_b.B.one", ResultCode::Pass);

        let mut run = AggregateRun::new();
        assert_eq!(run.add_result(passed), SuiteVerdict::Passed);
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(run.add_result(crashed), SuiteVerdict::Crashed);
        assert_eq!(run.status(), RunStatus::Crashed);
        assert_eq!(run.suites_without_tests_run().count(), 1);
        assert_eq!(run.rerun_suites().len(), 1);
    }

    #[test]
    fn crash_after_some_tests_ran_is_a_failure() {
        let mut result = SuiteResult::new(suite("test_a.A", &["one", "two"]));
        result.record("test_a.A.one", ResultCode::TestRun);
        result.record("test_a.A.one", ResultCode::Pass);
        result.record("test_a.A.two", ResultCode::TestRun);
        result.mark_crashed();
        result.record("test_a.A.two", ResultCode::Error);

        let run = AggregateRun::from_results([result]);
        assert_eq!(run.status(), RunStatus::Failed);
        let rerun = run.rerun_suites();
        assert_eq!(rerun.len(), 1);
        assert_eq!(rerun[0].test_ids().collect::<Vec<_>>(), vec!["test_a.A.two"]);
    }

    #[test]
    fn empty_result_counts_as_failed_and_reruns_whole_suite() {
        let run = AggregateRun::from_results([SuiteResult::new(suite("test_a.A", &["x", "y"]))]);
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.not_executed(), 2);
        assert_eq!(run.rerun_suites()[0].len(), 2);
    }

    #[test]
    fn totals_sum_over_suites() {
        let mut a = SuiteResult::new(suite("test_a.A", &["one", "two"]));
        a.record("test_a.A.one", ResultCode::TestRun);
        a.record("test_a.A.one", ResultCode::Pass);
        a.record("test_a.A.two", ResultCode::TestRun);
        a.record("test_a.A.two", ResultCode::Fail);
        let mut b = SuiteResult::new(suite("test_b.B", &["one"]));
        b.record("test_b.B.one", ResultCode::TestRun);
        b.record("test_b.B.one", ResultCode::Pass);

        let run = AggregateRun::from_results([a, b]);
        assert_eq!(run.all_testcases(), 3);
        assert_eq!(run.count(ResultCode::TestRun), 3);
        assert_eq!(run.count(ResultCode::Pass), 2);
        assert_eq!(run.all_failed(), 1);
        assert_eq!(run.not_executed(), 0);
    }

    #[test]
    fn exit_codes_follow_the_process_contract() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Crashed.exit_code(), 255);
    }
}
