//! # Console Reporting Module / 控制台报告模块
//!
//! This module prints the summary of one attempt: the per-code totals, every
//! failing test grouped under its suite, the suites in which nothing ran, and
//! a warning when tests were skipped for lack of CPUs.
//!
//! 此模块打印一次尝试的摘要：各结果代码的统计、按套件分组的所有失败测试、
//! 没有任何测试运行的套件，以及因 CPU 不足而跳过测试时的警告。

use colored::*;

use crate::core::result::{AggregateRun, ResultCode, RunStatus};
use crate::infra::t;

/// Prints a formatted summary of an attempt to the console.
///
/// 在控制台打印一次尝试的格式化摘要。
///
/// # Output Format / 输出格式
/// ```text
/// ==== TEST RESULTS ====
///   Scheduled tests:            12
///   Executed tests:             12
///   Passed tests:               10
///   ...
/// FAILURES AND ERRORS IN TESTS:
///   Testcase name: test_a.A
///     FAILURE: test_a.A.test_two
/// ```
pub fn print_results(run: &AggregateRun) {
    print!("{}", render_results(run));
}

/// Builds the text printed by [`print_results`].
pub fn render_results(run: &AggregateRun) -> String {
    let mut out = String::new();
    let banner = format!("==== {} ====", t!("summary.banner"));
    out.push_str(&format!("\n{}\n", banner.bold()));

    let rows = [
        (t!("summary.scheduled"), run.all_testcases(), Color::White),
        (t!("summary.executed"), run.count(ResultCode::TestRun), Color::White),
        (t!("summary.passed"), run.count(ResultCode::Pass), Color::Green),
        (t!("summary.expected_failures"), run.count(ResultCode::ExpectedFail), Color::Green),
        (t!("summary.skipped"), run.count(ResultCode::Skip), Color::Yellow),
        (t!("summary.not_executed"), run.not_executed(), Color::Yellow),
        (t!("summary.failures"), run.count(ResultCode::Fail), Color::Red),
        (t!("summary.unexpected_passes"), run.count(ResultCode::UnexpectedPass), Color::Red),
        (t!("summary.errors"), run.count(ResultCode::Error), Color::Red),
        (t!("summary.cpu_shortage"), run.count(ResultCode::SkipCpuShortage), Color::Yellow),
    ];
    for (label, count, color) in rows {
        // Zero counts stay uncolored.
        let count = if count > 0 {
            count.to_string().color(color).to_string()
        } else {
            count.to_string()
        };
        out.push_str(&format!("  {:<28} {:>6}\n", format!("{label}:"), count));
    }

    if run.all_failed() > 0 {
        out.push_str(&format!("{}\n", t!("summary.failures_banner").red().bold()));
        for result in run.results() {
            let failing: Vec<(ResultCode, &str)> = ResultCode::FAILING
                .iter()
                .flat_map(|code| result.ids_with(*code).into_iter().map(move |id| (*code, id)))
                .collect();
            if failing.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "  {} {}\n",
                t!("summary.testcase_name"),
                result.suite().name().cyan()
            ));
            for (code, id) in failing {
                out.push_str(&format!("    {}: {}\n", code.as_str().red(), id));
            }
        }
    }

    let idle: Vec<_> = run.suites_without_tests_run().collect();
    if !idle.is_empty() {
        out.push_str(&format!("{}\n", t!("summary.no_tests_run_banner").red().bold()));
        for suite in idle {
            out.push_str(&format!("  {}\n", suite.name()));
        }
    }

    let shortage = run.count(ResultCode::SkipCpuShortage);
    if shortage > 0 {
        out.push_str(&format!(
            "{}\n",
            t!("summary.cpu_shortage_warning", count = shortage).yellow()
        ));
    }

    let status = match run.status() {
        RunStatus::Success => t!("summary.status_success").green().bold(),
        RunStatus::Failed => t!("summary.status_failed").red().bold(),
        RunStatus::Crashed => t!("summary.status_crashed").red().bold(),
    };
    out.push_str(&format!("{status}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::SuiteResult;
    use crate::core::suite::{Suite, TestCase};
    use std::sync::Arc;

    #[test]
    fn summary_lists_failing_tests_and_idle_suites() {
        rust_i18n::set_locale("en");
        let a = Arc::new(Suite::with_cases(
            "test_a.A",
            [
                TestCase::new("test_a.A.ok", "true"),
                TestCase::new("test_a.A.bad", "false"),
            ],
        ));
        let mut ra = SuiteResult::new(a);
        ra.record("test_a.A.ok", ResultCode::TestRun);
        ra.record("test_a.A.ok", ResultCode::Pass);
        ra.record("test_a.A.bad", ResultCode::TestRun);
        ra.record("test_a.A.bad", ResultCode::Fail);

        let b = Arc::new(Suite::with_cases("test_b.B", [TestCase::new("test_b.B.x", "true")]));
        let rb = SuiteResult::new(b);

        let text = render_results(&AggregateRun::from_results([ra, rb]));
        assert!(text.contains("test_a.A.bad"));
        assert!(!text.contains("test_a.A.ok"));
        assert!(text.contains("FAIL"));
        assert!(text.contains("test_b.B"));
        assert!(text.contains("Scheduled tests"));
    }

    #[test]
    fn cpu_shortage_produces_a_warning() {
        rust_i18n::set_locale("en");
        let s = Arc::new(Suite::with_cases("test_a.A", [TestCase::new("test_a.A.big", "true")]));
        let mut r = SuiteResult::new(s);
        r.record("test_a.A.big", ResultCode::TestRun);
        r.record("test_a.A.big", ResultCode::SkipCpuShortage);
        let text = render_results(&AggregateRun::from_results([r]));
        assert!(text.contains("lack of CPUs"));
    }
}
