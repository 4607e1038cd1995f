//! # Suite Planner Module / 套件计划模块
//!
//! This module turns the cases of a test plan into the ordered suites the
//! scheduler runs: it applies the run and skip filters, groups cases by their
//! `file.Class` prefix and marks suites that need more CPUs than allowed.
//!
//! 此模块将测试计划中的用例转换为调度器运行的有序套件：
//! 应用运行和跳过过滤器，按 `file.Class` 前缀分组用例，并标记 CPU 需求超限的套件。

use anyhow::{Context, Result, bail};
use globset::{Glob, GlobMatcher};
use std::collections::HashMap;

use crate::core::suite::{Suite, TestCase};

/// Prefix every test file name carries.
pub const FILE_PREFIX: &str = "test_";

/// Glob over the file component of a test id, e.g. `test_ip*`.
/// 针对测试 id 中文件部分的通配模式，例如 `test_ip*`。
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: Glob,
    matcher: GlobMatcher,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid file pattern '{pattern}'"))?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            glob,
        })
    }

    pub fn as_str(&self) -> &str {
        self.glob.glob()
    }

    pub fn is_match(&self, file: &str) -> bool {
        self.matcher.is_match(file)
    }
}

impl PartialEq for FilePattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

impl Eq for FilePattern {}

/// One `file[.Class[.method]]` pattern. `None` components match anything.
/// 一个 `file[.Class[.method]]` 模式。`None` 组件匹配任意值。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub file: Option<FilePattern>,
    pub class: Option<String>,
    pub method: Option<String>,
}

impl Filter {
    /// Parses one pattern. `*` and empty components are wildcards; a file
    /// name without the `test_` prefix gets it and may use glob syntax.
    /// More than three components is an error.
    pub fn parse(pattern: &str) -> Result<Self> {
        let parts: Vec<&str> = pattern.trim().split('.').map(str::trim).collect();
        if parts.len() > 3 {
            bail!("Invalid filter '{}': expected at most file.Class.method", pattern.trim());
        }
        let component = |index: usize| {
            parts
                .get(index)
                .filter(|p| !p.is_empty() && **p != "*")
                .map(|p| p.to_string())
        };
        let file = component(0)
            .map(|file| {
                if file.starts_with(FILE_PREFIX) {
                    FilePattern::new(&file)
                } else {
                    FilePattern::new(&format!("{FILE_PREFIX}{file}"))
                }
            })
            .transpose()?;
        Ok(Self {
            file,
            class: component(1),
            method: component(2),
        })
    }

    pub fn matches(&self, test_id: &str) -> bool {
        let mut parts = test_id.splitn(3, '.');
        let (file, class, method) = (parts.next(), parts.next(), parts.next());
        fn ok(want: &Option<String>, got: Option<&str>) -> bool {
            want.as_deref().is_none_or(|w| got == Some(w))
        }
        let file_ok = self
            .file
            .as_ref()
            .is_none_or(|pattern| file.is_some_and(|f| pattern.is_match(f)));
        file_ok && ok(&self.class, class) && ok(&self.method, method)
    }
}

/// Splits a comma-separated filter list. An empty string yields no filters.
pub fn parse_filters(spec: &str) -> Result<Vec<Filter>> {
    spec.split(',')
        .filter(|pattern| !pattern.trim().is_empty())
        .map(Filter::parse)
        .collect()
}

/// Represents the suites to run and how they were selected.
/// 表示要运行的套件及其选择情况。
#[derive(Debug)]
pub struct SuitePlan {
    pub suites: Vec<Suite>,
    /// Cases kept by the filters.
    pub matched: usize,
    /// Cases in the plan before filtering.
    pub total: usize,
    /// Suites whose CPU requirement exceeds the per-suite limit.
    pub cpu_shortage_suites: usize,
}

/// Creates the ordered suite list for a run.
///
/// A case is kept when it matches any of `filters` (or `filters` is empty)
/// and none of `skip_filters`. Suites appear in order of their first case.
///
/// 为一次运行创建有序的套件列表。
/// 当用例匹配任一 `filters`（或 `filters` 为空）且不匹配任何 `skip_filters` 时保留。
/// 套件按其第一个用例出现的顺序排列。
///
/// # Arguments
/// * `cases` - All cases of the plan, in file order
/// * `filters` - Patterns selecting cases to run
/// * `skip_filters` - Patterns excluding cases
/// * `max_cpus` - Largest CPU requirement a suite may have
pub fn plan_suites(
    cases: Vec<TestCase>,
    filters: &[Filter],
    skip_filters: &[Filter],
    max_cpus: usize,
) -> SuitePlan {
    let total = cases.len();
    let mut suites: Vec<Suite> = Vec::new();
    let mut by_class: HashMap<String, usize> = HashMap::new();
    let mut matched = 0;

    for case in cases {
        let selected = filters.is_empty() || filters.iter().any(|f| f.matches(&case.id));
        let skipped = skip_filters.iter().any(|f| f.matches(&case.id));
        if !selected || skipped {
            continue;
        }
        matched += 1;

        let class = case.class_name().to_string();
        let index = *by_class.entry(class.clone()).or_insert_with(|| {
            suites.push(Suite::new(class));
            suites.len() - 1
        });
        suites[index].add_case(case);
    }

    let mut cpu_shortage_suites = 0;
    for suite in &mut suites {
        if suite.cpus_used() > max_cpus {
            tracing::warn!(
                "Suite {} needs {} cpus but at most {} are allowed",
                suite.name(),
                suite.cpus_used(),
                max_cpus
            );
            suite.mark_cpu_shortage();
            cpu_shortage_suites += 1;
        }
    }

    SuitePlan {
        suites,
        matched,
        total,
        cpu_shortage_suites,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suite::TestState;

    fn case(id: &str, cpus: usize) -> TestCase {
        TestCase {
            cpus,
            ..TestCase::new(id, "true")
        }
    }

    #[test]
    fn filter_adds_the_file_prefix_and_treats_star_as_wildcard() {
        let f = Filter::parse("ip4.*.test_ping").unwrap();
        assert_eq!(f.file.as_ref().map(FilePattern::as_str), Some("test_ip4"));
        assert_eq!(f.class, None);
        assert_eq!(f.method.as_deref(), Some("test_ping"));
        assert!(f.matches("test_ip4.TestIPv4.test_ping"));
        assert!(f.matches("test_ip4.TestOther.test_ping"));
        assert!(!f.matches("test_ip4.TestIPv4.test_pong"));
        assert!(!f.matches("test_ip6.TestIPv6.test_ping"));
    }

    #[test]
    fn empty_filter_list_matches_everything() {
        assert!(parse_filters("").unwrap().is_empty());
        assert!(parse_filters(" , ").unwrap().is_empty());
        assert_eq!(parse_filters("a,b.C").unwrap().len(), 2);
    }

    #[test]
    fn more_than_three_components_are_rejected() {
        assert!(Filter::parse("a.B.c.d").is_err());
        assert!(parse_filters("a.B.c,x.Y.z.w").is_err());
        assert!(Filter::parse("a.B.c").is_ok());
    }

    #[test]
    fn file_component_accepts_globs() {
        let f = Filter::parse("ip*").unwrap();
        assert!(f.matches("test_ip4.TestIPv4.test_ping"));
        assert!(f.matches("test_ip6.TestIPv6.test_ping"));
        assert!(!f.matches("test_nat.TestNAT.test_ping"));

        let f = Filter::parse("test_ip[46].TestIPv4").unwrap();
        assert!(f.matches("test_ip4.TestIPv4.test_ping"));
        assert!(!f.matches("test_ip6.TestIPv6.test_ping"));
    }

    #[test]
    fn suites_follow_first_appearance_and_group_by_class() {
        let cases = vec![
            case("test_b.B.one", 1),
            case("test_a.A.one", 1),
            case("test_b.B.two", 2),
        ];
        let plan = plan_suites(cases, &[], &[], 4);
        let names: Vec<&str> = plan.suites.iter().map(Suite::name).collect();
        assert_eq!(names, vec!["test_b.B", "test_a.A"]);
        assert_eq!(plan.suites[0].len(), 2);
        assert_eq!(plan.suites[0].cpus_used(), 2);
        assert_eq!((plan.matched, plan.total), (3, 3));
    }

    #[test]
    fn skip_filters_override_run_filters() {
        let cases = vec![
            case("test_a.A.one", 1),
            case("test_a.A.two", 1),
            case("test_b.B.one", 1),
        ];
        let plan = plan_suites(
            cases,
            &parse_filters("a").unwrap(),
            &parse_filters("a.A.two").unwrap(),
            4,
        );
        assert_eq!(plan.suites.len(), 1);
        assert_eq!(plan.suites[0].test_ids().collect::<Vec<_>>(), vec!["test_a.A.one"]);
        assert_eq!((plan.matched, plan.total), (1, 3));
    }

    #[test]
    fn oversized_suites_are_marked_for_cpu_shortage() {
        let cases = vec![case("test_big.Big.one", 8), case("test_big.Big.two", 1)];
        let plan = plan_suites(cases, &[], &[], 4);
        assert_eq!(plan.cpu_shortage_suites, 1);
        assert!(
            plan.suites[0]
                .cases()
                .iter()
                .all(|c| c.state == TestState::SkippedForCpuShortage)
        );
    }
}
