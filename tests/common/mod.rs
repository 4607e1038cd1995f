// Shared test helpers for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use suite_runner::core::handle::WorkerLaunch;
use suite_runner::core::scheduler::SchedulerSettings;
use suite_runner::suite::{Suite, TestCase};

/// Launches the real binary's hidden `worker` subcommand.
pub fn worker_launch() -> WorkerLaunch {
    WorkerLaunch {
        program: PathBuf::from(env!("CARGO_BIN_EXE_suite-runner")),
        args: vec!["worker".to_string()],
    }
}

/// Scheduler settings with a fast tick and everything kept under `root`.
pub fn scheduler_settings(root: &Path, pool: usize, jobs: usize) -> SchedulerSettings {
    let mut settings = SchedulerSettings::new((0..pool).collect(), root.join("work"), worker_launch());
    settings.max_concurrent_tests = jobs;
    settings.tick = Duration::from_millis(20);
    settings.join_timeout = Duration::from_secs(5);
    settings.timeout = Duration::from_secs(60);
    settings
}

pub fn suite(name: &str, cases: &[(&str, &str)]) -> Suite {
    Suite::with_cases(
        name,
        cases
            .iter()
            .map(|(method, command)| TestCase::new(format!("{name}.{method}"), *command)),
    )
}

pub fn wide_suite(name: &str, cpus: usize, command: &str) -> Suite {
    Suite::with_cases(
        name,
        [TestCase {
            cpus,
            ..TestCase::new(format!("{name}.test"), command)
        }],
    )
}

/// A command that fails the first time it runs and passes afterwards.
pub fn flaky_command(root: &Path, name: &str) -> String {
    let marker = root.join(format!("{name}.ran"));
    format!(
        "sh -c 'if [ -e {0} ]; then exit 0; else touch {0}; exit 1; fi'",
        marker.display()
    )
}

/// Writes a `Suites.toml` with the given settings body and cases.
pub fn write_plan(dir: &Path, settings: &str, cases: &[(&str, &str)]) -> PathBuf {
    let work_dir = dir.join("work");
    let mut content = format!(
        "language = \"en\"\n\n[settings]\nwork_dir = {:?}\n{}\n",
        work_dir.display().to_string(),
        settings
    );
    for (id, command) in cases {
        content.push_str(&format!(
            "\n[[cases]]\nid = {:?}\ncommand = {:?}\n",
            id, command
        ));
    }
    let path = dir.join("Suites.toml");
    fs::write(&path, content).unwrap();
    path
}
