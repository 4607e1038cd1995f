//! # Scheduler Module / 调度器模块
//!
//! The scheduler admits queued suites as worker processes under a CPU budget
//! and a concurrency limit, polls every live worker on a fixed tick, and
//! finalizes workers that completed or had to be killed. Solo suites run only
//! when no other suite is active.
//!
//! All scheduling state lives in [`Scheduler`] and is touched by one task only;
//! workers and the output drain are reached through channels.
//!
//! 调度器在 CPU 预算和并发上限内将排队的套件作为工作进程启动，按固定周期轮询
//! 每个存活的工作进程，并收尾已完成或被强制终止的工作进程。独占套件只在没有其他
//! 套件运行时执行。所有调度状态都保存在 [`Scheduler`] 中，且仅由一个任务访问。

use anyhow::{Result, bail};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::core::drain::StreamDrain;
use crate::core::handle::{WorkerHandle, WorkerId, WorkerLaunch, WorkerPoll};
use crate::core::result::SuiteResult;
use crate::core::suite::Suite;
use crate::infra::fs::{self, FailedSuite};

/// Default pause between two monitor ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
/// How long a finished worker may take to exit before it is left behind.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything the scheduler needs to know about one run.
/// 调度器运行一次所需的全部设置。
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Maximum number of live workers.
    pub max_concurrent_tests: usize,
    /// Suites needing more CPUs than this run without any CPUs assigned.
    pub max_vpp_cpus: usize,
    /// Ordered pool of CPU ids handed out to suites.
    pub cpus: Vec<usize>,
    /// Maximum silence between two worker messages.
    pub timeout: Duration,
    /// Grace period after a core file shows up.
    pub core_timeout: Duration,
    pub failfast: bool,
    pub work_root: PathBuf,
    pub failed_dir: PathBuf,
    pub tick: Duration,
    pub join_timeout: Duration,
    pub launch: WorkerLaunch,
}

impl SchedulerSettings {
    pub fn new(cpus: Vec<usize>, work_root: PathBuf, launch: WorkerLaunch) -> Self {
        let pool = cpus.len();
        Self {
            max_concurrent_tests: pool.max(1),
            max_vpp_cpus: pool,
            cpus,
            timeout: Duration::from_secs(600),
            core_timeout: Duration::from_secs(3),
            failfast: false,
            failed_dir: work_root.join("failed"),
            work_root,
            tick: DEFAULT_TICK,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            launch,
        }
    }
}

/// Admission and completion events in the order the scheduler saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    Admitted {
        suite: String,
        cpus: Vec<usize>,
        solo: bool,
        /// Live workers right after this admission.
        running: usize,
    },
    Finished {
        suite: String,
        crashed: bool,
    },
    /// Queued suite dropped because a failfast stop was requested.
    Abandoned {
        suite: String,
    },
}

/// Results of one scheduling pass.
#[derive(Debug)]
pub struct ScheduleReport {
    pub results: Vec<SuiteResult>,
    pub timeline: Vec<ScheduleEvent>,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    free_cpus: Vec<usize>,
    tests_running: usize,
    workers: Vec<WorkerHandle>,
    ready: VecDeque<Suite>,
    solo: VecDeque<Suite>,
    results: Vec<SuiteResult>,
    timeline: Vec<ScheduleEvent>,
    stopping: bool,
    next_id: WorkerId,
}

impl Scheduler {
    pub fn new(mut settings: SchedulerSettings) -> Self {
        settings.max_concurrent_tests = settings.max_concurrent_tests.max(1);
        if settings.max_vpp_cpus > settings.cpus.len() {
            tracing::debug!(
                "Clamping max cpus per suite from {} to the pool size {}",
                settings.max_vpp_cpus,
                settings.cpus.len()
            );
            settings.max_vpp_cpus = settings.cpus.len();
        }
        Self {
            free_cpus: settings.cpus.clone(),
            settings,
            tests_running: 0,
            workers: Vec::new(),
            ready: VecDeque::new(),
            solo: VecDeque::new(),
            results: Vec::new(),
            timeline: Vec::new(),
            stopping: false,
            next_id: 0,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Runs `suites` to completion, copying worker output to stdout.
    pub async fn run(self, suites: Vec<Suite>, cancel: &CancellationToken) -> Result<ScheduleReport> {
        self.run_with_output(suites, cancel, tokio::io::stdout()).await
    }

    /// Runs `suites` to completion, copying worker output to `output`.
    ///
    /// On a coordinator error, including cancellation, every live worker is
    /// terminated before the error is returned.
    ///
    /// 运行所有套件直至结束，并将工作进程输出复制到 `output`。
    /// 协调器出错（包括取消）时，先终止所有存活的工作进程，再返回错误。
    pub async fn run_with_output<W>(
        mut self,
        suites: Vec<Suite>,
        cancel: &CancellationToken,
        output: W,
    ) -> Result<ScheduleReport>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let drain = StreamDrain::spawn(output);
        self.ready.extend(suites);

        let outcome = self.monitor(&drain, cancel).await;
        if outcome.is_err() {
            self.terminate_all();
        }
        drain.shutdown(self.settings.timeout).await;
        outcome?;

        Ok(ScheduleReport {
            results: self.results,
            timeline: self.timeline,
        })
    }

    async fn monitor<W>(&mut self, drain: &StreamDrain<W>, cancel: &CancellationToken) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.admit_eligible(drain)?;

        while !self.workers.is_empty() || !self.ready.is_empty() || !self.solo.is_empty() {
            if cancel.is_cancelled() {
                bail!("Run interrupted with {} worker(s) still running", self.workers.len());
            }
            if self.workers.is_empty() {
                bail!(
                    "{} queued suite(s) can never be admitted with {} cpu(s)",
                    self.ready.len() + self.solo.len(),
                    self.free_cpus.len()
                );
            }

            let now = Instant::now();
            let mut finished = Vec::new();
            let mut index = 0;
            while index < self.workers.len() {
                let worker = &mut self.workers[index];
                match worker.poll(now, self.settings.timeout, self.settings.core_timeout) {
                    WorkerPoll::Pending => {
                        index += 1;
                        continue;
                    }
                    WorkerPoll::Completed => {}
                    WorkerPoll::Failed(failure) => worker.fail(&failure),
                }
                finished.push(self.workers.remove(index));
            }

            for worker in finished {
                self.finalize(worker, drain).await?;
            }

            if self.workers.is_empty() && self.ready.is_empty() && self.solo.is_empty() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick) => {}
                _ = cancel.cancelled() => {}
            }
        }
        Ok(())
    }

    /// Whether `suite` fits the concurrency limit and the CPU budget right now.
    /// Solo exclusivity is enforced separately by the queues.
    ///
    /// 判断 `suite` 当前是否满足并发上限和 CPU 预算。独占性由队列单独保证。
    pub fn can_admit(&self, suite: &Suite) -> bool {
        self.tests_running < self.settings.max_concurrent_tests
            && (suite.cpus_used() <= self.free_cpus.len()
                || suite.cpus_used() > self.settings.max_vpp_cpus)
    }

    fn solo_running(&self) -> bool {
        self.workers.iter().any(|worker| worker.suite().is_solo())
    }

    /// Admits suites from the head of the ready queue until the head does not
    /// fit. Solo suites met at the head are set aside and started once nothing
    /// else runs.
    fn admit_eligible<W>(&mut self, drain: &StreamDrain<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.stopping || self.solo_running() {
            return Ok(());
        }

        loop {
            while self.ready.front().is_some_and(Suite::is_solo) {
                if let Some(suite) = self.ready.pop_front() {
                    tracing::debug!("Deferring solo suite {}", suite.name());
                    self.solo.push_back(suite);
                }
            }
            match self.ready.front() {
                Some(head) if self.can_admit(head) => {
                    if let Some(suite) = self.ready.pop_front() {
                        self.admit(suite, drain)?;
                    }
                }
                _ => break,
            }
        }

        if self.tests_running == 0 {
            if let Some(suite) = self.solo.pop_front() {
                self.admit(suite, drain)?;
            }
        }
        Ok(())
    }

    fn admit<W>(&mut self, mut suite: Suite, drain: &StreamDrain<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cpus = if suite.cpus_used() > self.settings.max_vpp_cpus {
            tracing::warn!(
                "Suite {} needs {} cpus, more than the {} allowed; its tests will be skipped",
                suite.name(),
                suite.cpus_used(),
                self.settings.max_vpp_cpus
            );
            // The worker skips these cases without running their bodies.
            suite.mark_cpu_shortage();
            Vec::new()
        } else {
            self.free_cpus.drain(..suite.cpus_used()).collect()
        };

        let id = self.next_id;
        self.next_id += 1;
        let suite = Arc::new(suite);
        let (worker, output) = WorkerHandle::spawn(
            id,
            Arc::clone(&suite),
            cpus.clone(),
            &self.settings.launch,
            self.settings.work_root.clone(),
            self.settings.failfast,
        )?;
        drain.track(id, output);
        self.workers.push(worker);
        self.tests_running += 1;

        tracing::info!(
            "Started suite {} ({} tests) on cpus {:?}",
            suite.name(),
            suite.len(),
            cpus
        );
        self.timeline.push(ScheduleEvent::Admitted {
            suite: suite.name().to_string(),
            cpus,
            solo: suite.is_solo(),
            running: self.tests_running,
        });
        Ok(())
    }

    async fn finalize<W>(&mut self, mut worker: WorkerHandle, drain: &StreamDrain<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let heartbeat = worker.last_heartbeat().clone();
        let suite = Arc::clone(worker.suite());
        let successful = worker.result().is_successful();
        let crashed = worker.result().crashed();

        if !successful {
            if self.settings.failfast {
                self.stopping = true;
            }
            fs::handle_failed_suite(
                &self.settings.failed_dir,
                &FailedSuite {
                    suite_dir_name: &suite.dir_name(),
                    working_dir: heartbeat.working_dir.as_deref(),
                    native_pid: heartbeat.native_pid,
                    native_binary: heartbeat.native_binary.as_deref(),
                },
            );
            for (class, sighting) in worker.classes_with_core() {
                tracing::error!(
                    "Test class {} left a core file: gdb {} {}",
                    class,
                    sighting.native_binary.display(),
                    fs::core_path(&sighting.working_dir).display()
                );
            }
        }

        if let Some(failure) = worker.join(self.settings.join_timeout).await {
            tracing::error!("{}", failure);
        }

        self.free_cpus.extend(worker.take_assigned_cpus());
        self.tests_running = self.tests_running.saturating_sub(1);
        drain.finished(worker.id());

        tracing::info!(
            "Finished suite {}{}",
            suite.name(),
            if successful { "" } else { " (unsuccessful)" }
        );
        self.timeline.push(ScheduleEvent::Finished {
            suite: suite.name().to_string(),
            crashed,
        });
        self.results.push(worker.into_result());

        if self.stopping {
            self.abandon_queued();
            Ok(())
        } else {
            self.admit_eligible(drain)
        }
    }

    /// Turns every queued suite into an empty result.
    fn abandon_queued(&mut self) {
        let queued: Vec<Suite> = self.ready.drain(..).chain(self.solo.drain(..)).collect();
        for suite in queued {
            self.timeline.push(ScheduleEvent::Abandoned {
                suite: suite.name().to_string(),
            });
            self.results.push(SuiteResult::new(Arc::new(suite)));
        }
    }

    fn terminate_all(&mut self) {
        for worker in &mut self.workers {
            worker.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suite::TestCase;

    fn suite(name: &str, cpus: usize, solo: bool) -> Suite {
        Suite::with_cases(
            name,
            [TestCase {
                cpus,
                solo,
                ..TestCase::new(format!("{name}.t"), "true")
            }],
        )
    }

    fn settings(pool: usize, jobs: usize, launch: WorkerLaunch) -> SchedulerSettings {
        let mut settings = SchedulerSettings::new(
            (0..pool).collect(),
            std::env::temp_dir().join("suite-runner-scheduler-tests"),
            launch,
        );
        settings.max_concurrent_tests = jobs;
        settings.tick = Duration::from_millis(20);
        settings.join_timeout = Duration::from_secs(5);
        settings
    }

    #[cfg(unix)]
    fn completing_worker(delay: &str) -> WorkerLaunch {
        WorkerLaunch {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                format!(r#"cat >/dev/null; sleep {delay}; echo '{{"event":"completion","succeeded":true}}'"#),
            ],
        }
    }

    fn unused_launch() -> WorkerLaunch {
        WorkerLaunch {
            program: PathBuf::from("does-not-matter"),
            args: Vec::new(),
        }
    }

    #[test]
    fn admission_respects_jobs_and_cpu_budget() {
        let scheduler = Scheduler::new(settings(3, 4, unused_launch()));
        assert!(scheduler.can_admit(&suite("test_a.A", 2, false)));
        assert!(scheduler.can_admit(&suite("test_a.A", 3, false)));
        // Above the per-suite limit: admitted without cpus.
        assert!(scheduler.can_admit(&suite("test_a.A", 8, false)));
        assert_eq!(scheduler.settings().max_vpp_cpus, 3);
    }

    #[test]
    fn per_suite_limit_is_clamped_to_the_pool() {
        let mut s = settings(2, 1, unused_launch());
        s.max_vpp_cpus = 16;
        let scheduler = Scheduler::new(s);
        assert_eq!(scheduler.settings().max_vpp_cpus, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_wide_suite_waits_for_the_first_to_release_cpus() {
        let scheduler = Scheduler::new(settings(3, 4, completing_worker("0.2")));
        let suites = vec![suite("test_a.A", 2, false), suite("test_b.B", 2, false)];
        let report = scheduler
            .run_with_output(suites, &CancellationToken::new(), tokio::io::sink())
            .await
            .unwrap();

        let order: Vec<String> = report
            .timeline
            .iter()
            .map(|event| match event {
                ScheduleEvent::Admitted { suite, .. } => format!("+{suite}"),
                ScheduleEvent::Finished { suite, .. } => format!("-{suite}"),
                ScheduleEvent::Abandoned { suite } => format!("!{suite}"),
            })
            .collect();
        assert_eq!(order, vec!["+test_a.A", "-test_a.A", "+test_b.B", "-test_b.B"]);
        assert_eq!(report.results.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn solo_suite_runs_alone_and_concurrency_recovers() {
        let scheduler = Scheduler::new(settings(4, 4, completing_worker("0.1")));
        let suites = vec![
            suite("test_a.A", 1, false),
            suite("test_s.S", 1, true),
            suite("test_b.B", 1, false),
            suite("test_c.C", 1, false),
        ];
        let report = scheduler
            .run_with_output(suites, &CancellationToken::new(), tokio::io::sink())
            .await
            .unwrap();

        let mut live = 0usize;
        let mut peak = 0usize;
        for event in &report.timeline {
            match event {
                ScheduleEvent::Admitted { solo, running, .. } => {
                    live += 1;
                    assert_eq!(live, *running);
                    if *solo {
                        assert_eq!(live, 1, "solo suite admitted next to another suite");
                    }
                    peak = peak.max(live);
                }
                ScheduleEvent::Finished { .. } => live -= 1,
                ScheduleEvent::Abandoned { .. } => {}
            }
        }
        assert_eq!(peak, 3);
        assert_eq!(report.results.len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_outliving_its_completion_still_releases_cpus() {
        let launch = WorkerLaunch {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                r#"cat >/dev/null; echo '{"event":"completion","succeeded":true}'; exec sleep 30"#
                    .to_string(),
            ],
        };
        let mut s = settings(2, 2, launch);
        s.join_timeout = Duration::from_millis(200);
        let scheduler = Scheduler::new(s);
        let suites = vec![suite("test_a.A", 2, false), suite("test_b.B", 2, false)];

        let started = Instant::now();
        let report = scheduler
            .run_with_output(suites, &CancellationToken::new(), tokio::io::sink())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let admitted: Vec<&Vec<usize>> = report
            .timeline
            .iter()
            .filter_map(|event| match event {
                ScheduleEvent::Admitted { cpus, .. } => Some(cpus),
                _ => None,
            })
            .collect();
        assert_eq!(admitted, vec![&vec![0, 1], &vec![0, 1]]);
        assert_eq!(report.results.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_terminates_live_workers() {
        let launch = WorkerLaunch {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "cat >/dev/null; exec sleep 30".to_string()],
        };
        let scheduler = Scheduler::new(settings(1, 1, launch));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let outcome = scheduler
            .run_with_output(vec![suite("test_a.A", 1, false)], &cancel, tokio::io::sink())
            .await;
        assert!(outcome.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
