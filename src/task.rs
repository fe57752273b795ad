use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::database::{self as db, PendingBuild, TestCase};
use crate::report::BuildReport;
use crate::sandbox::SandboxRunner;

/// A claimed job packaged with everything a worker needs to run it
#[derive(Debug)]
pub struct BuildTask {
    pub build: PendingBuild,
    pub cases: Vec<TestCase>,
    reports: mpsc::Sender<BuildReport>,
}

impl BuildTask {
    pub fn new(
        build: PendingBuild,
        cases: Vec<TestCase>,
        reports: mpsc::Sender<BuildReport>,
    ) -> Self {
        Self {
            build,
            cases,
            reports,
        }
    }

    pub fn key(&self) -> &str {
        &self.build.uuid
    }

    /// Executes the build on the blocking pool and sends its report.
    ///
    /// A panic inside the runner becomes an `exception` report.
    pub async fn run(self, worker_id: u8, runner: Arc<dyn SandboxRunner>) {
        let Self {
            build,
            cases,
            reports,
        } = self;
        let key = build.uuid.clone();
        let web_hook_url = build.web_hook_url.clone();

        let handle =
            tokio::task::spawn_blocking(move || runner.run(build.language, &build.source, &cases));

        let report = match handle.await {
            Ok(outcome) => BuildReport::from_outcome(key, web_hook_url, outcome),
            Err(e) => {
                log::error!("Build {key} crashed on worker {worker_id}: {e}");
                BuildReport::exception(key, web_hook_url, format!("build task failed: {e}"))
            }
        };

        log::info!(
            "Build {} finished on worker {worker_id}: {} ({}/{})",
            report.key,
            report.status,
            report.tests_passed,
            report.tests_total
        );

        if let Err(e) = reports.send(report).await {
            log::error!("Report channel closed, report for build {} lost", e.0.key);
        }
    }
}

/// Source of work for the scheduler.
///
/// `None` means there is nothing to do right now; the caller backs off.
pub trait TaskGenerator: Send + 'static {
    fn next_task(&mut self) -> impl Future<Output = Option<BuildTask>> + Send;
}

/// Claims pending jobs from the store and attaches their test cases
pub struct StoreTaskGenerator {
    db_pool: SqlitePool,
    reports: mpsc::Sender<BuildReport>,
}

impl StoreTaskGenerator {
    pub fn new(db_pool: SqlitePool, reports: mpsc::Sender<BuildReport>) -> Self {
        Self { db_pool, reports }
    }
}

impl TaskGenerator for StoreTaskGenerator {
    async fn next_task(&mut self) -> Option<BuildTask> {
        let build = match db::pull_pending_build(&self.db_pool).await {
            Ok(Some(build)) => build,
            Ok(None) => return None,
            Err(e) => {
                log::error!("Failed to claim a pending build, skipping this cycle: {e}");
                return None;
            }
        };
        log::info!("Claimed build {}", build.uuid);

        match db::get_test_cases(&self.db_pool, build.assignment_id).await {
            Ok(cases) => Some(BuildTask::new(build, cases, self.reports.clone())),
            Err(e) => {
                // Already flipped to building, so it must still end in a terminal state
                log::error!("Failed to load test cases for build {}: {e}", build.uuid);
                let report = BuildReport::exception(
                    build.uuid,
                    build.web_hook_url,
                    format!("cannot load test cases: {e}"),
                );
                if self.reports.send(report).await.is_err() {
                    log::error!("Report channel closed while reporting a claim failure");
                }
                None
            }
        }
    }
}
