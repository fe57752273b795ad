use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::BuilderConfig;
use crate::database as db;
use crate::events::{BuildEvents, BuildFinishedEvent};
use crate::report::BuildReport;
use crate::sandbox::SandboxRunner;
use crate::status::BuildStatus;
use crate::task::StoreTaskGenerator;
use crate::worker::WorkerPool;

/// Owns the worker pool and the consumer side of the report channel
pub struct BuildMaster {
    pool: WorkerPool,
    listener: JoinHandle<()>,
    token: CancellationToken,
}

impl BuildMaster {
    pub fn start<E, F>(
        db_pool: SqlitePool,
        events: Arc<E>,
        config: &BuilderConfig,
        runner_factory: F,
    ) -> anyhow::Result<Self>
    where
        E: BuildEvents,
        F: FnMut(u8) -> anyhow::Result<Box<dyn SandboxRunner>>,
    {
        let (report_tx, report_rx) = mpsc::channel(config.report_buffer.max(1));

        let pool = WorkerPool::start(
            config.workers,
            Duration::from_millis(config.poll_interval_ms),
            StoreTaskGenerator::new(db_pool.clone(), report_tx),
            runner_factory,
        )?;

        let token = CancellationToken::new();
        let listener = tokio::spawn(listen(db_pool, events, report_rx, token.clone()));

        Ok(Self {
            pool,
            listener,
            token,
        })
    }

    /// Stops the worker pool, then the report loop once every pending report is saved and announced
    pub async fn shutdown(self) {
        self.pool.shutdown().await;

        self.token.cancel();
        if let Err(e) = self.listener.await {
            log::error!("Report listener ended abnormally: {e:?}");
        }
        log::info!("Build master stopped");
    }
}

async fn listen<E: BuildEvents>(
    db_pool: SqlitePool,
    events: Arc<E>,
    mut reports: mpsc::Receiver<BuildReport>,
    token: CancellationToken,
) {
    log::info!("Report listener started");
    let mut announcements = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => {
                    if let Some((event, web_hook_url)) = persist_build_report(&db_pool, report).await {
                        announcements.spawn(announce(events.clone(), event, web_hook_url));
                    }
                }
                None => break,
            },
            Some(res) = announcements.join_next() => log_announcement(res),
        }
    }

    reports.close();
    while let Some(report) = reports.recv().await {
        if let Some((event, web_hook_url)) = persist_build_report(&db_pool, report).await {
            announcements.spawn(announce(events.clone(), event, web_hook_url));
        }
    }
    while let Some(res) = announcements.join_next().await {
        log_announcement(res);
    }

    log::info!("Report listener has shut down gracefully");
}

/// Saves one report; returns the event to announce, or `None` if it was rejected
pub async fn persist_build_report(
    db_pool: &SqlitePool,
    report: BuildReport,
) -> Option<(BuildFinishedEvent, Option<String>)> {
    if let Err(e) = db::add_build_report(db_pool, &report).await {
        log::error!("Failed to save report of build {}: {e:#}", report.key);
        return None;
    }
    log::debug!("Saved report of build {}", report.key);

    let event = BuildFinishedEvent {
        key: report.key,
        succeed: report.status == BuildStatus::Succeed,
    };
    Some((event, report.web_hook_url))
}

/// Publishes one event off the report loop; failures are logged, never retried
async fn announce<E: BuildEvents>(
    events: Arc<E>,
    event: BuildFinishedEvent,
    web_hook_url: Option<String>,
) {
    let key = event.key.clone();
    if let Err(e) = events.publish_build_finished(event, web_hook_url).await {
        log::error!("Failed to publish build finished event for {key}: {e:#}");
    }
}

fn log_announcement(res: Result<(), JoinError>) {
    if let Err(e) = res {
        log::error!("Event publisher task failed: {e:?}");
    }
}
