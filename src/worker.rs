use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::queue::TaskQueue;
use crate::sandbox::SandboxRunner;
use crate::task::{BuildTask, TaskGenerator};

/// A claimed task together with the worker slot reserved for it
type QueuedTask = (BuildTask, OwnedSemaphorePermit);

/// Fixed set of workers fed by a single polling generator loop
pub struct WorkerPool {
    token: CancellationToken,
    generator: JoinHandle<()>,
    queue: Arc<TaskQueue<QueuedTask>>,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Builds one runner per worker and starts the generator loop and workers.
    ///
    /// # Errors
    ///
    /// Fails if `size` is zero or a runner cannot be created; nothing is
    /// started in that case.
    pub fn start<G, F>(
        size: u8,
        poll_interval: Duration,
        generator: G,
        mut runner_factory: F,
    ) -> anyhow::Result<Self>
    where
        G: TaskGenerator,
        F: FnMut(u8) -> anyhow::Result<Box<dyn SandboxRunner>>,
    {
        anyhow::ensure!(size > 0, "the worker pool needs at least one worker");

        let runners = (1..=size)
            .map(|id| runner_factory(id).map(|runner| (id, Arc::<dyn SandboxRunner>::from(runner))))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let token = CancellationToken::new();
        let queue = Arc::new(TaskQueue::new(size as usize));
        let free_workers = Arc::new(Semaphore::new(size as usize));

        let mut workers = JoinSet::new();
        for (id, runner) in runners {
            workers.spawn(work(id, queue.clone(), runner));
        }

        let generator = tokio::spawn(generate(
            generator,
            queue.clone(),
            free_workers,
            poll_interval,
            token.clone(),
        ));

        log::info!("Worker pool started with {size} workers");
        Ok(Self {
            token,
            generator,
            queue,
            workers,
        })
    }

    /// Stops intake, lets queued and in-flight builds finish, then joins every worker.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Err(e) = self.generator.await {
            log::error!("Generator loop ended abnormally: {e:?}");
        }
        log::info!("Generator loop stopped, waiting for workers to finish...");

        self.queue.close();
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    log::error!("Worker handle panicked: {e:?}");
                } else {
                    log::error!("Worker handle finished with error: {e:?}");
                }
            }
        }
        log::info!("Worker pool stopped");
    }
}

/// Claims work only while a worker is free, so a stop leaves unstarted jobs pending
async fn generate<G: TaskGenerator>(
    mut generator: G,
    queue: Arc<TaskQueue<QueuedTask>>,
    free_workers: Arc<Semaphore>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = free_workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some(task) = generator.next_task().await else {
            drop(permit);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        };

        if let Err((task, _)) = queue.push((task, permit)).await {
            log::error!("Task queue closed, build {} left in building state", task.key());
            break;
        }
    }

    log::info!("Generator loop received shutdown signal, stopping");
}

async fn work(id: u8, queue: Arc<TaskQueue<QueuedTask>>, runner: Arc<dyn SandboxRunner>) {
    log::info!("Worker {id} initialized");

    while let Some((task, permit)) = queue.pop().await {
        log::info!("Worker {id} got build {} from queue", task.key());
        task.run(id, runner.clone()).await;
        drop(permit);
    }

    log::info!("Worker {id} has shut down gracefully");
}
