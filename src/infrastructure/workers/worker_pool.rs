use futures::future::join_all;
use futures::{FutureExt, Stream, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::job_queue::due_jobs;
use super::job_worker::{panic_message, PublishDispatcher};
use crate::domain::entities::Job;
use crate::domain::errors::SchedulerResult;
use crate::domain::ports::task_queue::SchedulingQueue;
use crate::domain::ports::time_service::TimeService;

/// Fixed number of workers pulling due jobs from one queue.
///
/// Each worker handles one job at a time, so at most `size` jobs are in
/// flight across the pool.
pub struct DispatcherPool {
    dispatcher: Arc<PublishDispatcher>,
    queue: Arc<dyn SchedulingQueue>,
    time_service: Arc<dyn TimeService>,
    size: usize,
    poll_interval: Duration,
}

impl DispatcherPool {
    pub fn new(
        dispatcher: Arc<PublishDispatcher>,
        queue: Arc<dyn SchedulingQueue>,
        time_service: Arc<dyn TimeService>,
        size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            time_service,
            size: size.max(1),
            poll_interval,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawns the workers. Once `shutdown` fires they stop claiming jobs and
    /// exit after finishing the job in hand.
    pub fn start(&self, shutdown: CancellationToken) -> PoolHandle {
        let handles = (1..=self.size)
            .map(|id| {
                info!(worker.id = id, "Starting dispatch worker");

                let token = shutdown.clone();
                let jobs = due_jobs(
                    self.queue.clone(),
                    self.time_service.clone(),
                    self.poll_interval,
                )
                .take_until(async move { token.cancelled().await });

                let span = info_span!("worker", worker.id = id);
                tokio::spawn(run_worker(self.dispatcher.clone(), jobs).instrument(span))
            })
            .collect();

        PoolHandle { handles }
    }
}

async fn run_worker(
    dispatcher: Arc<PublishDispatcher>,
    jobs: impl Stream<Item = SchedulerResult<Job>>,
) {
    tokio::pin!(jobs);

    while let Some(next) = jobs.next().await {
        let job = match next {
            Ok(job) => job,
            Err(e) => {
                error!("Failed to claim due job: {}", e);
                continue;
            }
        };

        // A panic leaves the job active until its lease expires; the worker keeps going.
        let job_id = job.id.clone();
        match AssertUnwindSafe(dispatcher.dispatch(job)).catch_unwind().await {
            Ok(Ok(outcome)) => debug!(job_id = %job_id, ?outcome, "Dispatch finished"),
            Ok(Err(e)) => error!(job_id = %job_id, "Dispatch aborted: {}", e),
            Err(panic) => error!(
                job_id = %job_id,
                "Dispatch panicked: {}",
                panic_message(panic.as_ref())
            ),
        }
    }

    info!("Dispatch worker stopped");
}

/// Handle to the running workers.
#[derive(Debug)]
pub struct PoolHandle {
    handles: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Waits until every worker has exited.
    pub async fn wait(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "Dispatch worker task panicked");
            }
        });
    }
}
