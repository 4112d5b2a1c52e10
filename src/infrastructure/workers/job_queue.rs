use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::Job;
use crate::domain::errors::SchedulerResult;
use crate::domain::ports::task_queue::SchedulingQueue;
use crate::domain::ports::time_service::TimeService;
use crate::domain::services::compute_delay;

/// Floor on idle waits so a due-but-contended job cannot spin the loop.
const MIN_IDLE_WAIT: Duration = Duration::from_millis(10);

/// Endless stream of jobs claimed from `queue` as they become due.
///
/// When nothing is claimable the stream sleeps until the earliest due time,
/// bounded by `poll_interval` so entries added meanwhile are picked up.
/// Queue errors are yielded after a back-off sleep and the stream keeps going.
pub fn due_jobs(
    queue: Arc<dyn SchedulingQueue>,
    time: Arc<dyn TimeService>,
    poll_interval: Duration,
) -> BoxStream<'static, SchedulerResult<Job>> {
    stream::unfold((queue, time), move |(queue, time)| async move {
        loop {
            match queue.fetch_due().await {
                Ok(Some(job)) => return Some((Ok(job), (queue, time))),
                Ok(None) => {}
                Err(e) => {
                    time.sleep(poll_interval).await;
                    return Some((Err(e), (queue, time)));
                }
            }

            let wait = match queue.next_due_at().await {
                Ok(Some(due_at)) => compute_delay(time.now(), due_at).min(poll_interval),
                Ok(None) => poll_interval,
                Err(e) => {
                    time.sleep(poll_interval).await;
                    return Some((Err(e), (queue, time)));
                }
            };
            time.sleep(wait.max(MIN_IDLE_WAIT)).await;
        }
    })
    .boxed()
}
