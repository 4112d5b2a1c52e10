pub mod job_queue;
pub mod job_worker;
pub mod retention;
pub mod worker_pool;

pub use job_queue::due_jobs;
pub use job_worker::{DispatchSettings, PublishDispatcher};
pub use retention::spawn_retention_task;
pub use worker_pool::{DispatcherPool, PoolHandle};
