pub mod job_store;
pub mod platform_publisher;
pub mod task_queue;
pub mod time_service;
