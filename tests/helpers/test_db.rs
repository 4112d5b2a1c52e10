use postfanout::bootstrap::JobBackend;
use postfanout::domain::entities::{Platform, PostPayload};
use postfanout::domain::services::BackoffPolicy;
use postfanout::infrastructure::persistence::{Database, InMemoryJobQueue, SqliteJobQueue};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const LEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Short delays so retry paths finish quickly.
pub fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_delay: Duration::from_secs(1),
    }
}

/// Unique file per call so tests can run in parallel.
pub fn test_db_url() -> String {
    let path = std::env::temp_dir().join(format!("postfanout_test_{}.db", Uuid::new_v4()));
    format!("sqlite://{}?mode=rwc", path.display())
}

pub async fn setup_test_db() -> Database {
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    db
}

pub async fn sqlite_backend(policy: BackoffPolicy, lease_timeout: Duration) -> JobBackend {
    let db = setup_test_db().await;
    let jobs = Arc::new(SqliteJobQueue::new(db.clone(), policy, lease_timeout));
    JobBackend {
        queue: jobs.clone(),
        store: jobs,
        database: Some(db),
    }
}

pub fn memory_backend(policy: BackoffPolicy, lease_timeout: Duration) -> JobBackend {
    let jobs = Arc::new(InMemoryJobQueue::new(policy, lease_timeout));
    JobBackend {
        queue: jobs.clone(),
        store: jobs,
        database: None,
    }
}

/// Both store implementations, labelled for assertion messages.
pub async fn all_backends(policy: BackoffPolicy) -> Vec<(&'static str, JobBackend)> {
    vec![
        ("memory", memory_backend(policy.clone(), LEASE_TIMEOUT)),
        ("sqlite", sqlite_backend(policy, LEASE_TIMEOUT).await),
    ]
}

pub fn sample_payload(post_id: &str, platforms: &[Platform]) -> PostPayload {
    PostPayload {
        post_id: post_id.to_string(),
        caption: format!("Caption for {}", post_id),
        media: Some("https://cdn.example.com/image.png".to_string()),
        platforms: platforms.to_vec(),
        owner_id: "owner-1".to_string(),
        platform_options: vec![],
    }
}
