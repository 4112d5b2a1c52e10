//! Schedules a sample post five seconds from now on every platform.

use chrono::Utc;
use postfanout::bootstrap;
use postfanout::config::Config;
use postfanout::SchedulePostRequest;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postfanout=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let backend = bootstrap::build_backend(&config).await?;
    let scheduling = postfanout::SchedulingService::new(
        backend.queue.clone(),
        backend.store.clone(),
        std::sync::Arc::new(postfanout::infrastructure::runtime::TokioTimeService::new()),
    );

    let post_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("test-post-{}", Utc::now().timestamp()));
    let scheduled_at = Utc::now() + chrono::Duration::seconds(5);

    let job_id = scheduling
        .schedule_post(SchedulePostRequest {
            post_id,
            caption: "Hello from postfanout".to_string(),
            media: None,
            platforms: vec![
                "instagram".to_string(),
                "twitter".to_string(),
                "linkedin".to_string(),
            ],
            scheduled_at: scheduled_at.to_rfc3339(),
            owner_id: "test-user".to_string(),
            platform_specific: Some(json!({
                "instagram": { "hashtags": ["postfanout", "test"] }
            })),
        })
        .await?;

    println!("Scheduled job {} for {}", job_id, scheduled_at.to_rfc3339());

    if let Some(db) = &backend.database {
        db.close().await;
    }
    Ok(())
}
