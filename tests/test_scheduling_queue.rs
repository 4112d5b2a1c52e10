mod helpers;

use chrono::Utc;
use futures::future::join_all;
use helpers::*;
use postfanout::domain::entities::{JobState, Platform, PublishResult};
use postfanout::domain::ports::job_store::JobStore;
use postfanout::domain::ports::task_queue::{FinishOutcome, SchedulingQueue};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_job_not_released_before_due() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::from_millis(80))
            .await
            .unwrap();

        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");
        assert!(backend.queue.next_due_at().await.unwrap().is_some(), "{name}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(job.id, "p1", "{name}");
        assert_eq!(job.state, JobState::Active, "{name}");
        assert!(job.claim_id.is_some(), "{name}");
        assert!(job.locked_until.is_some(), "{name}");
    }
}

#[tokio::test]
async fn test_duplicate_enqueue_yields_single_dispatch() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();
        let mut edited = sample_payload("p1", &[Platform::Linkedin]);
        edited.caption = "second".to_string();
        backend
            .queue
            .enqueue("p1", edited, Duration::ZERO)
            .await
            .unwrap();

        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(job.payload.caption, "second", "{name}");
        assert_eq!(job.payload.platforms, vec![Platform::Linkedin], "{name}");
        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_rescheduling_later_moves_the_slot() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_due_jobs_released_in_due_order() {
    for (name, backend) in all_backends(fast_policy()).await {
        for (id, delay_ms) in [("c", 30), ("a", 10), ("b", 20)] {
            backend
                .queue
                .enqueue(id, sample_payload(id, &[Platform::Twitter]), Duration::from_millis(delay_ms))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut order = Vec::new();
        while let Some(job) = backend.queue.fetch_due().await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec!["a", "b", "c"], "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_fetch_never_hands_out_a_job_twice() {
    for (name, backend) in all_backends(fast_policy()).await {
        for i in 0..5 {
            let id = format!("job-{i}");
            backend
                .queue
                .enqueue(&id, sample_payload(&id, &[Platform::Twitter]), Duration::ZERO)
                .await
                .unwrap();
        }

        let fetches = (0..10).map(|_| {
            let queue = backend.queue.clone();
            tokio::spawn(async move { queue.fetch_due().await.unwrap() })
        });
        let claimed: Vec<String> = join_all(fetches)
            .await
            .into_iter()
            .filter_map(|r| r.unwrap())
            .map(|job| job.id)
            .collect();

        let unique: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), 5, "{name}");
        assert_eq!(unique.len(), 5, "{name}");
    }
}

#[tokio::test]
async fn test_fail_retries_with_exponential_backoff() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();

        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        let outcome = backend.queue.fail(&job, "twitter: rate_limited", true).await.unwrap();
        assert_eq!(
            outcome,
            FinishOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_millis(20)
            },
            "{name}"
        );

        let snapshot = backend.store.get("p1").await.unwrap();
        assert_eq!(snapshot.state, JobState::Pending, "{name}");
        assert_eq!(snapshot.attempts, 1, "{name}");
        assert_eq!(snapshot.last_error.as_deref(), Some("twitter: rate_limited"), "{name}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(job.attempts, 1, "{name}");
        let outcome = backend.queue.fail(&job, "twitter: rate_limited", true).await.unwrap();
        assert_eq!(
            outcome,
            FinishOutcome::Retrying {
                attempt: 2,
                delay: Duration::from_millis(40)
            },
            "{name}"
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        let outcome = backend.queue.fail(&job, "twitter: rate_limited", true).await.unwrap();
        assert_eq!(outcome, FinishOutcome::Failed { attempts: 3 }, "{name}");

        // Terminal: gone from the due stream.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");
        assert!(backend.queue.next_due_at().await.unwrap().is_none(), "{name}");
        assert_eq!(backend.store.get("p1").await.unwrap().state, JobState::Failed, "{name}");
    }
}

#[tokio::test]
async fn test_non_retryable_failure_skips_backoff() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Linkedin]), Duration::ZERO)
            .await
            .unwrap();

        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        let outcome = backend.queue.fail(&job, "linkedin: rejected", false).await.unwrap();
        assert_eq!(outcome, FinishOutcome::Failed { attempts: 1 }, "{name}");
    }
}

#[tokio::test]
async fn test_complete_marks_published_once() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Instagram]), Duration::ZERO)
            .await
            .unwrap();

        let job = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(backend.queue.complete(&job).await.unwrap(), FinishOutcome::Completed, "{name}");

        let snapshot = backend.store.get("p1").await.unwrap();
        assert_eq!(snapshot.state, JobState::Completed, "{name}");
        assert!(snapshot.published, "{name}");
        assert!(snapshot.published_at.is_some(), "{name}");

        // The same claim cannot finalize twice.
        assert_eq!(backend.queue.complete(&job).await.unwrap(), FinishOutcome::LeaseLost, "{name}");
    }
}

#[tokio::test]
async fn test_resubmit_during_dispatch_supersedes_attempt() {
    for (name, backend) in all_backends(fast_policy()).await {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();
        let job = backend.queue.fetch_due().await.unwrap().unwrap();

        let mut edited = sample_payload("p1", &[Platform::Twitter]);
        edited.caption = "edited while publishing".to_string();
        backend
            .queue
            .enqueue("p1", edited, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(backend.store.get("p1").await.unwrap().state, JobState::Active, "{name}");

        backend
            .store
            .record_attempt_result("p1", &PublishResult::succeeded(Platform::Twitter, Utc::now()))
            .await
            .unwrap();
        let outcome = backend.queue.complete(&job).await.unwrap();
        assert_eq!(outcome, FinishOutcome::Superseded, "{name}");

        let snapshot = backend.store.get("p1").await.unwrap();
        assert_eq!(snapshot.state, JobState::Pending, "{name}");
        assert!(!snapshot.published, "{name}");
        // The superseded attempt published the old caption.
        assert!(snapshot.results.is_empty(), "{name}");
        // Held for the new due time, not released now.
        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_expired_lease_is_redelivered() {
    let lease = Duration::from_millis(50);
    let backends = vec![
        ("memory", memory_backend(fast_policy(), lease)),
        ("sqlite", sqlite_backend(fast_policy(), lease).await),
    ];

    for (name, backend) in backends {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();
        let stale = backend.queue.fetch_due().await.unwrap().unwrap();
        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");

        tokio::time::sleep(Duration::from_millis(80)).await;
        let fresh = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(fresh.id, "p1", "{name}");
        assert_ne!(fresh.claim_id, stale.claim_id, "{name}");
        assert_eq!(fresh.attempts, 1, "{name}");
        assert!(fresh.last_error.is_some(), "{name}");

        assert_eq!(backend.queue.complete(&stale).await.unwrap(), FinishOutcome::LeaseLost, "{name}");
        assert_eq!(backend.queue.complete(&fresh).await.unwrap(), FinishOutcome::Completed, "{name}");
    }
}

#[tokio::test]
async fn test_repeatedly_expired_lease_fails_job() {
    let lease = Duration::from_millis(30);
    let backends = vec![
        ("memory", memory_backend(fast_policy(), lease)),
        ("sqlite", sqlite_backend(fast_policy(), lease).await),
    ];

    for (name, backend) in backends {
        backend
            .queue
            .enqueue("p1", sample_payload("p1", &[Platform::Twitter]), Duration::ZERO)
            .await
            .unwrap();

        // Claimed and abandoned three times, as if the process kept crashing mid-dispatch.
        let first = backend.queue.fetch_due().await.unwrap().unwrap();
        assert_eq!(first.attempts, 0, "{name}");
        for expected in 1..=2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let job = backend.queue.fetch_due().await.unwrap().unwrap();
            assert_eq!(job.attempts, expected, "{name}");
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.queue.fetch_due().await.unwrap().is_none(), "{name}");

        let snapshot = backend.store.get("p1").await.unwrap();
        assert_eq!(snapshot.state, JobState::Failed, "{name}");
        assert_eq!(snapshot.attempts, 3, "{name}");
        assert!(!snapshot.published, "{name}");
        assert!(snapshot.last_error.unwrap().contains("lease expired"), "{name}");
        assert!(backend.queue.next_due_at().await.unwrap().is_none(), "{name}");
    }
}
