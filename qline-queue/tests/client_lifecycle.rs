use std::sync::Arc;
use std::time::Duration;

use qline_queue::{
    payload, JobState, MemoryBackend, Outcome, PushOptions, QueueClient, QueueConfig, QueueError,
};
use serde_json::{json, Value};

fn client_with(config: QueueConfig) -> (MemoryBackend, QueueClient) {
    let backend = MemoryBackend::new();
    let client = QueueClient::new(Arc::new(backend.clone()), config);
    (backend, client)
}

fn client() -> (MemoryBackend, QueueClient) {
    client_with(QueueConfig::default().with_default_queue("default"))
}

#[tokio::test]
async fn unused_queues_are_empty() {
    let (_backend, client) = client();
    for name in ["never", "touched", "default"] {
        assert_eq!(client.size(Some(name)).await.unwrap(), 0);
    }
    assert_eq!(client.size(None).await.unwrap(), 0);
}

#[tokio::test]
async fn push_then_pop_returns_the_same_job() {
    let (_backend, client) = client();
    let data = json!({"userId": 42, "subject": "hi"});

    let id = client.push("SendReminder", &data, Some("mail")).await.unwrap();
    assert_eq!(client.size(Some("mail")).await.unwrap(), 1);

    let mut job = client.pop(Some("mail")).await.unwrap().expect("a job");
    assert_eq!(job.id(), &id);
    assert_eq!(job.payload().job, "SendReminder");
    assert_eq!(Value::Object(job.payload().data.clone()), data);
    assert_eq!(job.connection_name(), "qline");
    assert_eq!(job.queue(), "mail");
    assert_eq!(job.attempt(), 1);

    job.mark_complete().await.unwrap();
    assert_eq!(job.outcome(), Outcome::Completed);
    assert_eq!(client.size(Some("mail")).await.unwrap(), 0);
}

#[tokio::test]
async fn pop_on_empty_queue_is_none() {
    let (_backend, client) = client();
    assert!(client.pop(None).await.unwrap().is_none());
    assert!(client.pop(Some("elsewhere")).await.unwrap().is_none());
}

#[tokio::test]
async fn unavailable_backend_is_not_an_empty_queue() {
    let (backend, client) = client();
    backend.disconnect();

    let err = client.pop(None).await.unwrap_err();
    assert!(matches!(err, QueueError::BackendUnavailable(_)));
    assert!(client.push("x", &json!({}), None).await.unwrap_err().is_unavailable());
    assert!(client.size(None).await.unwrap_err().is_unavailable());
}

#[tokio::test(start_paused = true)]
async fn later_hides_job_until_delay_elapses() {
    let (_backend, client) = client();
    client
        .later(5u64, "Remind", &json!({"n": 1}), None)
        .await
        .unwrap();

    assert!(client.pop(None).await.unwrap().is_none());
    assert_eq!(client.size(None).await.unwrap(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    let mut job = client.pop(None).await.unwrap().expect("visible after delay");
    assert_eq!(job.payload().job, "Remind");
    job.mark_complete().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn later_accepts_durations_and_instants() {
    let (_backend, client) = client();
    client
        .later(Duration::from_secs(3), "a", &json!({}), None)
        .await
        .unwrap();
    client
        .later(
            chrono::Utc::now() - chrono::Duration::seconds(10),
            "b",
            &json!({}),
            None,
        )
        .await
        .unwrap();

    let mut past = client.pop(None).await.unwrap().expect("past instant is immediate");
    assert_eq!(past.payload().job, "b");
    past.mark_complete().await.unwrap();
    assert!(client.pop(None).await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(3)).await;
    let mut job = client.pop(None).await.unwrap().unwrap();
    assert_eq!(job.payload().job, "a");
    job.mark_complete().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recur_produces_a_job_every_interval() {
    let (_backend, client) = client();
    client
        .recur(60, "SendReminder", &json!({"userId": 42}), None)
        .await
        .unwrap();

    for _ in 0..3 {
        let mut job = client.pop(None).await.unwrap().expect("occurrence");
        assert_eq!(job.payload().job, "SendReminder");
        assert_eq!(job.payload().data["userId"], 42);
        job.mark_complete().await.unwrap();

        assert!(client.pop(None).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(60)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn unrecur_stops_new_occurrences() {
    let (_backend, client) = client();
    let schedule = client.recur(10, "tick", &json!({}), None).await.unwrap();
    client.pop(None).await.unwrap().unwrap().mark_complete().await.unwrap();

    client.unrecur(&schedule).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(client.pop(None).await.unwrap().is_none());
}

#[tokio::test]
async fn recur_rejects_zero_interval() {
    let (_backend, client) = client();
    let err = client.recur(0, "x", &json!({}), None).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
}

#[tokio::test]
async fn second_terminal_call_is_invalid_state() {
    let (_backend, client) = client();
    client.push("x", &json!({}), None).await.unwrap();

    let mut job = client.pop(None).await.unwrap().unwrap();
    job.mark_complete().await.unwrap();

    assert!(matches!(
        job.mark_failed("x").await,
        Err(QueueError::InvalidState(_))
    ));
    assert!(matches!(
        job.mark_complete().await,
        Err(QueueError::InvalidState(_))
    ));
    assert!(matches!(job.release().await, Err(QueueError::InvalidState(_))));
    assert!(matches!(job.heartbeat().await, Err(QueueError::InvalidState(_))));
    assert_eq!(job.outcome(), Outcome::Completed);
}

#[tokio::test]
async fn failed_job_is_retried_by_the_backend_until_exhausted() {
    let (backend, client) = client_with(
        QueueConfig::default()
            .with_default_queue("default")
            .with_default_max_tries(2),
    );
    let id = client.push("flaky", &json!({}), None).await.unwrap();

    let mut first = client.pop(None).await.unwrap().unwrap();
    first.mark_failed("timeout talking to smtp").await.unwrap();
    assert_eq!(backend.job_state(&id).await, Some(JobState::Pending));

    let mut second = client.pop(None).await.unwrap().unwrap();
    assert_eq!(second.attempt(), 2);
    second.mark_failed("still down").await.unwrap();

    assert_eq!(backend.job_state(&id).await, Some(JobState::Dead));
    assert!(client.pop(None).await.unwrap().is_none());
}

#[tokio::test]
async fn release_returns_job_without_counting_a_failure() {
    let (backend, client) = client();
    let id = client.push("x", &json!({}), None).await.unwrap();

    let mut job = client.pop(None).await.unwrap().unwrap();
    job.release().await.unwrap();
    assert_eq!(backend.attempts(&id).await, Some(0));

    let again = client.pop(None).await.unwrap().unwrap();
    assert_eq!(again.id(), &id);
    assert_eq!(again.attempt(), 1);
}

#[tokio::test]
async fn push_raw_merges_only_recognized_options() {
    let (_backend, client) = client();
    let raw = payload::encode("Report", &json!({"month": 3}), 10, 1).unwrap();
    let options = PushOptions::from_value(&json!({
        "timeout": 120,
        "job": "Hijacked",
        "data": {"month": 12}
    }))
    .unwrap();

    client.push_raw(&raw, None, &options).await.unwrap();
    let mut job = client.pop(None).await.unwrap().unwrap();
    assert_eq!(job.payload().job, "Report");
    assert_eq!(job.payload().data["month"], 3);
    assert_eq!(job.payload().timeout_secs, 120);
    assert_eq!(job.payload().max_tries, 1);
    job.mark_complete().await.unwrap();
}

#[tokio::test]
async fn push_raw_rejects_malformed_payload() {
    let (_backend, client) = client();
    for raw in ["{", r#"{"data":{}}"#, r#"{"job":""}"#] {
        let err = client
            .push_raw(raw, None, &PushOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Decoding(_)), "{raw}");
    }
    assert_eq!(client.size(None).await.unwrap(), 0);
}

#[tokio::test]
async fn push_applies_configured_defaults() {
    let (_backend, client) = client_with(
        QueueConfig::default()
            .with_default_queue("default")
            .with_default_timeout(45)
            .with_default_max_tries(7),
    );
    client
        .push("x", &json!({"timeout": 1, "maxTries": 1}), None)
        .await
        .unwrap();

    let mut job = client.pop(None).await.unwrap().unwrap();
    assert_eq!(job.payload().timeout_secs, 45);
    assert_eq!(job.payload().max_tries, 7);
    // job data never doubles as option overrides
    assert_eq!(job.payload().data["timeout"], 1);
    job.mark_complete().await.unwrap();
}

#[tokio::test]
async fn missing_queue_name_is_a_configuration_error() {
    let (_backend, client) = client_with(QueueConfig::default());
    assert!(matches!(
        client.push("x", &json!({}), None).await,
        Err(QueueError::Configuration(_))
    ));
    assert!(matches!(
        client.pop(None).await,
        Err(QueueError::Configuration(_))
    ));
    assert!(matches!(
        client.size(Some("")).await,
        Err(QueueError::Configuration(_))
    ));
    assert!(client.push("x", &json!({}), Some("named")).await.is_ok());
}

#[tokio::test]
async fn connection_name_is_reported_by_jobs() {
    let (_backend, client) = client();
    let client = client.with_connection_name("primary");
    client.push("x", &json!({}), None).await.unwrap();

    let mut job = client.pop(None).await.unwrap().unwrap();
    assert_eq!(job.connection_name(), "primary");
    job.mark_complete().await.unwrap();
}

#[tokio::test]
async fn concurrent_poppers_never_share_a_job() {
    let (_backend, client) = client();
    let client = Arc::new(client);
    for n in 0..50 {
        client.push("x", &json!({"n": n}), None).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(mut job) = client.pop(None).await.unwrap() {
                seen.push(job.id().clone());
                job.mark_complete().await.unwrap();
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 50);
    assert_eq!(all.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn extreme_delays_and_timeouts_are_accepted() {
    let (_backend, client) = client();

    client.later(u64::MAX, "far", &json!({}), None).await.unwrap();
    client
        .later(Duration::MAX, "farther", &json!({}), None)
        .await
        .unwrap();
    assert!(client.pop(None).await.unwrap().is_none());
    assert_eq!(client.size(None).await.unwrap(), 2);

    let raw = payload::encode("slow", &json!({}), 0, 0).unwrap();
    client
        .push_raw(&raw, Some("slow"), &PushOptions::default().timeout(u64::MAX))
        .await
        .unwrap();
    let mut job = client.pop(Some("slow")).await.unwrap().expect("leased");
    job.heartbeat().await.unwrap();
    job.mark_complete().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn huge_recurrence_interval_does_not_wedge_the_backend() {
    let (_backend, client) = client();
    client
        .recur(u64::MAX, "rare", &json!({}), None)
        .await
        .unwrap();

    assert_eq!(client.size(Some("other")).await.unwrap(), 0);
    let mut first = client.pop(None).await.unwrap().expect("first occurrence");
    first.mark_complete().await.unwrap();

    tokio::time::advance(Duration::from_secs(86400)).await;
    assert!(client.pop(None).await.unwrap().is_none());
    client.push("x", &json!({}), Some("other")).await.unwrap();
    assert_eq!(client.size(Some("other")).await.unwrap(), 1);
}
