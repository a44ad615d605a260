use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Completion order
// ══════════════════════════════════════════════════════════════════════════════

/// Responses are written in the order jobs finish, not the order they arrived.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_responses_follow_completion_order() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(1, Operate::Schedule, sleep_body(300)).await.unwrap();
    conn.send_request(2, Operate::Schedule, sleep_body(30)).await.unwrap();
    conn.send_request(3, Operate::Schedule, sleep_body(150)).await.unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(conn.next_response().await.unwrap().rid);
    }
    assert_eq!(order, vec![2, 3, 1]);
}

/// Every submitted job yields exactly one response.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_job_answered_once() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    for rid in 1..=20u64 {
        conn.send_request(rid, Operate::Manual, sleep_body(rid % 5 * 10))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..20 {
        seen.push(conn.next_response().await.unwrap().rid);
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    assert!(conn.is_silent_for(Duration::from_millis(200)).await);
}

/// A request that arrives while others run is not held back by them.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_does_not_wait_for_running_jobs() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(1, Operate::Debug, sleep_body(2_000)).await.unwrap();
    conn.send_request(2, Operate::Debug, sleep_body(0)).await.unwrap();

    let started = tokio::time::Instant::now();
    let first = conn.next_response().await.unwrap();
    assert_eq!(first.rid, 2);
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

/// Over the pending ceiling the worker answers with an error at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturated_worker_rejects_with_error_response() {
    let controller = FakeController::bind().await.unwrap();
    let mut config = worker_config(&controller.address);
    config.jobs.max_concurrent_jobs = 1;
    config.jobs.max_pending_jobs = 1;
    let _worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(1, Operate::Schedule, sleep_body(300)).await.unwrap();
    conn.send_request(2, Operate::Schedule, sleep_body(0)).await.unwrap();

    let rejected = conn.next_response().await.unwrap();
    assert_eq!(rejected.rid, 2);
    assert!(!rejected.is_ok());
    assert!(rejected.error_text.unwrap().contains("saturated"));

    let finished = conn.next_response().await.unwrap();
    assert_eq!(finished.rid, 1);
    assert!(finished.is_ok());
}
