use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Subprocess jobs
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_process_job_round_trip() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_process_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(
        1,
        Operate::Manual,
        serde_json::json!({ "job_id": "it-echo", "cmd": "echo", "args": ["from", "worker"] }),
    )
    .await
    .unwrap();

    let response = conn.next_response().await.unwrap();
    assert_eq!(response.rid, 1);
    assert!(response.is_ok());
    assert_eq!(response.body["job_id"], "it-echo");
    assert_eq!(response.body["stdout"].as_str().unwrap().trim(), "from worker");
}

/// A running subprocess job is stopped by a cancel request; both get a
/// response.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_process_job_cancel() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let worker = TestWorker::with_process_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(
        1,
        Operate::Schedule,
        serde_json::json!({ "job_id": "it-sleep", "cmd": "sleep", "args": ["10"] }),
    )
    .await
    .unwrap();
    let running = &worker.worker.context().running;
    assert!(wait_for(FRAME_TIMEOUT, || running.is_running("it-sleep")).await);

    conn.send_request(2, Operate::Cancel, serde_json::json!({ "job_id": "it-sleep" }))
        .await
        .unwrap();

    let mut responses = vec![conn.next_response().await.unwrap(), conn.next_response().await.unwrap()];
    responses.sort_by_key(|r| r.rid);

    assert_eq!(responses[0].rid, 1);
    assert!(!responses[0].is_ok());
    assert!(responses[0].error_text.as_deref().unwrap().contains("cancelled"));

    assert_eq!(responses[1].rid, 2);
    assert!(responses[1].is_ok());
    assert_eq!(responses[1].body["cancelled"], true);
}

/// A command that does not exist is an error response, not a dead worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_process_job_spawn_failure() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_process_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(
        1,
        Operate::Debug,
        serde_json::json!({ "job_id": "it-missing", "cmd": "/nonexistent/jobwire-cmd" }),
    )
    .await
    .unwrap();
    let response = conn.next_response().await.unwrap();
    assert_eq!(response.rid, 1);
    assert!(!response.is_ok());
    assert!(response.error_text.unwrap().contains("failed to spawn"));
}

/// With a single permit held by the running job, a cancel still gets
/// through at once instead of waiting for the job to end.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_with_single_permit() {
    let controller = FakeController::bind().await.unwrap();
    let mut config = worker_config(&controller.address);
    config.jobs.max_concurrent_jobs = 1;
    let worker = TestWorker::with_process_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    conn.send_request(
        1,
        Operate::Schedule,
        serde_json::json!({ "job_id": "it-single", "cmd": "sleep", "args": ["3"] }),
    )
    .await
    .unwrap();
    let running = &worker.worker.context().running;
    assert!(wait_for(FRAME_TIMEOUT, || running.is_running("it-single")).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    conn.send_request(2, Operate::Cancel, serde_json::json!({ "job_id": "it-single" }))
        .await
        .unwrap();

    let mut responses = vec![conn.next_response().await.unwrap(), conn.next_response().await.unwrap()];
    assert!(started.elapsed() < Duration::from_secs(2));
    responses.sort_by_key(|r| r.rid);
    assert!(responses[0].error_text.as_deref().unwrap().contains("cancelled"));
    assert!(responses[1].is_ok());
    assert_eq!(responses[1].body["cancelled"], true);
}
