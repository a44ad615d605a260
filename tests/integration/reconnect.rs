use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Connection lifecycle
// ══════════════════════════════════════════════════════════════════════════════

/// After the controller drops the connection the worker redials, and new
/// responses go to the new connection.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_reconnects_after_drop() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let worker = TestWorker::with_sleep_jobs(&config);

    let mut first = controller.accept().await.unwrap();
    first.send_request(1, Operate::Manual, sleep_body(0)).await.unwrap();
    assert_eq!(first.next_response().await.unwrap().rid, 1);
    drop(first);

    let mut second = controller.accept().await.unwrap();
    assert!(wait_for(FRAME_TIMEOUT, || worker.worker.is_connected()).await);
    second.send_request(2, Operate::Manual, sleep_body(0)).await.unwrap();
    assert_eq!(second.next_response().await.unwrap().rid, 2);
}

/// A job accepted on a connection that later drops is answered on whichever
/// connection is live when it finishes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_job_answered_on_new_connection() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let _worker = TestWorker::with_sleep_jobs(&config);

    let mut first = controller.accept().await.unwrap();
    first.send_request(7, Operate::Schedule, sleep_body(500)).await.unwrap();
    // Let the worker read the request before the connection goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(first);

    let mut second = controller.accept().await.unwrap();
    let response = second.next_response().await.unwrap();
    assert_eq!(response.rid, 7);
    assert!(response.is_ok());
}

/// Responses that finish while no connection exists are dropped, not
/// replayed on the next connection.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_responses_without_connection_are_discarded() {
    let controller = FakeController::bind().await.unwrap();
    let mut config = worker_config(&controller.address);
    // Long enough that the job finishes while disconnected.
    config.controller.reconnect_interval_ms = 600;
    let worker = TestWorker::with_sleep_jobs(&config);

    let mut first = controller.accept().await.unwrap();
    first.send_request(1, Operate::Manual, sleep_body(150)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(first);

    assert!(wait_for(FRAME_TIMEOUT, || !worker.worker.is_connected()).await);

    let mut second = controller.accept().await.unwrap();
    assert!(second.is_silent_for(Duration::from_millis(300)).await);

    second.send_request(2, Operate::Manual, sleep_body(0)).await.unwrap();
    assert_eq!(second.next_response().await.unwrap().rid, 2);
}

/// The worker keeps retrying until a controller shows up.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_retries_until_controller_listens() {
    // Reserve a port, then release it so the first dials are refused.
    let address = {
        let vacant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        vacant.local_addr().unwrap().to_string()
    };
    let config = worker_config(&address);
    let worker = TestWorker::with_sleep_jobs(&config);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!worker.worker.is_connected());

    let listener = TcpListener::bind(&address).await.unwrap();
    let (stream, _) = tokio::time::timeout(FRAME_TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    drop(stream);
}
