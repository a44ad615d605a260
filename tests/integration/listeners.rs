use crate::*;

use std::sync::Mutex;

use jobwire_core::wire::{Status, WebOperate, WebResponse};
use jobwire_services::ResponseListener;

// ══════════════════════════════════════════════════════════════════════════════
//  Listener relay
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Recorder {
    responses: Mutex<Vec<u64>>,
    web_responses: Mutex<Vec<u64>>,
}

impl Recorder {
    fn responses(&self) -> Vec<u64> {
        self.responses.lock().unwrap().clone()
    }

    fn web_responses(&self) -> Vec<u64> {
        self.web_responses.lock().unwrap().clone()
    }
}

impl ResponseListener for Recorder {
    fn on_response(&self, response: &Response) -> Result<()> {
        self.responses.lock().unwrap().push(response.rid);
        Ok(())
    }

    fn on_web_response(&self, response: &WebResponse) -> Result<()> {
        self.web_responses.lock().unwrap().push(response.rid);
        Ok(())
    }
}

struct Broken;

impl ResponseListener for Broken {
    fn on_response(&self, _response: &Response) -> Result<()> {
        anyhow::bail!("listener rejected response")
    }

    fn on_web_response(&self, _response: &WebResponse) -> Result<()> {
        panic!("listener blew up")
    }
}

fn web_response(rid: u64) -> WebResponse {
    WebResponse {
        rid,
        operate: WebOperate::ExecuteJob,
        status: Status::Ok,
        error_text: None,
        body: serde_json::json!({ "job_id": "web-1" }),
    }
}

/// Controller responses reach registered listeners, in registration order
/// of listeners, and a failing listener does not stop the others.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_responses_relayed_to_listeners() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    let broken = worker.worker.listeners().add(Arc::new(Broken));
    let recorder = Arc::new(Recorder::default());
    worker.worker.listeners().add(recorder.clone());
    assert_eq!(worker.worker.listeners().len(), 2);

    let relayed = Response::ok(41, Operate::Manual, serde_json::Value::Null);
    conn.send_envelope(&Envelope::response(&relayed).unwrap()).await.unwrap();
    conn.send_envelope(&Envelope::web_response(&web_response(42)).unwrap())
        .await
        .unwrap();

    assert!(wait_for(FRAME_TIMEOUT, || recorder.web_responses() == vec![42]).await);
    assert_eq!(recorder.responses(), vec![41]);

    // The worker is still serving requests after the failing listener.
    conn.send_request(1, Operate::Manual, sleep_body(0)).await.unwrap();
    assert_eq!(conn.next_response().await.unwrap().rid, 1);

    assert!(worker.worker.listeners().remove(broken));
    assert!(!worker.worker.listeners().remove(broken));
}

/// A removed listener receives nothing further.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removed_listener_is_not_notified() {
    let controller = FakeController::bind().await.unwrap();
    let config = worker_config(&controller.address);
    let worker = TestWorker::with_sleep_jobs(&config);
    let mut conn = controller.accept().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let id = worker.worker.listeners().add(recorder.clone());

    conn.send_envelope(&Envelope::response(&Response::ok(1, Operate::Schedule, serde_json::Value::Null)).unwrap())
        .await
        .unwrap();
    assert!(wait_for(FRAME_TIMEOUT, || recorder.responses() == vec![1]).await);

    assert!(worker.worker.listeners().remove(id));
    conn.send_envelope(&Envelope::response(&Response::ok(2, Operate::Schedule, serde_json::Value::Null)).unwrap())
        .await
        .unwrap();

    // A request behind the relayed response proves it has been read.
    conn.send_request(3, Operate::Manual, sleep_body(0)).await.unwrap();
    assert_eq!(conn.next_response().await.unwrap().rid, 3);
    assert_eq!(recorder.responses(), vec![1]);
    assert!(worker.worker.listeners().is_empty());
}
