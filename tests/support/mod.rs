//! Shared fixtures for integration tests: a configurable callback sink and
//! subscription builders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use alder_core::ConfirmMode;
use alder_core::Subscription;
use alder_core::SubscriptionId;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;

/// What the sink saw and what it answers with.
#[derive(Debug)]
pub struct CallbackSink {
    /// Raw request bodies, in arrival order.
    pub bodies: Mutex<Vec<String>>,
    status: StatusCode,
    body: &'static str,
}

impl CallbackSink {
    pub fn hits(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    pub fn body_at(&self, index: usize) -> String {
        self.bodies.lock().unwrap()[index].clone()
    }
}

async fn sink_handler(State(sink): State<Arc<CallbackSink>>, body: String) -> (StatusCode, &'static str) {
    sink.bodies.lock().unwrap().push(body);
    (sink.status, sink.body)
}

/// Serve a callback sink on an ephemeral port, answering every POST with
/// `status` and `body`.
pub async fn start_callback_sink(status: StatusCode, body: &'static str) -> (SocketAddr, Arc<CallbackSink>) {
    let sink = Arc::new(CallbackSink {
        bodies: Mutex::new(Vec::new()),
        status,
        body,
    });

    let app = Router::new().route("/cb", post(sink_handler)).with_state(sink.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind sink");
    let addr = listener.local_addr().expect("sink addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, sink)
}

/// A subscription pointed at the sink with HTTP-status confirmation.
pub fn subscription_for(id: SubscriptionId, form: &str, sink: SocketAddr, pattern: &str) -> Subscription {
    Subscription {
        subscription_id: id,
        owner_id: "o".to_string(),
        subscription_form: form.to_string(),
        callback_url: format!("http://{sink}/cb"),
        confirm_mode: ConfirmMode::HttpStatus,
        confirm_pattern: pattern.to_string(),
        timeout_seconds: 0,
    }
}

/// Poll `check` every 25 ms until it passes or `timeout` elapses.
pub async fn wait_until(timeout: std::time::Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
