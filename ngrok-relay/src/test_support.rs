//! Shared helpers for tests: mock status API and webhook receiver.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::PollPolicy;
use crate::notify::NotificationPayload;

/// Bodies received by a mock webhook.
pub type Received = Arc<Mutex<Vec<NotificationPayload>>>;

/// Serve `app` on an ephemeral localhost port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A localhost port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Status API that always answers with `body`.
pub fn status_router(body: serde_json::Value) -> Router {
    Router::new().route(
        "/api/tunnels",
        get(move || {
            let body = body.clone();
            async move { Json(body) }
        }),
    )
}

/// Webhook that records JSON bodies and answers with `status`.
///
/// The `Json` extractor rejects requests without `Content-Type: application/json`.
pub fn webhook_receiver(status: StatusCode) -> (Router, Received) {
    let received = Received::default();
    let app = Router::new()
        .route(
            "/api/webhooks/{id}/{token}",
            post(
                move |State(received): State<Received>, Json(payload): Json<NotificationPayload>| async move {
                    received.lock().unwrap().push(payload);
                    status
                },
            ),
        )
        .with_state(received.clone());
    (app, received)
}

/// Polling policy with no warm-up and short backoffs.
pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        warmup: Duration::ZERO,
        request_timeout: Duration::from_secs(1),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        max_attempts: 10,
        total_timeout: Duration::from_secs(5),
    }
}
