//! Integration tests for the liveness endpoint.
//!
//! Each test spins up the Axum app on a random port and probes it over
//! real HTTP with reqwest.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;

use mailgram::http::uptime_routes;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start the app on a random port, return the port.
async fn start_server() -> u16 {
    let app = uptime_routes();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    port
}

#[tokio::test]
async fn uptime_probe_answers_ok() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/api/uptime"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "OK");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn probe_is_repeatable() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        for _ in 0..3 {
            let response = reqwest::get(format!("http://127.0.0.1:{port}/api/uptime"))
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/api/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn probe_rejects_post() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/uptime"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    })
    .await
    .expect("test timed out");
}
