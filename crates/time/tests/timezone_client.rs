use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use ppsclock_time::{TimezoneDbClient, TimezoneLookup, TzLookupError};
use tokio::sync::oneshot;

#[derive(Clone)]
struct MockTzState {
    status: StatusCode,
    body: Arc<String>,
    delay: Duration,
    queries: Arc<RwLock<Vec<HashMap<String, String>>>>,
}

struct MockTzServer {
    address: String,
    queries: Arc<RwLock<Vec<HashMap<String, String>>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockTzServer {
    async fn start(status: StatusCode, body: &str) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO).await
    }

    async fn start_with_delay(status: StatusCode, body: &str, delay: Duration) -> Self {
        let queries = Arc::new(RwLock::new(Vec::new()));
        let state = MockTzState {
            status,
            body: Arc::new(body.to_string()),
            delay,
            queries: queries.clone(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock timezone listener");
        let addr = listener.local_addr().expect("listener addr lookup");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = Router::new()
            .route("/v2.1/get-time-zone", get(get_time_zone))
            .with_state(state);

        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            let graceful = server.with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = graceful.await;
        });

        Self {
            address: format!("http://{addr}/v2.1/get-time-zone"),
            queries,
            shutdown: Some(shutdown_tx),
        }
    }

    fn client(&self, timeout: Duration) -> TimezoneDbClient {
        TimezoneDbClient::new(&self.address, "test-key", timeout).expect("valid client")
    }

    fn queries(&self) -> Vec<HashMap<String, String>> {
        self.queries.read().clone()
    }
}

impl Drop for MockTzServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn get_time_zone(
    State(state): State<MockTzState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.queries.write().push(query);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, state.body.as_str().to_owned())
}

#[tokio::test]
async fn successful_lookup_parses_parameters_and_sends_query() {
    let server = MockTzServer::start(
        StatusCode::OK,
        r#"{"status":"OK","message":"","countryCode":"US","zoneName":"America/New_York","abbreviation":"EST","gmtOffset":-18000,"dst":"0","zoneStart":1699164000,"zoneEnd":1710054000,"nextAbbreviation":"EDT","timestamp":1709290000}"#,
    )
    .await;

    let client = server.client(Duration::from_secs(5));
    let params = tokio_test::assert_ok!(client.lookup(40.7128, -74.006).await);

    assert_eq!(params.offset_seconds(), -18_000);
    assert!(params.has_dst);
    assert!(!params.is_dst);
    assert_eq!(params.valid_until.map(|t| t.timestamp()), Some(1_710_054_000));

    let queries = server.queries();
    assert_eq!(queries.len(), 1);
    let query = &queries[0];
    assert_eq!(query.get("key").map(String::as_str), Some("test-key"));
    assert_eq!(query.get("format").map(String::as_str), Some("json"));
    assert_eq!(query.get("by").map(String::as_str), Some("position"));
    assert_eq!(query.get("lat").map(String::as_str), Some("40.7128"));
    assert_eq!(query.get("lng").map(String::as_str), Some("-74.006"));
}

#[tokio::test]
async fn non_success_status_is_a_failure() {
    let server = MockTzServer::start(StatusCode::SERVICE_UNAVAILABLE, "busy").await;
    let err = server
        .client(Duration::from_secs(5))
        .lookup(0.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TzLookupError::Status { status: 503 }));
}

#[tokio::test]
async fn unparsable_body_is_malformed() {
    let server = MockTzServer::start(StatusCode::OK, "{\"gmtOffset\": \"soon\"}").await;
    let err = server
        .client(Duration::from_secs(5))
        .lookup(0.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TzLookupError::Malformed(_)));
}

#[tokio::test]
async fn service_level_failure_is_rejected() {
    let server = MockTzServer::start(
        StatusCode::OK,
        r#"{"status":"FAILED","message":"Invalid API key.","gmtOffset":0}"#,
    )
    .await;
    let err = server
        .client(Duration::from_secs(5))
        .lookup(0.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TzLookupError::Rejected { .. }));
}

#[tokio::test]
async fn slow_server_times_out_as_transport_failure() {
    let server = MockTzServer::start_with_delay(
        StatusCode::OK,
        r#"{"gmtOffset":0}"#,
        Duration::from_secs(2),
    )
    .await;
    let err = server
        .client(Duration::from_millis(200))
        .lookup(0.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TzLookupError::Transport(_)));
}

#[tokio::test]
async fn unreachable_server_is_transport_failure() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("allocate ephemeral port")
        .local_addr()
        .expect("extract ephemeral addr")
        .port();
    let client = TimezoneDbClient::new(
        &format!("http://127.0.0.1:{port}/v2.1/get-time-zone"),
        "test-key",
        Duration::from_secs(2),
    )
    .expect("valid client");
    let err = client.lookup(0.0, 0.0).await.unwrap_err();
    assert!(matches!(err, TzLookupError::Transport(_)));
}

#[test]
fn invalid_url_is_rejected_up_front() {
    let err = TimezoneDbClient::new("not a url", "key", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, TzLookupError::InvalidUrl(_)));
}
