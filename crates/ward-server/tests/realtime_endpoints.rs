use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use ward_core::RetryPolicy;
use ward_server::{AppConfig, AppState, TableClient, build_app};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    http: String,
    ws: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn start_server(storage: &MockServer) -> TestServer {
    let mut cfg = AppConfig::default();
    cfg.storage.url = storage.uri();
    cfg.retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 5,
        max_delay_ms: 10,
        jitter_ms: 0,
    };
    let client = TableClient::with_client(reqwest::Client::new(), &storage.uri(), "test-key");
    let app = build_app(AppState::new(cfg, client));

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}"),
        shutdown: tx,
        handle,
    }
}

async fn mock_token(storage: &MockServer, token: &str, status: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("access_token", format!("eq.{token}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "a-1", "status": status}])),
        )
        .mount(storage)
        .await;
}

async fn mock_admission(storage: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("id", "eq.a-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"access_token": "tok-1", "room_number": "301"}])),
        )
        .mount(storage)
        .await;
}

/// Connect and wait until the server has registered the socket.
async fn connect(server: &TestServer, token: &str, expected_total: u64) -> Socket {
    let (socket, _) = connect_async(format!("{}/ws/{token}", server.ws))
        .await
        .expect("websocket connect");

    let client = reqwest::Client::new();
    for _ in 0..100 {
        let body: Value = client
            .get(format!("{}/readyz", server.http))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["connections"].as_u64() == Some(expected_total) {
            return socket;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket for {token} was never registered");
}

async fn next_envelope(socket: &mut Socket) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for broadcast")
        .expect("socket closed")
        .expect("socket error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("envelope json"),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn vital_reaches_station_and_guardian() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/vital_signs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 17,
            "admission_id": "a-1",
            "temperature": 38.4,
        }])))
        .expect(1)
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/vitals", server.http))
        .json(&json!({"admission_id": "a-1", "temperature": 38.4}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    let stored: Value = resp.json().await.unwrap();
    assert_eq!(stored["id"], 17);

    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "NEW_VITAL");
        assert_eq!(envelope["data"]["id"], 17);
        assert_eq!(envelope["data"]["room"], "301");
    }

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn document_request_reaches_station_only() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/document_requests"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 3,
            "admission_id": "a-1",
            "request_items": ["RECEIPT"],
            "created_at": "2025-03-02T09:00:00Z",
        }])))
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/documents/requests", server.http))
        .json(&json!({"admission_id": "a-1", "request_items": ["RECEIPT"]}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let envelope = next_envelope(&mut station).await;
    assert_eq!(envelope["type"], "NEW_DOC_REQUEST");
    assert_eq!(envelope["data"]["room"], "301");
    assert_eq!(envelope["data"]["request_items"], json!(["RECEIPT"]));

    let nothing = tokio::time::timeout(Duration::from_millis(200), guardian.next()).await;
    assert!(nothing.is_err(), "guardian should not be told about document requests");

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn unknown_and_discharged_tokens_are_refused() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-old", "DISCHARGED").await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("access_token", "eq.bogus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;

    for token in ["bogus", "tok-old"] {
        match connect_async(format!("{}/ws/{token}", server.ws)).await {
            Err(WsError::Http(resp)) => assert_eq!(resp.status(), 403),
            Err(other) => panic!("unexpected error for {token}: {other:?}"),
            Ok(_) => panic!("upgrade for {token} should be refused"),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn storage_outage_during_token_check_is_503() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;

    match connect_async(format!("{}/ws/tok-1", server.ws)).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 503),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("upgrade should fail while storage is down"),
    }

    server.stop().await;
}

#[tokio::test]
async fn deleting_missing_exam_schedule_is_404() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/exam_schedules"))
        .and(query_param("id", "eq.42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;

    let resp = reqwest::Client::new()
        .delete(format!("{}/api/v1/exam-schedules/42", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Schedule not found");

    server.stop().await;
}

#[tokio::test]
async fn transfer_into_occupied_room_is_rejected() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("room_number", "eq.302"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a-9"}])))
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/admissions/a-1/transfer", server.http))
        .json(&json!({"target_room": "302"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Room 302 is currently occupied.");

    server.stop().await;
}

#[tokio::test]
async fn transfer_notifies_station_and_guardian() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("room_number", "eq.302"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&storage)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("id", "eq.a-1"))
        .and(body_partial_json(json!({"room_number": "302"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "a-1", "room_number": "302"}])),
        )
        .expect(1)
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/admissions/a-1/transfer", server.http))
        .json(&json!({"target_room": "302"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "ADMISSION_TRANSFERRED");
        assert_eq!(
            envelope["data"],
            json!({"admission_id": "a-1", "old_room": "301", "new_room": "302"})
        );
    }

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn discharge_notifies_station_and_guardian() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/admissions"))
        .and(query_param("id", "eq.a-1"))
        .and(body_partial_json(json!({"status": "DISCHARGED"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "a-1", "status": "DISCHARGED"}])),
        )
        .expect(1)
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/admissions/a-1/discharge", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "ADMISSION_DISCHARGED");
        assert_eq!(envelope["data"]["admission_id"], "a-1");
        assert_eq!(envelope["data"]["room"], "301");
    }

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn exam_schedule_create_and_delete_reach_guardian() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/exam_schedules"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 8,
            "admission_id": "a-1",
            "exam_type": "X-RAY",
        }])))
        .expect(1)
        .mount(&storage)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/exam_schedules"))
        .and(query_param("id", "eq.8"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": 8, "admission_id": "a-1"}])),
        )
        .mount(&storage)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/exam_schedules"))
        .and(query_param("id", "eq.8"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/exam-schedules", server.http))
        .json(&json!({"admission_id": "a-1", "exam_type": "X-RAY"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "NEW_EXAM_SCHEDULE");
        assert_eq!(envelope["data"]["id"], 8);
        assert_eq!(envelope["data"]["room"], "301");
    }

    let resp = client
        .delete(format!("{}/api/v1/exam-schedules/8", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "DELETE_EXAM_SCHEDULE");
        assert_eq!(
            envelope["data"],
            json!({"id": 8, "admission_id": "a-1", "room": "301"})
        );
    }

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn meal_request_falls_back_when_requested_columns_are_missing() {
    let storage = MockServer::start().await;
    mock_token(&storage, "tok-1", "IN_PROGRESS").await;
    mock_admission(&storage).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/meal_requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&storage)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/meal_requests"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "PGRST204",
            "message": "Could not find the 'requested_guardian_meal_type' column",
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&storage)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/meal_requests"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 5,
            "admission_id": "a-1",
            "meal_date": "2025-03-02",
            "meal_time": "LUNCH",
            "status": "PENDING",
        }])))
        .mount(&storage)
        .await;

    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;
    let mut guardian = connect(&server, "tok-1", 2).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/meals/requests", server.http))
        .json(&json!({
            "admission_id": "a-1",
            "meal_date": "2025-03-02",
            "meal_time": "LUNCH",
            "request_type": "GUARDIAN_REQUEST",
            "pediatric_meal_type": "SOFT",
            "guardian_meal_type": "GENERAL",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let stored: Value = resp.json().await.unwrap();
    assert_eq!(stored["id"], 5);

    let posts: Vec<Value> = storage
        .received_requests()
        .await
        .expect("recording enabled")
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/meal_requests")
        .map(|r| r.body_json::<Value>().expect("json body"))
        .collect();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["requested_pediatric_meal_type"], "SOFT");
    assert!(posts[1].get("requested_pediatric_meal_type").is_none());
    assert!(posts[1].get("requested_guardian_meal_type").is_none());

    for socket in [&mut station, &mut guardian] {
        let envelope = next_envelope(socket).await;
        assert_eq!(envelope["type"], "NEW_MEAL_REQUEST");
        assert_eq!(envelope["data"]["id"], 5);
        assert_eq!(envelope["data"]["room"], "301");
    }

    drop(station);
    drop(guardian);
    server.stop().await;
}

#[tokio::test]
async fn malformed_requests_get_detail_body() {
    let storage = MockServer::start().await;
    let server = start_server(&storage).await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(format!("{}/api/v1/exam-schedules/abc", server.http))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.expect("json error body");
    assert!(body["detail"].as_str().is_some_and(|d| d.contains("abc")));

    let resp = client
        .post(format!("{}/api/v1/vitals", server.http))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.expect("json error body");
    assert!(body["detail"].is_string());

    let resp = client
        .post(format!("{}/api/v1/admissions/a-1/transfer", server.http))
        .json(&json!({"room": "302"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.expect("json error body");
    assert!(body["detail"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn ping_gets_a_single_pong() {
    let storage = MockServer::start().await;
    let server = start_server(&storage).await;
    let mut station = connect(&server, "STATION", 1).await;

    station
        .send(Message::Ping(vec![7u8, 7, 7].into()))
        .await
        .expect("send ping");

    let reply = tokio::time::timeout(Duration::from_secs(5), station.next())
        .await
        .expect("timed out waiting for pong")
        .expect("socket closed")
        .expect("socket error");
    assert!(matches!(reply, Message::Pong(_)), "unexpected frame: {reply:?}");

    let extra = tokio::time::timeout(Duration::from_millis(300), station.next()).await;
    assert!(extra.is_err(), "server answered one ping twice");

    drop(station);
    server.stop().await;
}

#[tokio::test]
async fn health_endpoints_work() {
    let storage = MockServer::start().await;
    let server = start_server(&storage).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/", server.http))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["service"], "Ward Realtime Server");

    let body: Value = client
        .get(format!("{}/healthz", server.http))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    let body: Value = client
        .get(format!("{}/readyz", server.http))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["connections"], 0);

    server.stop().await;
}
