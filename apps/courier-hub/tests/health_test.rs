mod common;

use axum_test::TestServer;
use courier_hub::gateway::session::Session;

#[tokio::test]
async fn health_reports_ok_and_session_count() {
    let (app, _state) = common::test_app(common::test_config());
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/health").await;
    resp.assert_status_ok();

    let body = resp.json::<serde_json::Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn health_counts_live_sessions() {
    let (app, state) = common::test_app(common::test_config());
    let server = TestServer::new(app).unwrap();

    let (first, _first_rx) = Session::new(4);
    let (second, _second_rx) = Session::new(4);
    let first_id = first.id().to_string();
    state.hub.register(first).await;
    state.hub.register(second).await;
    common::wait_for_sessions(&state, 2).await;

    let body = server.get("/health").await.json::<serde_json::Value>();
    assert_eq!(body["sessions"], 2);

    state.hub.deregister(&first_id).await;
    common::wait_for_sessions(&state, 1).await;
    let body = server.get("/health").await.json::<serde_json::Value>();
    assert_eq!(body["sessions"], 1);
}

#[tokio::test]
async fn ws_route_requires_upgrade() {
    let (app, _state) = common::test_app(common::test_config());
    let server = TestServer::new(app).unwrap();

    // A plain GET on the socket path is not a WebSocket handshake.
    let resp = server.get("/courier/ws").expect_failure().await;
    assert!(resp.status_code().is_client_error());
}
