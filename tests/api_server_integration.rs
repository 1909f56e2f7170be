mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{shared_emitter, TestEnv, SHORT_TIMEOUT};
use donut_profiles_lib::api_server::{build_router, ApiServerState};
use donut_profiles_lib::events::{self, names};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use serial_test::serial;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

fn invoke_request(command: &str, body: Value, token: Option<&str>) -> Request<Body> {
  let mut builder = Request::builder()
    .method("POST")
    .uri(format!("/v1/invoke/{command}"))
    .header("content-type", "application/json");
  if let Some(token) = token {
    builder = builder.header("Authorization", format!("Bearer {token}"));
  }
  builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
#[serial]
async fn invoke_returns_result_or_error() {
  let _env = TestEnv::new();
  let app = build_router(ApiServerState::default(), None);

  let response = app
    .clone()
    .oneshot(invoke_request(
      "create_profile_group",
      json!({ "name": "Api" }),
      None,
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = body_json(response).await;
  assert_eq!(body["result"]["name"], "Api");

  let response = app
    .clone()
    .oneshot(invoke_request(
      "create_profile_group",
      json!({ "name": "api" }),
      None,
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let body = body_json(response).await;
  assert!(body["error"].as_str().unwrap().starts_with("Failed to create group"));

  let response = app
    .clone()
    .oneshot(invoke_request("no_such_command", json!({}), None))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);

  // An empty body counts as no arguments
  let response = app
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/v1/invoke/get_profile_groups")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(body_json(response).await["result"].as_array().unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn bearer_token_guards_v1_routes() {
  let _env = TestEnv::new();
  let app = build_router(
    ApiServerState {
      api_token: Some("secret".to_string()),
    },
    None,
  );

  let response = app
    .clone()
    .oneshot(invoke_request("get_stored_proxies", json!({}), None))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

  let response = app
    .clone()
    .oneshot(invoke_request("get_stored_proxies", json!({}), Some("wrong")))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

  let response = app
    .clone()
    .oneshot(invoke_request("get_stored_proxies", json!({}), Some("secret")))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  // The schema stays public
  let response = app
    .oneshot(
      Request::builder()
        .uri("/openapi.json")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let doc = body_json(response).await;
  assert!(doc["paths"]["/v1/invoke/{command}"].is_object());
}

#[tokio::test]
#[serial]
async fn commands_endpoint_lists_the_surface() {
  let app = build_router(ApiServerState::default(), None);
  let response = app
    .oneshot(
      Request::builder()
        .uri("/v1/commands")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let body = body_json(response).await;
  let commands: Vec<&str> = body["commands"]
    .as_array()
    .unwrap()
    .iter()
    .filter_map(Value::as_str)
    .collect();
  for expected in [
    "list_browser_profiles",
    "download_browser",
    "check_proxy_validity",
    "get_traffic_stats_for_period",
    "assign_profiles_to_group",
  ] {
    assert!(commands.contains(&expected), "missing {expected}");
  }
}

#[tokio::test]
#[serial]
async fn websocket_forwards_emitted_events() {
  let _env = TestEnv::new();
  let emitter = shared_emitter();
  let app = build_router(ApiServerState::default(), Some(emitter));

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let server = tokio::spawn(async move {
    let _ = axum::serve(listener, app).await;
  });

  let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/events"))
    .await
    .unwrap();

  let next_json = |msg: Message| -> Value {
    match msg {
      Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
      other => panic!("unexpected frame: {other:?}"),
    }
  };

  let greeting = tokio::time::timeout(SHORT_TIMEOUT, socket.next())
    .await
    .unwrap()
    .unwrap()
    .unwrap();
  assert_eq!(next_json(greeting)["type"], "connected");

  socket
    .send(Message::Text(r#"{"type":"ping"}"#.into()))
    .await
    .unwrap();
  let pong = tokio::time::timeout(SHORT_TIMEOUT, socket.next())
    .await
    .unwrap()
    .unwrap()
    .unwrap();
  assert_eq!(next_json(pong)["type"], "pong");

  events::emit(names::URL_OPEN_REQUEST, json!({ "url": "https://example.com" })).unwrap();
  let event = tokio::time::timeout(SHORT_TIMEOUT, socket.next())
    .await
    .unwrap()
    .unwrap()
    .unwrap();
  let event = next_json(event);
  assert_eq!(event["type"], "event");
  assert_eq!(event["event"], names::URL_OPEN_REQUEST);
  assert_eq!(event["payload"]["url"], "https://example.com");

  server.abort();
}
