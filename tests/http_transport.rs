//! HTTP transport integration tests against an in-process JSON-RPC server.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use evidence_bridge::transport::{HttpTransport, Transport};
use evidence_bridge::types::{Error, ErrorKind};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn respond(request: &Value, id: Value) -> Value {
    let method = request["method"].as_str().unwrap_or_default();
    let result = if method == "initialize" {
        json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "mock-tracker", "version": "0.1.0" },
            "capabilities": { "tools": {} }
        })
    } else {
        json!({ "method": method, "params": request["params"] })
    };
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

async fn echo(Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    Json(respond(&request, id))
}

async fn failing(Json(request): Json<Value>) -> (StatusCode, Json<Value>) {
    if request["method"] == "initialize" {
        return (StatusCode::OK, Json(respond(&request, request["id"].clone())));
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "down" })))
}

async fn garbage(Json(request): Json<Value>) -> (StatusCode, String) {
    if request["method"] == "initialize" {
        return (StatusCode::OK, respond(&request, request["id"].clone()).to_string());
    }
    (StatusCode::OK, "<html>not json-rpc</html>".to_string())
}

async fn slow(Json(request): Json<Value>) -> Json<Value> {
    if request["method"] != "initialize" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let id = request["id"].clone();
    Json(respond(&request, id))
}

async fn wrong_id(Json(request): Json<Value>) -> Json<Value> {
    if request["method"] == "initialize" {
        return Json(respond(&request, request["id"].clone()));
    }
    let id = request["id"].as_u64().unwrap_or(0) + 1000;
    Json(respond(&request, json!(id)))
}

async fn rpc_error(Json(request): Json<Value>) -> Json<Value> {
    if request["method"] == "initialize" {
        return Json(respond(&request, request["id"].clone()));
    }
    Json(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": { "code": -32601, "message": "method not found" }
    }))
}

/// Spin up the mock server on a random port.
async fn start_mock_server() -> SocketAddr {
    let app = Router::new()
        .route("/rpc", post(echo))
        .route("/failing", post(failing))
        .route("/garbage", post(garbage))
        .route("/slow", post(slow))
        .route("/wrong-id", post(wrong_id))
        .route("/rpc-error", post(rpc_error));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn transport(addr: SocketAddr, path: &str) -> HttpTransport {
    HttpTransport::new(
        "tracker",
        format!("http://{}{}", addr, path),
        reqwest::Client::new(),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_handshake_and_call() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/rpc");

    let err = t
        .call("issues.search", json!({}), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportClosed { .. }));

    let info = t.open().await.unwrap();
    assert_eq!(info.server_name.as_deref(), Some("mock-tracker"));

    let result = t
        .call("issues.search", json!({ "jql": "project = SEC" }), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result["params"]["jql"], "project = SEC");

    t.close().await;
    assert!(!t.is_open());
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_results() {
    let addr = start_mock_server().await;
    let t = Arc::new(transport(addr, "/rpc"));
    t.open().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let t = t.clone();
        tasks.push(tokio::spawn(async move {
            let result = t
                .call("issues.get", json!({ "n": i }), Duration::from_secs(5))
                .await
                .unwrap();
            (i, result)
        }));
    }
    for task in tasks {
        let (i, result) = task.await.unwrap();
        assert_eq!(result["params"]["n"], json!(i));
    }
}

#[tokio::test]
async fn test_non_2xx_is_protocol_error() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/failing");
    t.open().await.unwrap();
    let err = t
        .call("issues.search", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_malformed_body_is_protocol_error() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/garbage");
    t.open().await.unwrap();
    let err = t
        .call("issues.search", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_mismatched_id_is_protocol_error() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/wrong-id");
    t.open().await.unwrap();
    let err = t
        .call("issues.search", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_rpc_error_object_is_protocol_error() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/rpc-error");
    t.open().await.unwrap();
    let err = t
        .call("issues.delete", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("-32601"));
}

#[tokio::test]
async fn test_deadline_is_timeout() {
    let addr = start_mock_server().await;
    let t = transport(addr, "/slow");
    t.open().await.unwrap();
    let err = t
        .call("issues.search", json!({}), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_connection_refused_is_transport_closed() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let t = transport(addr, "/rpc");
    let err = t.open().await.unwrap_err();
    assert!(
        matches!(err, Error::TransportClosed { .. }),
        "unexpected error: {}",
        err
    );
    assert!(!t.is_open());
}
