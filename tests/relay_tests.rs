//! Integration tests for the relay against a mock upstream API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use httpmock::prelude::*;
use serde_json::json;
use tower::ServiceExt;

use chat_relay::config::Config;
use chat_relay::server::chat_api::{build_router, AppState};
use chat_relay::upstream::client::{CompletionRequest, StreamEvent, UpstreamClient};

fn config_for(server: &MockServer) -> Arc<Config> {
    Arc::new(Config {
        api_key: Some("test-key".to_string()),
        base_url: server.base_url(),
        ..Config::default()
    })
}

fn app_for(server: &MockServer) -> axum::Router {
    let config = config_for(server);
    let upstream = UpstreamClient::from_config(&config);
    build_router(Arc::new(AppState { upstream, config }))
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn collect_events(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_buffered_chat_success() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "图是一种数据结构"}}]
                }));
        })
        .await;

    let app = app_for(&server);
    let response = app
        .oneshot(post_json("/api/chat", json!({"message": "什么是图？"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["response"], "图是一种数据结构");

    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_buffered_chat_retries_then_fails() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).body("upstream exploded");
        })
        .await;

    let app = app_for(&server);
    let response = app
        .oneshot(post_json("/api/chat", json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["success"], false);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("API call failed"), "got: {error}");

    // First attempt plus two retries.
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn test_empty_message_makes_no_upstream_call() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        })
        .await;

    let app = app_for(&server);
    let response = app
        .oneshot(post_json("/api/chat", json!({"message": "  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_streaming_client_maps_chunks_one_to_one() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{}}]}\n\n",
                    "data: [DONE]\n\n",
                ));
        })
        .await;

    let config = config_for(&server);
    let client = UpstreamClient::from_config(&config).unwrap();
    let rx = client.complete_streaming(CompletionRequest::streaming("hi", None));
    let events = collect_events(rx).await;

    // Empty and content-less deltas are dropped, not forwarded.
    assert_eq!(
        events,
        vec![
            StreamEvent::Content { text: "He".to_string() },
            StreamEvent::Content { text: "llo".to_string() },
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_streaming_client_surfaces_rejection_as_terminal_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body("invalid api key");
        })
        .await;

    let config = config_for(&server);
    let client = UpstreamClient::from_config(&config).unwrap();
    let rx = client.complete_streaming(CompletionRequest::streaming("hi", None));
    let events = collect_events(rx).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error { message } => {
            assert!(message.contains("401"), "got: {message}");
            assert!(message.contains("invalid api key"), "got: {message}");
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_streaming_client_stops_after_malformed_chunk() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
                    "data: {not json}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n\n",
                ));
        })
        .await;

    let config = config_for(&server);
    let client = UpstreamClient::from_config(&config).unwrap();
    let rx = client.complete_streaming(CompletionRequest::streaming("hi", None));
    let events = collect_events(rx).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::Content { text: "ok".to_string() });
    assert!(matches!(events[1], StreamEvent::Error { .. }));
}

#[tokio::test]
async fn test_stream_endpoint_frames_and_terminates() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"图\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"论\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ));
        })
        .await;

    let app = app_for(&server);
    let response = app
        .oneshot(post_json(
            "/api/chat/stream",
            json!({"message": "什么是图？", "system_prompt": "用一句话回答"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert_eq!(response.headers().get(header::CONNECTION).unwrap(), "close");

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let frames: Vec<serde_json::Value> = body
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let data = chunk.trim().strip_prefix("data: ").expect("sse data frame");
            serde_json::from_str(data).unwrap()
        })
        .collect();

    // Two content frames, the adapter's Done, the handler's trailing done.
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0], json!({"content": "图", "done": false}));
    assert_eq!(frames[1], json!({"content": "论", "done": false}));
    assert_eq!(frames[2], json!({"done": true}));
    assert_eq!(frames[3], json!({"done": true}));
}

#[tokio::test]
async fn test_stream_endpoint_forwards_midstream_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                    "data: {broken\n\n",
                ));
        })
        .await;

    let app = app_for(&server);
    let response = app
        .oneshot(post_json("/api/chat/stream", json!({"message": "hi"})))
        .await
        .unwrap();

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let frames: Vec<serde_json::Value> = body
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let data = chunk.trim().strip_prefix("data: ").expect("sse data frame");
            serde_json::from_str(data).unwrap()
        })
        .collect();

    // Content, terminal error, trailing done; no content after the error.
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["content"], "a");
    assert_eq!(frames[1]["done"], true);
    assert!(frames[1]["error"].is_string());
    assert_eq!(frames[2], json!({"done": true}));
}
