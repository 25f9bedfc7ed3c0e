//! Integration test: start the bridge on a free port with an unreachable
//! gateway and exercise the HTTP boundary. Local commands must work without
//! any gateway; forwarded messages must surface a clean 500.

use lib::config::BridgeConfig;
use lib::server;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_bridge() -> String {
    let port = free_port();
    let device_dir = tempfile::tempdir().expect("tempdir");

    let mut config = BridgeConfig::default();
    config.http.port = port;
    config.http.bind = "127.0.0.1".to_string();
    // nothing listens here: every forwarded message must fail cleanly
    config.gateway.url = format!("ws://127.0.0.1:{}", free_port());
    config.device_key_path = Some(device_dir.path().join("device-key.json"));
    let _leak = Box::leak(Box::new(device_dir));

    tokio::spawn(async move {
        let _ = server::run_bridge(config).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if client
            .request(reqwest::Method::OPTIONS, format!("{}/message", base))
            .send()
            .await
            .is_ok()
        {
            return base;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("bridge did not start listening on {}", base);
}

#[tokio::test]
async fn help_is_answered_locally_without_a_gateway() {
    let base = start_bridge().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/message", base))
        .json(&serde_json::json!({ "text": "/help", "userId": "U1" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    let text = body["text"].as_str().expect("text");
    for cmd in ["/help", "/new", "/clear", "/status", "/model", "/models"] {
        assert!(text.contains(cmd), "help missing {}", cmd);
    }
    assert!(body.get("channelData").is_some());
}

#[tokio::test]
async fn new_and_clear_bump_the_epoch_locally() {
    let base = start_bridge().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/message", base))
        .json(&serde_json::json!({ "text": "/new", "userId": "U1" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert!(body["text"].as_str().unwrap().contains("epoch 1"));

    let resp = client
        .post(format!("{}/message", base))
        .json(&serde_json::json!({ "text": "/clear", "userId": "U1" }))
        .send()
        .await
        .expect("send");
    let body: serde_json::Value = resp.json().await.expect("json");
    assert!(body["text"].as_str().unwrap().contains("epoch 2"));
}

#[tokio::test]
async fn forwarded_message_with_unreachable_gateway_is_a_500() {
    let base = start_bridge().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/message", base))
        .json(&serde_json::json!({ "text": "hello", "userId": "U1" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.expect("json");
    let error = body["error"].as_str().expect("error field");
    assert!(!error.is_empty());
}

#[tokio::test]
async fn http_error_statuses() {
    let base = start_bridge().await;
    let client = reqwest::Client::new();

    // invalid JSON
    let resp = client
        .post(format!("{}/message", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "Invalid JSON");

    // unknown path
    let resp = client
        .post(format!("{}/nope", base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 404);

    // non-POST on a known path
    let resp = client
        .get(format!("{}/message", base))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 405);

    // CORS preflight
    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/message", base))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 204);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn root_path_is_an_alias_for_message() {
    let base = start_bridge().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(&base)
        .json(&serde_json::json!({ "text": "/help", "userId": "U1" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 200);
}
