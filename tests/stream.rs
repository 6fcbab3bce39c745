mod common;

use beartrap::dashboard;
use beartrap::models::domain::{Event, EventKind, Severity};
use beartrap::now_ms;
use common::{spawn_app, test_monitor};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
        .unwrap();
    serde_json::from_str(&message.into_text().unwrap()).unwrap()
}

#[tokio::test]
async fn websocket_gets_welcome_then_published_events() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor.clone()));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .expect("ws connect failed");

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["ts"].as_i64().unwrap() > 0);

    let mut event = Event::new(now_ms(), EventKind::Alert, Severity::High, "203.0.113.9", "10.0.0.5");
    event.dest_port = 22;
    event.proto = "TCP".into();
    event.alert_msg = Some("ET SCAN ssh brute force".into());
    assert!(monitor.publish(&event));

    let pushed = next_json(&mut socket).await;
    assert_eq!(pushed["type"], "attack");
    assert_eq!(pushed["event_type"], "alert");
    assert_eq!(pushed["src"], "203.0.113.9");
    assert_eq!(pushed["port"], 22);
    assert_eq!(pushed["severity"], "high");
    assert_eq!(pushed["alert_msg"], "ET SCAN ssh brute force");

    drop(socket);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.publish(&event));
}

#[tokio::test]
async fn admin_endpoints_drive_the_monitor() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor.clone()));
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let index = client.get(format!("{base}/")).send().await.unwrap();
    assert!(index.text().await.unwrap().contains("IDS Server"));

    let rejected = client
        .post(format!("{base}/api/submit-url"))
        .json(&json!({"url": "ftp://example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);

    let submitted: Value = client
        .post(format!("{base}/api/submit-url"))
        .json(&json!({"url": "https://example.com/login"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(submitted["success"], true);
    let id = submitted["entry"]["id"].as_u64().unwrap();

    let listed: Value = client
        .get(format!("{base}/api/submitted-urls"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["url"], "https://example.com/login");

    let removed = client
        .post(format!("{base}/api/remove-url"))
        .json(&json!({"id": id.to_string()}))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 200);
    let missing = client
        .delete(format!("{base}/api/submit-url/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let stopped: Value = client
        .post(format!("{base}/api/stop-monitoring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["is_monitoring"], false);
    assert!(!monitor.is_monitoring());

    let status: Value = client
        .get(format!("{base}/api/monitoring-status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["is_monitoring"], false);

    client
        .post(format!("{base}/api/start-monitoring"))
        .send()
        .await
        .unwrap();
    assert!(monitor.is_monitoring());
}

#[tokio::test]
async fn visitor_beacon_uses_forwarded_address() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor.clone()));
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/track-visitor"))
        .header("x-forwarded-for", "198.51.100.77, 10.0.0.1")
        .json(&json!({"url": "https://shop.test/cart", "userAgent": "Mozilla/5.0"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );

    let top: Value = client
        .get(format!("http://{addr}/api/top-ips"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(top[0]["ip"], "198.51.100.77");
    assert_eq!(top[0]["count"], 1);

    let events: Value = client
        .get(format!("http://{addr}/api/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(events[0]["event_type"], "traffic-probe");
    assert_eq!(events[0]["geo"]["city"], "Montreal");

    client.post(format!("http://{addr}/api/clear-data")).send().await.unwrap();
    let stats: Value = client
        .get(format!("http://{addr}/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_events"], 0);
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor));

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/api/submit-url"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, POST, DELETE, OPTIONS"
    );
}

#[tokio::test]
async fn geo_endpoint_proxies_lookup() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor));

    let geo: Value = reqwest::get(format!("http://{addr}/api/geo?ip=8.8.8.8"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(geo["ip"], "8.8.8.8");
    assert_eq!(geo["country"], "Canada");
}

#[tokio::test]
async fn beacon_script_and_page_events_are_served() {
    let (monitor, _state) = test_monitor();
    let addr = spawn_app(dashboard::router(monitor.clone()));
    let client = reqwest::Client::new();

    let script = client
        .get(format!("http://{addr}/tracking-beacon.js"))
        .send()
        .await
        .unwrap();
    assert_eq!(script.status(), 200);
    assert_eq!(
        script.headers()["content-type"],
        "application/javascript"
    );
    assert!(script.text().await.unwrap().contains("/api/track-visitor"));

    let tracked: Value = client
        .post(format!("http://{addr}/api/track-event"))
        .json(&json!({"type": "pageview", "url": "https://shop.test/"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tracked["success"], true);
    assert_eq!(monitor.stats_report().total_events, 0);
}
