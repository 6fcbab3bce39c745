use crate::models::domain::Beacon;
use crate::models::dto::GeoErrorDTO;
use crate::monitor::Monitor;
use crate::now_ms;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

type AppState = Arc<Monitor>;

pub fn router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/stats", get(api_stats))
        .route("/api/top-ips", get(api_top_ips))
        .route("/api/events", get(api_events))
        .route("/api/suspicious", get(api_suspicious))
        .route("/api/geo", get(api_geo))
        .route("/api/submit-url", post(api_submit_url))
        .route("/api/submit-url/:id", delete(api_delete_url))
        .route("/api/submitted-urls", get(api_submitted_urls))
        .route("/api/remove-url", post(api_remove_url))
        .route("/api/monitoring-status", get(api_monitoring_status))
        .route("/api/start-monitoring", post(api_start_monitoring))
        .route("/api/stop-monitoring", post(api_stop_monitoring))
        .route("/api/clear-data", post(api_clear_data))
        .route("/api/track-visitor", post(api_track_visitor))
        .route("/api/track-event", post(api_track_event))
        .route("/tracking-beacon.js", get(beacon_script))
        .layer(middleware::from_fn(cors))
        .with_state(monitor)
}

/// Serve the dashboard API until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    monitor: Arc<Monitor>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    info!(%addr, "dashboard listening");
    axum::Server::try_bind(&addr)?
        .serve(router(monitor).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Browser extensions and beacon scripts call in from arbitrary origins.
async fn cors<B>(req: Request<B>, next: Next<B>) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

const INDEX_HTML: &str = r#"<html>
  <head><title>IDS Server</title></head>
  <body style="background:#071027;color:#cfeff3;font-family:Arial;padding:20px;">
    <h1>IDS Server</h1>
    <p>Server is running. Available endpoints:</p>
    <ul>
      <li><a href="/api/stats">/api/stats</a></li>
      <li><a href="/api/top-ips">/api/top-ips</a></li>
      <li><a href="/api/events">/api/events</a></li>
      <li><a href="/api/suspicious">/api/suspicious</a></li>
      <li><a href="/api/geo?ip=8.8.8.8">/api/geo?ip=8.8.8.8</a> (geo proxy)</li>
    </ul>
    <p>Live events: open a WebSocket to this address.</p>
  </body>
</html>"#;

async fn index(State(monitor): State<AppState>, ws: Option<WebSocketUpgrade>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| stream_events(socket, monitor)),
        None => Html(INDEX_HTML).into_response(),
    }
}

/// Push every published event to one websocket client until either side
/// goes away.
async fn stream_events(socket: WebSocket, monitor: Arc<Monitor>) {
    let mut subscription = monitor.subscribe();
    let id = subscription.id;
    let (mut sender, mut receiver) = socket.split();

    let welcome = json!({"type": "welcome", "ts": now_ms()}).to_string();
    if sender.send(Message::Text(welcome)).await.is_err() {
        monitor.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            message = subscription.rx.recv() => {
                let Some(message) = message else { break };
                if sender.send(Message::Text(message.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "websocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    monitor.unsubscribe(id);
}

async fn api_stats(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.stats_report())
}

async fn api_top_ips(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.top_ips())
}

async fn api_events(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.recent_events())
}

async fn api_suspicious(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.suspicious_events())
}

#[derive(Debug, Deserialize)]
struct GeoQuery {
    ip: Option<String>,
}

async fn api_geo(
    State(monitor): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<GeoQuery>,
) -> Response {
    let ip = query.ip.unwrap_or_else(|| peer.ip().to_string());
    match monitor.geo_lookup(&ip).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => Json(GeoErrorDTO {
            error: "geo-failed",
            ip,
            message: e.to_string(),
        })
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitUrlRequest {
    #[serde(default)]
    url: Option<String>,
}

async fn api_submit_url(
    State(monitor): State<AppState>,
    Json(body): Json<SubmitUrlRequest>,
) -> Response {
    let Some(url) = body.url else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid URL");
    };
    match monitor.submit_url(&url) {
        Ok(entry) => Json(json!({"success": true, "entry": entry})).into_response(),
        Err(e) => {
            warn!(url, error = %e, "rejected url submission");
            error_response(StatusCode::BAD_REQUEST, &format!("Invalid URL format: {e}"))
        }
    }
}

async fn api_submitted_urls(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.submitted_urls())
}

#[derive(Debug, Deserialize)]
struct RemoveUrlRequest {
    id: Value,
}

fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn remove_response(monitor: &Monitor, id: Option<u64>) -> Response {
    match id.and_then(|id| monitor.remove_url(id)) {
        Some(removed) => Json(json!({"success": true, "removed": removed})).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "URL not found"),
    }
}

async fn api_remove_url(
    State(monitor): State<AppState>,
    Json(body): Json<RemoveUrlRequest>,
) -> Response {
    remove_response(&monitor, parse_id(&body.id))
}

async fn api_delete_url(State(monitor): State<AppState>, Path(id): Path<String>) -> Response {
    remove_response(&monitor, id.parse().ok())
}

async fn api_monitoring_status(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(json!({"is_monitoring": monitor.is_monitoring()}))
}

async fn api_start_monitoring(State(monitor): State<AppState>) -> impl IntoResponse {
    monitor.start_monitoring();
    Json(json!({"success": true, "is_monitoring": monitor.is_monitoring()}))
}

async fn api_stop_monitoring(State(monitor): State<AppState>) -> impl IntoResponse {
    monitor.stop_monitoring();
    Json(json!({"success": true, "is_monitoring": monitor.is_monitoring()}))
}

async fn api_clear_data(State(monitor): State<AppState>) -> impl IntoResponse {
    monitor.clear_data();
    Json(json!({"success": true, "message": "All data cleared"}))
}

/// First hop of X-Forwarded-For, then X-Real-IP, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

async fn api_track_visitor(
    State(monitor): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(beacon): Json<Beacon>,
) -> impl IntoResponse {
    let ip = client_ip(&headers, peer);
    monitor.ingest_beacon(beacon, &ip).await;
    Json(json!({"success": true}))
}

#[derive(Debug, Deserialize)]
struct TrackedEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Page-level beacon events are only logged; they never enter the pipeline.
async fn api_track_event(Json(event): Json<TrackedEvent>) -> impl IntoResponse {
    info!(
        kind = event.kind.as_deref().unwrap_or("unknown"),
        url = event.url.as_deref().unwrap_or(""),
        "tracked page event"
    );
    Json(json!({"success": true}))
}

const BEACON_SCRIPT: &str = include_str!("../static/tracking-beacon.js");

async fn beacon_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        BEACON_SCRIPT,
    )
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
