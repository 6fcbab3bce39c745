#![allow(dead_code)]

use async_trait::async_trait;
use beartrap::config::{Config, GeoConfig};
use beartrap::error::GeoError;
use beartrap::geo::{GeoProvider, GeoResolver};
use beartrap::models::domain::GeoRecord;
use beartrap::monitor::Monitor;
use beartrap::tail::TailerState;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;

/// Answers every lookup with the same city, no network involved.
pub struct StaticGeo;

#[async_trait]
impl GeoProvider for StaticGeo {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord, GeoError> {
        Ok(GeoRecord {
            ip: Some(ip.to_string()),
            country: "Canada".into(),
            country_code: Some("CA".into()),
            city: "Montreal".into(),
            lat: 45.5,
            lon: -73.57,
            ..GeoRecord::unknown()
        })
    }
}

pub fn test_monitor() -> (Arc<Monitor>, watch::Sender<TailerState>) {
    let (state_tx, state_rx) = watch::channel(TailerState::Idle);
    let geo = GeoResolver::new(Arc::new(StaticGeo), &GeoConfig::default());
    let monitor = Monitor::new(
        &Config::default(),
        geo,
        Arc::new(AtomicBool::new(true)),
        state_rx,
    );
    (Arc::new(monitor), state_tx)
}

/// Serve `app` on an ephemeral local port.
pub fn spawn_app(app: axum::Router) -> SocketAddr {
    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}
