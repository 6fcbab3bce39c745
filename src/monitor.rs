use crate::broadcast::{Broadcaster, Subscription};
use crate::config::Config;
use crate::detection::is_suspicious_url;
use crate::error::{GeoError, ValidationError};
use crate::geo::GeoResolver;
use crate::history::{EventHistory, RECENT_LIMIT};
use crate::models::domain::{Beacon, Event, EventKind, GeoRecord, Severity, SubmittedUrl};
use crate::models::dto::{EventDTO, StatsDTO, TopIpDTO};
use crate::now_ms;
use crate::parser::normalize;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::tail::TailerState;
use crate::targets::UrlRegistry;
use futures::{future, stream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub const SUBMITTED_URL_LIMIT: usize = 20;

/// Shared pipeline state and the control surface the dashboard drives.
///
/// Every producer funnels finished events through [`Monitor::publish`], which
/// records them in the aggregator and history before pushing them to
/// subscribers. Nothing outside this type touches the counters.
pub struct Monitor {
    monitoring: Arc<AtomicBool>,
    stats: StatsAggregator,
    history: EventHistory,
    broadcaster: Broadcaster,
    geo: GeoResolver,
    targets: UrlRegistry,
    tailer_state: watch::Receiver<TailerState>,
    started_at: Instant,
    enrich_concurrency: usize,
}

impl Monitor {
    pub fn new(
        config: &Config,
        geo: GeoResolver,
        monitoring: Arc<AtomicBool>,
        tailer_state: watch::Receiver<TailerState>,
    ) -> Self {
        Monitor {
            monitoring,
            stats: StatsAggregator::new(),
            history: EventHistory::default(),
            broadcaster: Broadcaster::new(config.subscriber_queue),
            geo,
            targets: UrlRegistry::default(),
            tailer_state,
            started_at: Instant::now(),
            enrich_concurrency: config.enrich_concurrency.max(1),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn start_monitoring(&self) {
        if !self.monitoring.swap(true, Ordering::SeqCst) {
            info!("monitoring started");
        }
    }

    /// In-flight work may still land; nothing new is started.
    pub fn stop_monitoring(&self) {
        if self.monitoring.swap(false, Ordering::SeqCst) {
            info!("monitoring stopped");
        }
    }

    /// Whether the EVE log is currently being followed.
    pub fn live_source(&self) -> bool {
        self.tailer_state.borrow().is_live()
    }

    pub fn clear_data(&self) {
        self.stats.reset();
        self.history.clear();
        self.geo.clear_cache();
        info!("all data cleared");
    }

    pub fn submit_url(&self, url: &str) -> Result<SubmittedUrl, ValidationError> {
        let entry = self.targets.submit(url, now_ms())?;
        info!(url = %entry.url, id = entry.id, "url submitted for monitoring");
        Ok(entry)
    }

    pub fn remove_url(&self, id: u64) -> Option<SubmittedUrl> {
        let removed = self.targets.remove(id)?;
        info!(url = %removed.url, id, "url removed from monitoring");
        Some(removed)
    }

    pub fn submitted_urls(&self) -> Vec<SubmittedUrl> {
        self.targets.list(SUBMITTED_URL_LIMIT)
    }

    pub fn targets(&self) -> &UrlRegistry {
        &self.targets
    }

    pub fn geo(&self) -> &GeoResolver {
        &self.geo
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.broadcaster.unsubscribe(id);
    }

    /// Record and push one finished event. Dropped while monitoring is off.
    pub fn publish(&self, event: &Event) -> bool {
        if !self.is_monitoring() {
            debug!(src = %event.src_ip, "monitoring off, event dropped");
            return false;
        }
        self.stats.record(event, now_ms());
        self.history.store_event(event);
        self.broadcaster.send(event);
        true
    }

    /// Attach geolocation of the event's source, then publish.
    pub async fn enrich_and_publish(&self, mut event: Event) -> Event {
        event.geo = Some(self.geo.resolve(&event.src_ip).await);
        self.publish(&event);
        event
    }

    /// Consume raw EVE records. Up to `enrich_concurrency` events are
    /// enriched at once and published in the order their lookups finish;
    /// consumers order by `ts`. Returns once the channel is closed and every
    /// started event has been published.
    pub async fn process_events(self: Arc<Self>, records: mpsc::Receiver<Value>) {
        let monitor = &*self;
        stream::unfold(records, |mut rx| async move {
            rx.recv().await.map(|raw| (raw, rx))
        })
        .filter_map(|raw| {
            let event = if monitor.is_monitoring() {
                normalize(&raw, now_ms())
            } else {
                None
            };
            future::ready(event)
        })
        .for_each_concurrent(self.enrich_concurrency, |event| async move {
            monitor.enrich_and_publish(event).await;
        })
        .await;
        debug!("record channel closed");
    }

    /// Fold a tracking-beacon report into the pipeline.
    pub async fn ingest_beacon(&self, beacon: Beacon, client_ip: &str) -> Event {
        let bytes_in = serde_json::to_vec(&beacon).map(|b| b.len() as u64).unwrap_or(0);

        let mut event = Event::new(
            now_ms(),
            EventKind::TrafficProbe,
            Severity::Info,
            client_ip,
            "0.0.0.0",
        );
        event.dest_port = 443;
        event.proto = "HTTPS".to_string();
        event.bytes_in = bytes_in;
        event.method = Some("GET".to_string());
        event.hostname = beacon.hostname;
        event.user_agent = beacon.user_agent;
        event.referrer = beacon.referrer;

        if is_suspicious_url(&beacon.url) {
            event.kind = EventKind::Alert;
            event.severity = Severity::High;
            event.alert_msg = Some("Suspicious URL pattern in visitor request".to_string());
        }
        event.url = Some(beacon.url);

        self.enrich_and_publish(event).await
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(now_ms())
    }

    pub fn stats_report(&self) -> StatsDTO {
        let snap = self.snapshot();
        let uptime_ms = self.started_at.elapsed().as_millis() as u64;

        StatsDTO {
            uptime_ms,
            uptime: format!("{}s", (uptime_ms as f64 / 1000.0).round() as u64),
            active: snap.active_attacks,
            active_attacks: snap.active_attacks,
            total_events: snap.total_events,
            total_attacks: snap.total_attacks,
            unique_ips: snap.unique_ips,
            bandwidth_in: snap.bandwidth_in,
            bandwidth_out: snap.bandwidth_out,
            bytes_total: snap.bytes_total,
            avg_bytes_per_attack: snap.avg_bytes_per_attack(),
            protocol_counts: snap.protocol_counts,
            port_counts: snap.port_counts,
            is_monitoring: self.is_monitoring(),
        }
    }

    pub fn top_ips(&self) -> Vec<TopIpDTO> {
        self.snapshot()
            .top_ips
            .into_iter()
            .map(|t| TopIpDTO {
                ip: t.ip,
                count: t.count,
                last: t.last_seen,
            })
            .collect()
    }

    pub fn recent_events(&self) -> Vec<EventDTO> {
        self.history
            .recent(RECENT_LIMIT)
            .iter()
            .map(EventDTO::from)
            .collect()
    }

    /// Attacks only, newest first.
    pub fn suspicious_events(&self) -> Vec<EventDTO> {
        self.history
            .suspicious_events()
            .iter()
            .map(EventDTO::from)
            .collect()
    }

    pub async fn geo_lookup(&self, ip: &str) -> Result<GeoRecord, GeoError> {
        self.geo.lookup(ip).await
    }
}
