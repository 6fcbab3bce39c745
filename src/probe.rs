use crate::config::ProbeConfig;
use crate::detection::{assess, missing_count, security_headers, ProbeObservation};
use crate::error::ProbeError;
use crate::models::domain::{Event, EventKind, GeoRecord, ProbeDetails, Severity};
use crate::monitor::Monitor;
use crate::now_ms;
use rand::{rng, Rng};
use reqwest::header::{HeaderMap, CONTENT_TYPE, SERVER};
use reqwest::redirect::Policy;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::{Host, Url};

pub const USER_AGENT: &str = "BearTrap-IDS/1.0";
pub const MAX_REDIRECTS: usize = 5;
/// Enough body to decide whether a response is "large".
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const UNRESOLVED_IP: &str = "0.0.0.0";

/// Target coordinates pulled out of a submitted URL.
#[derive(Debug, Clone)]
struct Target {
    url: Url,
    hostname: String,
    port: u16,
    tls: bool,
}

impl Target {
    fn parse(raw: &str) -> Result<Self, ProbeError> {
        let url = Url::parse(raw).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| ProbeError::InvalidUrl(format!("{raw} has no host")))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let tls = url.scheme() == "https";
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        Ok(Target { url, hostname, port, tls })
    }

    fn proto(&self) -> &'static str {
        if self.tls {
            "HTTPS"
        } else {
            "HTTP"
        }
    }

    /// Approximate size of the request line and headers we send.
    fn request_size(&self) -> u64 {
        let path = &self.url[url::Position::BeforePath..];
        format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\n\r\n",
            self.hostname
        )
        .len() as u64
    }
}

struct Fetched {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
    body_len: usize,
    elapsed_ms: u64,
}

fn header_or_unknown(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string()
}

/// Fallback event source: periodically fetches one submitted URL, rates the
/// response with the detection rules and publishes a synthetic event.
///
/// Runs only while monitoring is on and, unless configured otherwise, while
/// no EVE log is being followed.
pub struct Prober {
    client: reqwest::Client,
    monitor: Arc<Monitor>,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(monitor: Arc<Monitor>, config: ProbeConfig) -> Result<Self, ProbeError> {
        // Certificate checks are off so self-signed hosts can still be inspected.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Prober {
            client,
            monitor,
            config,
        })
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..jitter_ms)
        };
        self.config.interval + Duration::from_millis(extra)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "url prober running"
        );
        loop {
            let delay = self.next_delay();
            let changed = tokio::select! {
                _ = tokio::time::sleep(delay) => None,
                changed = shutdown.changed() => Some(changed),
            };
            if let Some(changed) = changed {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            self.tick().await;
        }
        debug!("url prober stopped");
    }

    /// One probe cycle. Returns the published event, if a probe ran.
    pub async fn tick(&self) -> Option<Event> {
        if !self.monitor.is_monitoring() {
            return None;
        }
        if !self.config.always && self.monitor.live_source() {
            return None;
        }
        let target = self.monitor.targets().next_target()?;

        let event = self.probe(&target.url).await;
        self.monitor.publish(&event);
        Some(event)
    }

    /// Probe one URL. Failures become a high-severity alert instead of being
    /// dropped.
    pub async fn probe(&self, raw_url: &str) -> Event {
        let target = match Target::parse(raw_url) {
            Ok(target) => target,
            Err(e) => return failure_event(raw_url, None, &e),
        };

        match self.fetch(&target).await {
            Ok(fetched) => {
                let event = self.observe(&target, fetched).await;
                info!(
                    url = %target.url,
                    status = event.probe.as_ref().map(|p| p.status_code),
                    bytes = event.bytes_out,
                    severity = %event.severity,
                    "probed url"
                );
                event
            }
            Err(e) => {
                warn!(url = %target.url, error = %e, "probe failed");
                failure_event(raw_url, Some(&target), &e)
            }
        }
    }

    async fn fetch(&self, target: &Target) -> Result<Fetched, ProbeError> {
        let started = Instant::now();
        let mut response = self.client.get(target.url.clone()).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let mut body = Vec::new();
        let mut body_len = 0;
        while let Some(chunk) = response.chunk().await? {
            body_len += chunk.len();
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_BODY_BYTES {
                break;
            }
        }

        Ok(Fetched {
            status,
            headers,
            body,
            body_len,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn observe(&self, target: &Target, fetched: Fetched) -> Event {
        let headers = security_headers(&fetched.headers);
        let missing = missing_count(&headers);
        let body = String::from_utf8_lossy(&fetched.body);

        let verdict = assess(&ProbeObservation {
            hostname: &target.hostname,
            status: fetched.status,
            response_time_ms: fetched.elapsed_ms,
            body: &body,
            body_len: fetched.body_len,
            missing_headers: missing,
        });

        // The event describes where the target is hosted, so the server
        // address stands in for both ends.
        let server_ip = resolve_host(target).await;
        let geo = if server_ip.is_unspecified() {
            GeoRecord::unknown()
        } else {
            self.monitor.geo().resolve(&server_ip.to_string()).await
        };

        let mut event = Event::new(
            now_ms(),
            verdict.kind,
            verdict.severity,
            server_ip.to_string(),
            server_ip.to_string(),
        );
        event.dest_port = target.port;
        event.proto = target.proto().to_string();
        event.bytes_in = target.request_size();
        event.bytes_out = fetched.body_len as u64;
        event.url = Some(target.url.to_string());
        event.hostname = Some(target.hostname.clone());
        event.method = Some("GET".to_string());
        event.alert_msg = verdict.message;
        event.geo = Some(geo);
        event.probe = Some(ProbeDetails {
            status_code: fetched.status,
            response_time_ms: fetched.elapsed_ms,
            server_type: header_or_unknown(&fetched.headers, SERVER.as_str()),
            powered_by: header_or_unknown(&fetched.headers, "x-powered-by"),
            content_type: header_or_unknown(&fetched.headers, CONTENT_TYPE.as_str()),
            security_headers: headers,
            missing_security_headers: missing,
            tls_secure: target.tls,
        });
        event
    }
}

/// Best-effort address of the target host, IPv4 preferred.
async fn resolve_host(target: &Target) -> IpAddr {
    let unresolved = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    match target.url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        Some(Host::Domain(domain)) => match tokio::net::lookup_host((domain, target.port)).await {
            Ok(addrs) => {
                let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                addrs
                    .iter()
                    .find(|ip| ip.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied()
                    .unwrap_or(unresolved)
            }
            Err(e) => {
                debug!(host = domain, error = %e, "dns resolution failed");
                unresolved
            }
        },
        None => unresolved,
    }
}

fn failure_event(raw_url: &str, target: Option<&Target>, error: &ProbeError) -> Event {
    let mut event = Event::new(
        now_ms(),
        EventKind::Alert,
        Severity::High,
        UNRESOLVED_IP,
        UNRESOLVED_IP,
    );
    event.url = Some(raw_url.to_string());
    event.method = Some("GET".to_string());
    event.alert_msg = Some(format!("Connection failed: {error}"));
    match target {
        Some(target) => {
            event.dest_port = target.port;
            event.proto = target.proto().to_string();
            event.hostname = Some(target.hostname.clone());
        }
        None => event.proto = "HTTP".to_string(),
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_defaults_ports_by_scheme() {
        let https = Target::parse("https://example.test/a?b=c").unwrap();
        assert_eq!(https.port, 443);
        assert!(https.tls);
        assert_eq!(https.proto(), "HTTPS");
        assert_eq!(https.hostname, "example.test");

        let plain = Target::parse("http://example.test:8080/").unwrap();
        assert_eq!(plain.port, 8080);
        assert!(!plain.tls);

        let v6 = Target::parse("http://[::1]:9000/").unwrap();
        assert_eq!(v6.hostname, "::1");
    }

    #[test]
    fn request_size_covers_path_and_headers() {
        let short = Target::parse("http://a.test/").unwrap();
        let long = Target::parse("http://a.test/a/much/longer/path?with=query").unwrap();
        assert!(long.request_size() > short.request_size());
        assert!(short.request_size() > USER_AGENT.len() as u64);
    }

    #[test]
    fn failure_event_is_high_alert() {
        let target = Target::parse("https://down.test/").unwrap();
        let event = failure_event("https://down.test/", Some(&target), &ProbeError::Timeout);

        assert_eq!(event.kind, EventKind::Alert);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.src_ip, UNRESOLVED_IP);
        assert_eq!(event.dest_port, 443);
        assert_eq!(event.proto, "HTTPS");
        assert_eq!(event.alert_msg.as_deref(), Some("Connection failed: request timed out"));
        assert!(event.is_attack());
    }

    #[tokio::test]
    async fn literal_hosts_resolve_without_dns() {
        let target = Target::parse("http://192.0.2.10/").unwrap();
        assert_eq!(resolve_host(&target).await, "192.0.2.10".parse::<IpAddr>().unwrap());
    }
}
