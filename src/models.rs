pub mod domain {
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Info,
        Low,
        Medium,
        High,
    }

    impl Severity {
        /// One step less severe; `Info` stays `Info`.
        pub fn downgrade(self) -> Self {
            match self {
                Severity::High => Severity::Medium,
                Severity::Medium => Severity::Low,
                Severity::Low | Severity::Info => Severity::Info,
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Severity::High => "high",
                Severity::Medium => "medium",
                Severity::Low => "low",
                Severity::Info => "info",
            }
        }
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum EventKind {
        Alert,
        Http,
        Dns,
        Tls,
        Flow,
        TrafficProbe,
    }

    impl EventKind {
        pub fn as_str(self) -> &'static str {
            match self {
                EventKind::Alert => "alert",
                EventKind::Http => "http",
                EventKind::Dns => "dns",
                EventKind::Tls => "tls",
                EventKind::Flow => "flow",
                EventKind::TrafficProbe => "traffic-probe",
            }
        }
    }

    /// Geolocation of an address. Every field except the coordinates is
    /// optional because the short lookups used for enrichment only ask the
    /// provider for a subset.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct GeoRecord {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub ip: Option<String>,
        pub lat: f64,
        pub lon: f64,
        pub country: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub country_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub region: Option<String>,
        pub city: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub timezone: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub isp: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub org: Option<String>,
        #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
        pub asn: Option<String>,
    }

    impl GeoRecord {
        /// Placeholder returned when a lookup fails. Never cached.
        pub fn unknown() -> Self {
            GeoRecord {
                ip: None,
                lat: 0.0,
                lon: 0.0,
                country: "Unknown".to_string(),
                country_code: None,
                region: None,
                city: "Unknown".to_string(),
                timezone: None,
                isp: None,
                org: None,
                asn: None,
            }
        }

        pub fn is_unknown(&self) -> bool {
            self.country == "Unknown" && self.lat == 0.0 && self.lon == 0.0
        }
    }

    /// Fields only present on events synthesized by the prober.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ProbeDetails {
        pub status_code: u16,
        pub response_time_ms: u64,
        pub server_type: String,
        pub powered_by: String,
        pub content_type: String,
        /// Recommended header name -> value, or `None` when missing.
        pub security_headers: BTreeMap<String, Option<String>>,
        pub missing_security_headers: usize,
        pub tls_secure: bool,
    }

    /// Canonical event flowing through aggregation and broadcast.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Event {
        /// Epoch milliseconds.
        pub timestamp: i64,
        pub src_ip: String,
        pub dest_ip: String,
        pub dest_port: u16,
        pub proto: String,
        pub bytes_in: u64,
        pub bytes_out: u64,
        pub severity: Severity,
        pub kind: EventKind,
        pub url: Option<String>,
        pub hostname: Option<String>,
        pub method: Option<String>,
        pub alert_msg: Option<String>,
        pub geo: Option<GeoRecord>,
        pub user_agent: Option<String>,
        pub referrer: Option<String>,
        pub probe: Option<ProbeDetails>,
    }

    impl Event {
        /// A bare event with every optional field empty.
        pub fn new(
            timestamp: i64,
            kind: EventKind,
            severity: Severity,
            src_ip: impl Into<String>,
            dest_ip: impl Into<String>,
        ) -> Self {
            Event {
                timestamp,
                src_ip: src_ip.into(),
                dest_ip: dest_ip.into(),
                dest_port: 0,
                proto: "unknown".to_string(),
                bytes_in: 0,
                bytes_out: 0,
                severity,
                kind,
                url: None,
                hostname: None,
                method: None,
                alert_msg: None,
                geo: None,
                user_agent: None,
                referrer: None,
                probe: None,
            }
        }

        /// Alerts and anything rated medium or above count as attacks.
        pub fn is_attack(&self) -> bool {
            self.kind == EventKind::Alert
                || matches!(self.severity, Severity::High | Severity::Medium)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct TopIpEntry {
        pub count: u64,
        pub last_seen: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct SubmittedUrl {
        pub id: u64,
        pub url: String,
        /// Epoch milliseconds.
        pub timestamp: i64,
    }

    /// Payload posted by the tracking beacon embedded in monitored pages.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Beacon {
        #[serde(default)]
        pub url: String,
        #[serde(default)]
        pub hostname: Option<String>,
        #[serde(default)]
        pub user_agent: Option<String>,
        #[serde(default)]
        pub referrer: Option<String>,
    }
}

pub mod dto {
    use super::domain::{Event, GeoRecord};
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Clone)]
    pub struct SslInfo {
        pub protocol: &'static str,
        pub secure: bool,
        #[serde(rename = "hasCert")]
        pub has_cert: bool,
    }

    /// Wire shape of an event as pushed to subscribers and listed by the
    /// recent-events endpoint.
    #[derive(Debug, Serialize, Clone)]
    pub struct EventDTO {
        #[serde(rename = "type")]
        pub category: &'static str,
        pub event_type: &'static str,
        pub ts: i64,
        pub src: String,
        pub dst: String,
        pub port: u16,
        pub proto: String,
        pub bytes_in: u64,
        pub bytes_out: u64,
        pub severity: &'static str,
        pub url: Option<String>,
        pub hostname: Option<String>,
        pub method: Option<String>,
        pub alert_msg: Option<String>,
        pub geo: Option<GeoRecord>,
        pub count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub user_agent: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub referrer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub server_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub powered_by: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub content_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub security_headers: Option<BTreeMap<String, String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub missing_security_headers: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub ssl_info: Option<SslInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub server_location: Option<String>,
    }

    impl From<&Event> for EventDTO {
        fn from(event: &Event) -> Self {
            let probe = event.probe.as_ref();
            EventDTO {
                category: if event.is_attack() { "attack" } else { "traffic" },
                event_type: event.kind.as_str(),
                ts: event.timestamp,
                src: event.src_ip.clone(),
                dst: event.dest_ip.clone(),
                port: event.dest_port,
                proto: event.proto.clone(),
                bytes_in: event.bytes_in,
                bytes_out: event.bytes_out,
                severity: event.severity.as_str(),
                url: event.url.clone(),
                hostname: event.hostname.clone(),
                method: event.method.clone(),
                alert_msg: event.alert_msg.clone(),
                geo: event.geo.clone(),
                count: 1,
                user_agent: event.user_agent.clone(),
                referrer: event.referrer.clone(),
                status_code: probe.map(|p| p.status_code),
                response_time: probe.map(|p| p.response_time_ms),
                server_type: probe.map(|p| p.server_type.clone()),
                powered_by: probe.map(|p| p.powered_by.clone()),
                content_type: probe.map(|p| p.content_type.clone()),
                security_headers: probe.map(|p| {
                    p.security_headers
                        .iter()
                        .map(|(name, value)| {
                            (name.clone(), value.clone().unwrap_or_else(|| "Missing".into()))
                        })
                        .collect()
                }),
                missing_security_headers: probe.map(|p| p.missing_security_headers),
                ssl_info: probe.filter(|p| p.tls_secure).map(|_| SslInfo {
                    protocol: "TLS",
                    secure: true,
                    has_cert: true,
                }),
                server_location: probe.and(event.geo.as_ref()).map(|geo| {
                    format!("{}, {}", geo.city, geo.country)
                }),
            }
        }
    }

    #[derive(Debug, Serialize, Clone)]
    pub struct TopIpDTO {
        pub ip: String,
        pub count: u64,
        pub last: i64,
    }

    #[derive(Debug, Serialize, Clone)]
    pub struct StatsDTO {
        pub uptime_ms: u64,
        pub uptime: String,
        pub active: usize,
        pub active_attacks: usize,
        pub total_events: u64,
        pub total_attacks: u64,
        pub unique_ips: usize,
        pub bandwidth_in: u64,
        pub bandwidth_out: u64,
        pub bytes_total: u64,
        pub avg_bytes_per_attack: u64,
        pub protocol_counts: BTreeMap<String, u64>,
        pub port_counts: BTreeMap<u16, u64>,
        pub is_monitoring: bool,
    }

    #[derive(Debug, Serialize, Clone)]
    pub struct GeoErrorDTO {
        pub error: &'static str,
        pub ip: String,
        pub message: String,
    }
}
