// Suricata EVE records -> canonical events.
//
// Raw lines are loosely typed JSON. They are first mapped into a closed
// tagged union so every recognised shape is handled exhaustively, then
// flattened into an `Event`. Nothing here performs I/O.

use crate::models::domain::{Event, EventKind, Severity};
use chrono::DateTime;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Alert(AlertRecord),
    Http(HttpRecord),
    Dns(DnsRecord),
    Tls(TlsRecord),
    Flow,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertRecord {
    pub severity: Option<i64>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRecord {
    pub hostname: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DnsRecord {
    pub rrname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TlsRecord {
    pub sni: Option<String>,
}

/// Fields shared by every EVE record type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub timestamp: Option<i64>,
    pub src_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub dest_port: Option<u16>,
    pub proto: Option<String>,
    pub bytes_toserver: Option<u64>,
    pub bytes_toclient: Option<u64>,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn section<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| v.is_object())
}

/// Suricata writes `+0000` offsets, which RFC 3339 does not accept.
pub fn parse_timestamp(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .or_else(|_| DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.timestamp_millis())
}

impl Envelope {
    pub fn from_value(value: &Value) -> Self {
        let flow = section(value, "flow");
        Envelope {
            timestamp: value
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            src_ip: str_field(value, "src_ip"),
            dest_ip: str_field(value, "dest_ip"),
            dest_port: value
                .get("dest_port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok()),
            proto: str_field(value, "proto"),
            bytes_toserver: flow.and_then(|f| f.get("bytes_toserver")).and_then(Value::as_u64),
            bytes_toclient: flow.and_then(|f| f.get("bytes_toclient")).and_then(Value::as_u64),
        }
    }
}

impl RawRecord {
    pub fn from_value(value: &Value) -> Self {
        let Some(event_type) = value.get("event_type").and_then(Value::as_str) else {
            return RawRecord::Unknown;
        };

        match event_type {
            "alert" => RawRecord::Alert(
                section(value, "alert")
                    .map(|a| AlertRecord {
                        severity: a.get("severity").and_then(Value::as_i64),
                        signature: str_field(a, "signature"),
                    })
                    .unwrap_or_default(),
            ),
            "http" => RawRecord::Http(
                section(value, "http")
                    .map(|h| HttpRecord {
                        hostname: str_field(h, "hostname"),
                        url: str_field(h, "url"),
                        method: str_field(h, "http_method"),
                    })
                    .unwrap_or_default(),
            ),
            "dns" => RawRecord::Dns(DnsRecord {
                rrname: section(value, "dns").and_then(|d| str_field(d, "rrname")),
            }),
            "tls" => RawRecord::Tls(TlsRecord {
                sni: section(value, "tls").and_then(|t| str_field(t, "sni")),
            }),
            "flow" => RawRecord::Flow,
            _ => RawRecord::Unknown,
        }
    }
}

pub fn alert_severity(level: Option<i64>) -> Severity {
    match level {
        Some(1) => Severity::High,
        Some(2) => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Map a raw EVE record to an event, or `None` for record types we do not
/// track. `received_at` (epoch ms) stands in for a missing or unreadable
/// timestamp.
pub fn normalize(raw: &Value, received_at: i64) -> Option<Event> {
    let record = RawRecord::from_value(raw);
    let envelope = Envelope::from_value(raw);

    let (kind, severity) = match &record {
        RawRecord::Alert(alert) => (EventKind::Alert, alert_severity(alert.severity)),
        RawRecord::Http(_) => (EventKind::Http, Severity::Info),
        RawRecord::Dns(_) => (EventKind::Dns, Severity::Info),
        RawRecord::Tls(_) => (EventKind::Tls, Severity::Info),
        RawRecord::Flow => (EventKind::Flow, Severity::Info),
        RawRecord::Unknown => return None,
    };

    let mut event = Event::new(
        envelope.timestamp.unwrap_or(received_at),
        kind,
        severity,
        envelope.src_ip.unwrap_or_else(|| "unknown".to_string()),
        envelope.dest_ip.unwrap_or_else(|| "unknown".to_string()),
    );
    event.dest_port = envelope.dest_port.unwrap_or(0);
    if let Some(proto) = envelope.proto {
        event.proto = proto;
    }
    event.bytes_in = envelope.bytes_toserver.unwrap_or(0);
    event.bytes_out = envelope.bytes_toclient.unwrap_or(0);

    match record {
        RawRecord::Alert(alert) => {
            event.alert_msg = alert.signature;
        }
        RawRecord::Http(http) => {
            event.method = Some(http.method.unwrap_or_else(|| "GET".to_string()));
            event.url = match (&http.hostname, http.url) {
                (Some(host), Some(path)) => {
                    let scheme = if event.dest_port == 443 { "https" } else { "http" };
                    Some(format!("{scheme}://{host}{path}"))
                }
                (_, path) => path,
            };
            event.hostname = http.hostname;
        }
        RawRecord::Dns(dns) => event.hostname = dns.rrname,
        RawRecord::Tls(tls) => event.hostname = tls.sni,
        RawRecord::Flow | RawRecord::Unknown => {}
    }

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn severity_of(raw: Value) -> Option<Severity> {
        normalize(&raw, NOW).map(|e| e.severity)
    }

    #[test]
    fn alert_severity_levels() {
        let alert = |level: Value| json!({"event_type": "alert", "alert": {"severity": level}});

        assert_eq!(severity_of(alert(json!(1))), Some(Severity::High));
        assert_eq!(severity_of(alert(json!(2))), Some(Severity::Medium));
        assert_eq!(severity_of(alert(json!(3))), Some(Severity::Low));
        assert_eq!(severity_of(alert(json!("1"))), Some(Severity::Low));
        assert_eq!(
            severity_of(json!({"event_type": "alert"})),
            Some(Severity::Low)
        );
    }

    #[test]
    fn non_alert_kinds_are_informational() {
        for kind in ["http", "dns", "tls", "flow"] {
            assert_eq!(
                severity_of(json!({"event_type": kind})),
                Some(Severity::Info),
                "{kind}"
            );
        }
    }

    #[test]
    fn unrecognised_kinds_are_dropped() {
        assert_eq!(normalize(&json!({"event_type": "stats"}), NOW), None);
        assert_eq!(normalize(&json!({"event_type": "fileinfo"}), NOW), None);
        assert_eq!(normalize(&json!({"src_ip": "10.0.0.1"}), NOW), None);
        assert_eq!(normalize(&json!({"event_type": 7}), NOW), None);
    }

    #[test]
    fn alert_record() {
        let raw = json!({
            "timestamp": "2024-03-01T10:00:00.500000+0000",
            "event_type": "alert",
            "src_ip": "203.0.113.9",
            "dest_ip": "10.0.0.5",
            "dest_port": 22,
            "proto": "TCP",
            "alert": {"severity": 1, "signature": "ET SCAN SSH brute force"},
            "flow": {"bytes_toserver": 1200, "bytes_toclient": 300}
        });
        let event = normalize(&raw, NOW).unwrap();

        assert_eq!(event.timestamp, 1_709_287_200_500);
        assert_eq!(event.kind, EventKind::Alert);
        assert_eq!(event.src_ip, "203.0.113.9");
        assert_eq!(event.dest_ip, "10.0.0.5");
        assert_eq!(event.dest_port, 22);
        assert_eq!(event.proto, "TCP");
        assert_eq!(event.bytes_in, 1200);
        assert_eq!(event.bytes_out, 300);
        assert_eq!(event.alert_msg.as_deref(), Some("ET SCAN SSH brute force"));
        assert!(event.is_attack());
    }

    #[test]
    fn http_url_scheme_follows_port() {
        let http = |port: u16| {
            json!({
                "event_type": "http",
                "dest_port": port,
                "http": {"hostname": "example.com", "url": "/login?x=1", "http_method": "POST"}
            })
        };

        let secure = normalize(&http(443), NOW).unwrap();
        assert_eq!(secure.url.as_deref(), Some("https://example.com/login?x=1"));
        assert_eq!(secure.method.as_deref(), Some("POST"));
        assert_eq!(secure.hostname.as_deref(), Some("example.com"));

        let plain = normalize(&http(8080), NOW).unwrap();
        assert_eq!(plain.url.as_deref(), Some("http://example.com/login?x=1"));
    }

    #[test]
    fn http_without_hostname_keeps_path() {
        let raw = json!({"event_type": "http", "http": {"url": "/index.html"}});
        let event = normalize(&raw, NOW).unwrap();

        assert_eq!(event.url.as_deref(), Some("/index.html"));
        assert_eq!(event.method.as_deref(), Some("GET"));
        assert_eq!(event.hostname, None);
    }

    #[test]
    fn dns_and_tls_hostnames() {
        let dns = normalize(&json!({"event_type": "dns", "dns": {"rrname": "evil.test"}}), NOW).unwrap();
        assert_eq!(dns.hostname.as_deref(), Some("evil.test"));

        let tls = normalize(&json!({"event_type": "tls", "tls": {"sni": "bank.test"}}), NOW).unwrap();
        assert_eq!(tls.hostname.as_deref(), Some("bank.test"));
    }

    #[test]
    fn missing_fields_fall_back() {
        let event = normalize(&json!({"event_type": "flow", "timestamp": "yesterday"}), NOW).unwrap();

        assert_eq!(event.timestamp, NOW);
        assert_eq!(event.src_ip, "unknown");
        assert_eq!(event.dest_ip, "unknown");
        assert_eq!(event.dest_port, 0);
        assert_eq!(event.proto, "unknown");
        assert_eq!(event.bytes_in, 0);
        assert_eq!(event.bytes_out, 0);
    }

    #[test]
    fn rfc3339_timestamps() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_timestamp("1970-01-01T01:00:01+01:00"), Some(1000));
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
