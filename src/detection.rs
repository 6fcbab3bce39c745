use crate::models::domain::{EventKind, Severity};
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;

/// Headers a well-configured site is expected to send.
pub const SECURITY_HEADERS: [&str; 5] = [
    "Content-Security-Policy",
    "X-Frame-Options",
    "X-Content-Type-Options",
    "Strict-Transport-Security",
    "X-XSS-Protection",
];

const SUSPICIOUS_BODY_PATTERNS: [&str; 6] = [
    "javascript:",
    "<script",
    "eval(",
    "document.cookie",
    "onerror=",
    "onload=",
];

const SUSPICIOUS_URL_PATTERNS: [&str; 7] =
    ["script", "eval", "exec", "alert", "<", ">", "javascript:"];

pub const LARGE_RESPONSE_BYTES: usize = 1_000_000;
pub const SLOW_RESPONSE_MS: u64 = 3_000;

/// What one probe saw, reduced to the inputs the rules need.
#[derive(Debug, Clone)]
pub struct ProbeObservation<'a> {
    pub hostname: &'a str,
    pub status: u16,
    pub response_time_ms: u64,
    pub body: &'a str,
    pub body_len: usize,
    pub missing_headers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub severity: Severity,
    pub kind: EventKind,
    pub message: Option<String>,
}

impl Verdict {
    fn clean() -> Self {
        Verdict {
            severity: Severity::Info,
            kind: EventKind::Http,
            message: None,
        }
    }

    fn alert(severity: Severity, message: String) -> Self {
        Verdict {
            severity,
            kind: EventKind::Alert,
            message: Some(message),
        }
    }
}

/// Recommended security headers as found on a response: name -> value,
/// `None` when absent. Lookup is case-insensitive.
pub fn security_headers(headers: &HeaderMap) -> BTreeMap<String, Option<String>> {
    SECURITY_HEADERS
        .iter()
        .map(|name| {
            let value = headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (name.to_string(), value)
        })
        .collect()
}

pub fn missing_count(headers: &BTreeMap<String, Option<String>>) -> usize {
    headers.values().filter(|v| v.is_none()).count()
}

pub fn has_suspicious_content(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    SUSPICIOUS_BODY_PATTERNS.iter().any(|p| body.contains(p))
}

/// Script-like tokens in a URL reported by the tracking beacon.
pub fn is_suspicious_url(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    SUSPICIOUS_URL_PATTERNS.iter().any(|p| url.contains(p))
}

/// Run the threat rules against a probe response. The first matching rule
/// wins; header hygiene then moves the result one step either way.
pub fn assess(obs: &ProbeObservation<'_>) -> Verdict {
    let verdict = detect_suspicious_content(obs)
        .or_else(|| detect_error_status(obs))
        .or_else(|| detect_large_response(obs))
        .or_else(|| detect_slow_response(obs))
        .unwrap_or_else(Verdict::clean);

    apply_header_score(verdict, obs)
}

fn detect_suspicious_content(obs: &ProbeObservation<'_>) -> Option<Verdict> {
    has_suspicious_content(obs.body).then(|| {
        Verdict::alert(
            Severity::High,
            format!(
                "Suspicious JavaScript patterns detected in response from {}",
                obs.hostname
            ),
        )
    })
}

fn detect_error_status(obs: &ProbeObservation<'_>) -> Option<Verdict> {
    match obs.status {
        400..=499 => Some(Verdict::alert(
            Severity::Medium,
            format!("HTTP {} error from {}", obs.status, obs.hostname),
        )),
        500.. => Some(Verdict::alert(
            Severity::High,
            format!("Server error ({}) from {}", obs.status, obs.hostname),
        )),
        _ => None,
    }
}

fn detect_large_response(obs: &ProbeObservation<'_>) -> Option<Verdict> {
    (obs.body_len > LARGE_RESPONSE_BYTES).then(|| {
        Verdict::alert(
            Severity::Medium,
            format!(
                "Unusually large response ({}KB) from {}",
                (obs.body_len as f64 / 1024.0).round() as u64,
                obs.hostname
            ),
        )
    })
}

fn detect_slow_response(obs: &ProbeObservation<'_>) -> Option<Verdict> {
    (obs.response_time_ms > SLOW_RESPONSE_MS).then(|| Verdict {
        severity: Severity::Low,
        kind: EventKind::Http,
        message: Some(format!(
            "Slow response time ({}ms) from {}",
            obs.response_time_ms, obs.hostname
        )),
    })
}

fn apply_header_score(mut verdict: Verdict, obs: &ProbeObservation<'_>) -> Verdict {
    if obs.missing_headers == 0 && verdict.severity != Severity::Info {
        verdict.severity = verdict.severity.downgrade();
        if let Some(message) = verdict.message.as_mut() {
            message.push_str(" (Security headers: Excellent)");
        }
    } else if obs.missing_headers >= 4 && verdict.severity == Severity::Info {
        verdict.severity = Severity::Low;
        verdict.message = Some(format!(
            "Missing {}/{} security headers on {}",
            obs.missing_headers,
            SECURITY_HEADERS.len(),
            obs.hostname
        ));
    }
    verdict
}
