use crate::models::domain::{Event, Severity, TopIpEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Attacks younger than this are "active".
pub const ACTIVE_WINDOW_MS: i64 = 60_000;
pub const TOP_IP_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
struct WindowEntry {
    ts: i64,
    src: String,
    severity: Severity,
}

#[derive(Debug, Default)]
struct NetworkStats {
    total_events: u64,
    total_attacks: u64,
    bandwidth_in: u64,
    bandwidth_out: u64,
    bytes_total: u64,
    protocol_counts: HashMap<String, u64>,
    port_counts: HashMap<u16, u64>,
    top_ips: HashMap<String, TopIpEntry>,
    recent_attacks: Vec<WindowEntry>,
    /// Newest timestamp recorded so far, capped at the caller's clock; the
    /// window is pruned against it on every append.
    high_water: Option<i64>,
}

impl NetworkStats {
    fn update(&mut self, event: &Event, now: i64) {
        self.total_events = self.total_events.saturating_add(1);
        self.bandwidth_in = self.bandwidth_in.saturating_add(event.bytes_in);
        self.bandwidth_out = self.bandwidth_out.saturating_add(event.bytes_out);
        self.bytes_total = self
            .bytes_total
            .saturating_add(event.bytes_in)
            .saturating_add(event.bytes_out);

        if event.is_attack() {
            self.total_attacks = self.total_attacks.saturating_add(1);
            self.recent_attacks.push(WindowEntry {
                ts: event.timestamp,
                src: event.src_ip.clone(),
                severity: event.severity,
            });
        }

        // Future-dated records must not drag the cutoff past wall-clock time.
        let high_water = self
            .high_water
            .map_or(event.timestamp, |hw| hw.max(event.timestamp))
            .min(now);
        self.high_water = Some(high_water);
        self.prune(high_water);

        let entry = self.top_ips.entry(event.src_ip.clone()).or_insert(TopIpEntry {
            count: 0,
            last_seen: event.timestamp,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = entry.last_seen.max(event.timestamp);

        let proto = self.protocol_counts.entry(event.proto.clone()).or_insert(0);
        *proto = proto.saturating_add(1);
        let port = self.port_counts.entry(event.dest_port).or_insert(0);
        *port = port.saturating_add(1);
    }

    fn prune(&mut self, now: i64) {
        self.recent_attacks.retain(|a| now - a.ts < ACTIVE_WINDOW_MS);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopIp {
    pub ip: String,
    pub count: u64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAttack {
    pub ts: i64,
    pub src: String,
    pub severity: Severity,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub total_events: u64,
    pub total_attacks: u64,
    pub active_attacks: usize,
    pub bandwidth_in: u64,
    pub bandwidth_out: u64,
    pub bytes_total: u64,
    pub unique_ips: usize,
    pub top_ips: Vec<TopIp>,
    pub recent_attacks: Vec<ActiveAttack>,
    pub protocol_counts: BTreeMap<String, u64>,
    pub port_counts: BTreeMap<u16, u64>,
}

impl StatsSnapshot {
    pub fn avg_bytes_per_attack(&self) -> u64 {
        if self.total_attacks == 0 {
            0
        } else {
            (self.bytes_total as f64 / self.total_attacks as f64).round() as u64
        }
    }
}

/// Sole owner of the running counters. Producers go through `record` and
/// readers through `snapshot`; one lock covers all state.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<NetworkStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkStats> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold one event in. `now` (epoch ms) bounds how far the active window
    /// may be pruned.
    pub fn record(&self, event: &Event, now: i64) {
        self.lock().update(event, now);
    }

    /// Prune the active-attack window against `now` (epoch ms) and copy out
    /// every counter. Top IPs are ranked by count, then most recent sighting.
    pub fn snapshot(&self, now: i64) -> StatsSnapshot {
        let mut stats = self.lock();
        stats.prune(now);

        let mut top_ips: Vec<TopIp> = stats
            .top_ips
            .iter()
            .map(|(ip, entry)| TopIp {
                ip: ip.clone(),
                count: entry.count,
                last_seen: entry.last_seen,
            })
            .collect();
        top_ips.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.ip.cmp(&b.ip))
        });
        top_ips.truncate(TOP_IP_LIMIT);

        let mut recent_attacks: Vec<ActiveAttack> = stats
            .recent_attacks
            .iter()
            .map(|a| ActiveAttack {
                ts: a.ts,
                src: a.src.clone(),
                severity: a.severity,
            })
            .collect();
        recent_attacks.sort_by(|a, b| b.ts.cmp(&a.ts));

        StatsSnapshot {
            total_events: stats.total_events,
            total_attacks: stats.total_attacks,
            active_attacks: stats.recent_attacks.len(),
            bandwidth_in: stats.bandwidth_in,
            bandwidth_out: stats.bandwidth_out,
            bytes_total: stats.bytes_total,
            unique_ips: stats.top_ips.len(),
            top_ips,
            recent_attacks,
            protocol_counts: stats.protocol_counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            port_counts: stats.port_counts.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    pub fn reset(&self) {
        *self.lock() = NetworkStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::EventKind;
    use pretty_assertions::assert_eq;

    const ORIGIN: i64 = 1_700_000_000_000;
    /// Wall clock well past every test timestamp.
    const NOW: i64 = ORIGIN + 86_400_000;

    fn attack(ts: i64, src: &str) -> Event {
        let mut event = Event::new(ts, EventKind::Alert, Severity::High, src, "10.0.0.1");
        event.proto = "TCP".into();
        event.dest_port = 22;
        event
    }

    fn traffic(ts: i64, src: &str) -> Event {
        let mut event = Event::new(ts, EventKind::Flow, Severity::Info, src, "10.0.0.1");
        event.proto = "UDP".into();
        event.dest_port = 53;
        event.bytes_in = 100;
        event.bytes_out = 50;
        event
    }

    #[test]
    fn active_window_drops_entries_older_than_sixty_seconds() {
        let stats = StatsAggregator::new();
        stats.record(&attack(ORIGIN, "1.1.1.1"), NOW);
        stats.record(&attack(ORIGIN + 30_000, "2.2.2.2"), NOW);
        stats.record(&attack(ORIGIN + 61_000, "3.3.3.3"), NOW);

        let snap = stats.snapshot(ORIGIN + 61_000);
        assert_eq!(snap.active_attacks, 2);
        assert_eq!(snap.total_attacks, 3);
        assert_eq!(
            snap.recent_attacks.iter().map(|a| a.src.as_str()).collect::<Vec<_>>(),
            vec!["3.3.3.3", "2.2.2.2"]
        );
    }

    #[test]
    fn window_boundary_is_exclusive_at_sixty_seconds() {
        let stats = StatsAggregator::new();
        stats.record(&attack(ORIGIN, "1.1.1.1"), NOW);

        assert_eq!(stats.snapshot(ORIGIN + 59_999).active_attacks, 1);
        assert_eq!(stats.snapshot(ORIGIN + 60_000).active_attacks, 0);
    }

    #[test]
    fn snapshot_prunes_without_new_writes() {
        let stats = StatsAggregator::new();
        stats.record(&attack(ORIGIN, "1.1.1.1"), NOW);
        assert_eq!(stats.snapshot(ORIGIN + 1_000).active_attacks, 1);
        assert_eq!(stats.snapshot(ORIGIN + 120_000).active_attacks, 0);
    }

    #[test]
    fn medium_severity_counts_as_attack_but_info_does_not() {
        let stats = StatsAggregator::new();
        let mut medium = traffic(ORIGIN, "1.1.1.1");
        medium.severity = Severity::Medium;
        let mut low = traffic(ORIGIN, "1.1.1.1");
        low.severity = Severity::Low;

        stats.record(&medium, NOW);
        stats.record(&low, NOW);
        stats.record(&traffic(ORIGIN, "1.1.1.1"), NOW);

        let snap = stats.snapshot(ORIGIN);
        assert_eq!(snap.total_events, 3);
        assert_eq!(snap.total_attacks, 1);
        assert_eq!(snap.active_attacks, 1);
    }

    #[test]
    fn counters_and_histograms() {
        let stats = StatsAggregator::new();
        stats.record(&traffic(ORIGIN, "1.1.1.1"), NOW);
        stats.record(&traffic(ORIGIN + 1, "1.1.1.1"), NOW);
        stats.record(&attack(ORIGIN + 2, "9.9.9.9"), NOW);

        let snap = stats.snapshot(ORIGIN + 2);
        assert_eq!(snap.total_events, 3);
        assert_eq!(snap.bandwidth_in, 200);
        assert_eq!(snap.bandwidth_out, 100);
        assert_eq!(snap.bytes_total, 300);
        assert_eq!(snap.unique_ips, 2);
        assert_eq!(snap.avg_bytes_per_attack(), 300);
        assert_eq!(
            snap.protocol_counts,
            BTreeMap::from([("TCP".to_string(), 1), ("UDP".to_string(), 2)])
        );
        assert_eq!(snap.port_counts, BTreeMap::from([(22, 1), (53, 2)]));
    }

    #[test]
    fn top_ips_ranked_by_count() {
        let stats = StatsAggregator::new();
        for (ip, count) in [("10.0.0.5", 5), ("10.0.0.1", 1), ("10.0.0.9", 9)] {
            for i in 0..count {
                stats.record(&traffic(ORIGIN + i, ip), NOW);
            }
        }

        let snap = stats.snapshot(ORIGIN + 100);
        let ranked: Vec<(&str, u64)> = snap.top_ips.iter().map(|t| (t.ip.as_str(), t.count)).collect();
        assert_eq!(ranked, vec![("10.0.0.9", 9), ("10.0.0.5", 5), ("10.0.0.1", 1)]);
    }

    #[test]
    fn top_ip_ties_prefer_most_recent_and_cap_at_fifty() {
        let stats = StatsAggregator::new();
        for i in 0..60 {
            stats.record(&traffic(ORIGIN + i, &format!("10.0.1.{i}")), NOW);
        }

        let snap = stats.snapshot(ORIGIN + 100);
        assert_eq!(snap.top_ips.len(), TOP_IP_LIMIT);
        assert_eq!(snap.unique_ips, 60);
        assert_eq!(snap.top_ips[0].ip, "10.0.1.59");
        assert_eq!(snap.top_ips[49].ip, "10.0.1.10");
    }

    #[test]
    fn last_seen_keeps_the_newest_timestamp() {
        let stats = StatsAggregator::new();
        stats.record(&traffic(ORIGIN + 500, "1.1.1.1"), NOW);
        stats.record(&traffic(ORIGIN, "1.1.1.1"), NOW);

        let snap = stats.snapshot(ORIGIN + 500);
        assert_eq!(snap.top_ips[0].last_seen, ORIGIN + 500);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = StatsAggregator::new();
        stats.record(&traffic(ORIGIN, "1.1.1.1"), NOW);
        stats.record(&attack(ORIGIN, "2.2.2.2"), NOW);

        stats.reset();

        let snap = stats.snapshot(ORIGIN);
        assert_eq!(snap.total_events, 0);
        assert_eq!(snap.total_attacks, 0);
        assert_eq!(snap.active_attacks, 0);
        assert_eq!(snap.bandwidth_in, 0);
        assert_eq!(snap.bandwidth_out, 0);
        assert_eq!(snap.bytes_total, 0);
        assert_eq!(snap.unique_ips, 0);
        assert!(snap.top_ips.is_empty());
        assert!(snap.protocol_counts.is_empty());
        assert!(snap.port_counts.is_empty());
        assert!(snap.recent_attacks.is_empty());
    }

    #[test]
    fn future_dated_record_does_not_evict_current_attacks() {
        let stats = StatsAggregator::new();
        stats.record(&attack(ORIGIN + 86_400_000, "6.6.6.6"), ORIGIN);
        for src in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            stats.record(&attack(ORIGIN, src), ORIGIN);
        }

        let snap = stats.snapshot(ORIGIN + 10);
        assert_eq!(snap.active_attacks, 4);
        assert_eq!(snap.total_attacks, 4);
    }

    #[test]
    fn byte_counters_saturate_instead_of_overflowing() {
        let stats = StatsAggregator::new();
        let mut huge = traffic(ORIGIN, "1.1.1.1");
        huge.bytes_in = u64::MAX;
        huge.bytes_out = 1;
        stats.record(&huge, NOW);
        stats.record(&traffic(ORIGIN, "1.1.1.1"), NOW);

        let snap = stats.snapshot(ORIGIN);
        assert_eq!(snap.total_events, 2);
        assert_eq!(snap.bandwidth_in, u64::MAX);
        assert_eq!(snap.bandwidth_out, 51);
        assert_eq!(snap.bytes_total, u64::MAX);
    }
}
