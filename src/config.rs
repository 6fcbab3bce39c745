use crate::logging::LogFormat;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command line, with every option also readable from the environment
/// (a `.env` file is loaded first).
#[derive(Debug, Parser)]
#[command(name = "beartrap", version, about = "Suricata EVE monitor with live dashboard stream")]
pub struct Cli {
    /// Suricata EVE JSON log to follow
    #[arg(long, env = "BEARTRAP_EVE_LOG", default_value = "/var/log/suricata/eve.json")]
    pub eve_log: PathBuf,

    /// Address for the dashboard API and websocket stream
    #[arg(long, env = "BEARTRAP_LISTEN", default_value = "127.0.0.1:5173")]
    pub listen: SocketAddr,

    /// Base URL of the ip-api compatible geolocation service
    #[arg(long, env = "BEARTRAP_GEO_ENDPOINT", default_value = "http://ip-api.com/json")]
    pub geo_endpoint: String,

    #[arg(long, env = "BEARTRAP_GEO_TIMEOUT_MS", default_value_t = 3000)]
    pub geo_timeout_ms: u64,

    #[arg(long, env = "BEARTRAP_GEO_TTL_SECS", default_value_t = 3600)]
    pub geo_ttl_secs: u64,

    #[arg(long, env = "BEARTRAP_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    pub probe_timeout_ms: u64,

    /// Base probe interval; up to one extra second of jitter is added per tick
    #[arg(long, env = "BEARTRAP_PROBE_INTERVAL_MS", default_value_t = 3000)]
    pub probe_interval_ms: u64,

    /// Probe submitted URLs even while the EVE log is live
    #[arg(long, env = "BEARTRAP_ALWAYS_PROBE")]
    pub always_probe: bool,

    /// Delay before reopening the log after reaching its end
    #[arg(long, env = "BEARTRAP_TAIL_RETRY_MS", default_value_t = 1000)]
    pub tail_retry_ms: u64,

    /// How often to check for a missing log file to appear
    #[arg(long, env = "BEARTRAP_TAIL_POLL_MS", default_value_t = 2000)]
    pub tail_poll_ms: u64,

    /// Outbound queue length per websocket subscriber
    #[arg(long, env = "BEARTRAP_SUBSCRIBER_QUEUE", default_value_t = 256)]
    pub subscriber_queue: usize,

    /// Log records enriched and published at the same time
    #[arg(long, env = "BEARTRAP_ENRICH_CONCURRENCY", default_value_t = 32)]
    pub enrich_concurrency: usize,

    #[arg(long, env = "BEARTRAP_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub eve_log: PathBuf,
    pub listen: SocketAddr,
    pub geo: GeoConfig,
    pub probe: ProbeConfig,
    pub tail: TailConfig,
    pub subscriber_queue: usize,
    pub enrich_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub jitter: Duration,
    pub always: bool,
}

#[derive(Debug, Clone)]
pub struct TailConfig {
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            endpoint: "http://ip-api.com/json".to_string(),
            timeout: Duration::from_millis(3000),
            ttl: Duration::from_secs(3600),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            timeout: Duration::from_millis(5000),
            interval: Duration::from_millis(3000),
            jitter: Duration::from_millis(1000),
            always: false,
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            retry_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(2000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eve_log: PathBuf::from("/var/log/suricata/eve.json"),
            listen: SocketAddr::from(([127, 0, 0, 1], 5173)),
            geo: GeoConfig::default(),
            probe: ProbeConfig::default(),
            tail: TailConfig::default(),
            subscriber_queue: 256,
            enrich_concurrency: 32,
        }
    }
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        Config {
            eve_log: cli.eve_log.clone(),
            listen: cli.listen,
            geo: GeoConfig {
                endpoint: cli.geo_endpoint.trim_end_matches('/').to_string(),
                timeout: Duration::from_millis(cli.geo_timeout_ms),
                ttl: Duration::from_secs(cli.geo_ttl_secs),
            },
            probe: ProbeConfig {
                timeout: Duration::from_millis(cli.probe_timeout_ms),
                interval: Duration::from_millis(cli.probe_interval_ms),
                always: cli.always_probe,
                ..ProbeConfig::default()
            },
            tail: TailConfig {
                retry_delay: Duration::from_millis(cli.tail_retry_ms),
                poll_interval: Duration::from_millis(cli.tail_poll_ms),
            },
            subscriber_queue: cli.subscriber_queue.max(1),
            enrich_concurrency: cli.enrich_concurrency.max(1),
        }
    }
}
