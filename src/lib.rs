pub mod broadcast;
pub mod config;
pub mod dashboard;
pub mod detection;
pub mod error;
pub mod geo;
pub mod history;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod probe;
pub mod stats;
pub mod tail;
pub mod targets;

/// Wall-clock time as epoch milliseconds, the unit every event timestamp uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
