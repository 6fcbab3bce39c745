use crate::error::ValidationError;
use crate::models::domain::SubmittedUrl;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

#[derive(Debug, Default)]
struct Targets {
    urls: Vec<SubmittedUrl>,
    cursor: usize,
}

/// URLs submitted for synthetic probing, visited round-robin.
#[derive(Debug)]
pub struct UrlRegistry {
    targets: Mutex<Targets>,
    next_id: AtomicU64,
}

impl Default for UrlRegistry {
    fn default() -> Self {
        UrlRegistry {
            targets: Mutex::new(Targets::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl UrlRegistry {
    fn lock(&self) -> MutexGuard<'_, Targets> {
        self.targets.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn submit(&self, raw: &str, now: i64) -> Result<SubmittedUrl, ValidationError> {
        let url = validate_url(raw)?;
        let entry = SubmittedUrl {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            url: url.to_string(),
            timestamp: now,
        };
        self.lock().urls.push(entry.clone());
        Ok(entry)
    }

    pub fn remove(&self, id: u64) -> Option<SubmittedUrl> {
        let mut targets = self.lock();
        let index = targets.urls.iter().position(|u| u.id == id)?;
        let removed = targets.urls.remove(index);
        if index < targets.cursor {
            targets.cursor -= 1;
        }
        Some(removed)
    }

    /// Most recent submissions first.
    pub fn list(&self, limit: usize) -> Vec<SubmittedUrl> {
        self.lock().urls.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next URL to probe. Every URL is visited once per pass over the list.
    pub fn next_target(&self) -> Option<SubmittedUrl> {
        let mut targets = self.lock();
        if targets.urls.is_empty() {
            return None;
        }
        let index = targets.cursor % targets.urls.len();
        targets.cursor = index + 1;
        Some(targets.urls[index].clone())
    }
}
