use crate::config::GeoConfig;
use crate::error::GeoError;
use crate::models::domain::GeoRecord;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Something that can geolocate an address. The resolver wraps it with
/// caching, timeouts and request coalescing.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord, GeoError>;
}

/// ip-api.com style JSON endpoint (`{endpoint}/{ip}?fields=...`).
pub struct IpApiProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    query: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
    isp: Option<String>,
    org: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

const IP_API_FIELDS: &str =
    "status,message,country,countryCode,regionName,city,lat,lon,timezone,isp,org,as,query";

impl IpApiProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        IpApiProvider {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    async fn lookup(&self, ip: &str) -> Result<GeoRecord, GeoError> {
        let url = format!("{}/{}", self.endpoint, ip);
        let response: IpApiResponse = self
            .client
            .get(&url)
            .query(&[("fields", IP_API_FIELDS)])
            .send()
            .await?
            .json()
            .await?;

        if response.status != "success" {
            return Err(GeoError::Provider(
                response.message.unwrap_or_else(|| response.status.clone()),
            ));
        }

        Ok(GeoRecord {
            ip: response.query,
            lat: response.lat.unwrap_or(0.0),
            lon: response.lon.unwrap_or(0.0),
            country: response.country.unwrap_or_else(|| "Unknown".into()),
            country_code: response.country_code,
            region: response.region_name,
            city: response.city.unwrap_or_else(|| "Unknown".into()),
            timezone: response.timezone,
            isp: response.isp,
            org: response.org,
            asn: response.asn,
        })
    }
}

type Lookup = Shared<BoxFuture<'static, Result<GeoRecord, GeoError>>>;

struct CacheEntry {
    record: GeoRecord,
    expires_at: Instant,
}

struct Inner {
    provider: Arc<dyn GeoProvider>,
    timeout: Duration,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Lookup>>,
    /// Bumped by `clear_cache`; lookups started before a clear never store
    /// their result.
    generation: AtomicU64,
}

/// Cache-first geolocation shared by the log pipeline, the prober and the
/// geo passthrough endpoint.
///
/// Hits younger than the TTL never touch the provider. Concurrent misses for
/// the same address share one outbound lookup. Failures are returned to every
/// waiter but never cached.
#[derive(Clone)]
pub struct GeoResolver {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GeoResolver {
    pub fn new(provider: Arc<dyn GeoProvider>, config: &GeoConfig) -> Self {
        GeoResolver {
            inner: Arc::new(Inner {
                provider,
                timeout: config.timeout,
                ttl: config.ttl,
                cache: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &GeoConfig) -> Self {
        Self::new(Arc::new(IpApiProvider::new(config.endpoint.clone())), config)
    }

    /// Geolocation for enrichment: never fails, falls back to the
    /// "Unknown" placeholder.
    pub async fn resolve(&self, ip: &str) -> GeoRecord {
        match self.lookup(ip).await {
            Ok(record) => record,
            Err(err) => {
                debug!(ip, error = %err, "geo lookup failed");
                GeoRecord::unknown()
            }
        }
    }

    /// Full lookup result, for callers that want to report the failure.
    pub async fn lookup(&self, ip: &str) -> Result<GeoRecord, GeoError> {
        if let Some(record) = self.cached(ip) {
            return Ok(record);
        }
        self.join_lookup(ip).await
    }

    fn cached(&self, ip: &str) -> Option<GeoRecord> {
        let mut cache = lock(&self.inner.cache);
        match cache.get(ip) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.record.clone()),
            Some(_) => {
                cache.remove(ip);
                None
            }
            None => None,
        }
    }

    fn join_lookup(&self, ip: &str) -> Lookup {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(pending) = in_flight.get(ip) {
            return pending.clone();
        }
        // A lookup may have landed between the cache check and taking the lock.
        if let Some(record) = self.cached(ip) {
            return futures::future::ready(Ok(record)).boxed().shared();
        }

        let inner = Arc::clone(&self.inner);
        let key = ip.to_string();
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let lookup = async move {
            let result = match tokio::time::timeout(inner.timeout, inner.provider.lookup(&key)).await {
                Ok(result) => result,
                Err(_) => Err(GeoError::Timeout),
            };
            if let Ok(record) = &result {
                let mut cache = lock(&inner.cache);
                if inner.generation.load(Ordering::SeqCst) == generation {
                    cache.insert(
                        key.clone(),
                        CacheEntry {
                            record: record.clone(),
                            expires_at: Instant::now() + inner.ttl,
                        },
                    );
                }
            }
            let mut in_flight = lock(&inner.in_flight);
            if inner.generation.load(Ordering::SeqCst) == generation {
                in_flight.remove(&key);
            }
            result
        }
        .boxed()
        .shared();

        in_flight.insert(ip.to_string(), lookup.clone());
        lookup
    }

    /// Drop every cached record. Lookups still in flight are detached so
    /// their results are returned to waiters but not cached.
    pub fn clear_cache(&self) {
        let mut in_flight = lock(&self.inner.in_flight);
        let mut cache = lock(&self.inner.cache);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        cache.clear();
        in_flight.clear();
    }

    pub fn cached_len(&self) -> usize {
        lock(&self.inner.cache).len()
    }
}
