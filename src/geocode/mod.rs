//! Reverse geocoding for driver positions.
//!
//! Lookups are a display nicety. Every failure resolves to [`PLACEHOLDER`]
//! and nothing here can reach the metrics or motion state.

mod cache;

pub use cache::{CoordKey, DEFAULT_TTL_SECS, GeocodeCache};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fetch::{HttpClient, fetch_bytes};
use crate::model::LatLng;

/// Label shown when no address could be resolved.
pub const PLACEHOLDER: &str = "Unknown location";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0:#}")]
    Transport(#[from] anyhow::Error),
    #[error("no address found for {lat:.5},{lng:.5}")]
    NotFound { lat: f64, lng: f64 },
    #[error("geocoding timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolves a position to a human-readable address.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, pos: LatLng) -> Result<String, GeocodeError>;
}

#[async_trait]
impl<G: ReverseGeocoder + ?Sized> ReverseGeocoder for Box<G> {
    async fn reverse(&self, pos: LatLng) -> Result<String, GeocodeError> {
        (**self).reverse(pos).await
    }
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Nominatim-style `GET {base}/reverse?format=json&lat=..&lon=..` lookups.
pub struct HttpGeocoder<C> {
    client: C,
    base_url: Url,
}

impl<C: HttpClient> HttpGeocoder<C> {
    pub fn new(client: C, base_url: &str) -> anyhow::Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("invalid geocoder url '{base_url}'"))?;
        Ok(Self { client, base_url })
    }

    pub fn reverse_url(&self, pos: LatLng) -> anyhow::Result<Url> {
        let mut url = self.base_url.join("reverse")?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("lat", &pos.lat.to_string())
            .append_pair("lon", &pos.lng.to_string());
        Ok(url)
    }
}

#[async_trait]
impl<C: HttpClient> ReverseGeocoder for HttpGeocoder<C> {
    async fn reverse(&self, pos: LatLng) -> Result<String, GeocodeError> {
        let url = self.reverse_url(pos)?;
        let body = fetch_bytes(&self.client, url.as_str()).await?;
        let resp: ReverseResponse =
            serde_json::from_slice(&body).context("invalid geocoder response")?;

        resp.display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(GeocodeError::NotFound {
                lat: pos.lat,
                lng: pos.lng,
            })
    }
}

/// Cached, time-boxed lookups.
pub struct Geocoding<G> {
    geocoder: Arc<G>,
    cache: Arc<Mutex<GeocodeCache>>,
    timeout: Duration,
}

impl<G> Clone for Geocoding<G> {
    fn clone(&self) -> Self {
        Self {
            geocoder: self.geocoder.clone(),
            cache: self.cache.clone(),
            timeout: self.timeout,
        }
    }
}

impl<G: ReverseGeocoder + 'static> Geocoding<G> {
    pub fn new(geocoder: G, cache: GeocodeCache, timeout: Duration) -> Self {
        Self {
            geocoder: Arc::new(geocoder),
            cache: Arc::new(Mutex::new(cache)),
            timeout,
        }
    }

    /// Address for `pos`, or [`PLACEHOLDER`] if it cannot be resolved in time.
    /// Only successful lookups are cached.
    pub async fn label_for(&self, pos: LatLng) -> String {
        let key = CoordKey::from_position(pos);
        let cached = self.lock_cache().get(key);
        if let Some(label) = cached {
            return label;
        }

        match self.lookup(pos).await {
            Ok(label) => {
                self.lock_cache().insert(key, label.clone());
                label
            }
            Err(e) => {
                warn!(error = %e, lat = pos.lat, lng = pos.lng, "Reverse geocoding failed");
                PLACEHOLDER.to_string()
            }
        }
    }

    /// Runs [`Geocoding::label_for`] on its own task so callers never wait on
    /// the network.
    pub fn spawn_label(&self, pos: LatLng) -> JoinHandle<String> {
        let this = self.clone();
        tokio::spawn(async move { this.label_for(pos).await })
    }

    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    /// Evicts expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.lock_cache().purge_expired()
    }

    async fn lookup(&self, pos: LatLng) -> Result<String, GeocodeError> {
        debug!(lat = pos.lat, lng = pos.lng, "Reverse geocoding");
        tokio::time::timeout(self.timeout, self.geocoder.reverse(pos))
            .await
            .map_err(|_| GeocodeError::Timeout(self.timeout))?
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, GeocodeCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::BasicClient;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGeocoder {
        calls: AtomicUsize,
        answer: Option<&'static str>,
        delay: Duration,
    }

    impl FakeGeocoder {
        fn answering(answer: Option<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ReverseGeocoder for FakeGeocoder {
        async fn reverse(&self, pos: LatLng) -> Result<String, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.answer.map(str::to_string).ok_or(GeocodeError::NotFound {
                lat: pos.lat,
                lng: pos.lng,
            })
        }
    }

    fn cache() -> GeocodeCache {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        GeocodeCache::with_default_ttl(Arc::new(clock))
    }

    #[tokio::test]
    async fn test_label_is_cached_per_rounded_pair() {
        let geocoding = Geocoding::new(
            FakeGeocoder::answering(Some("12 Elm St")),
            cache(),
            Duration::from_secs(1),
        );

        assert_eq!(geocoding.label_for(LatLng::new(35.12341, -80.1)).await, "12 Elm St");
        assert_eq!(geocoding.label_for(LatLng::new(35.12339, -80.1)).await, "12 Elm St");

        assert_eq!(geocoding.geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(geocoding.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_stale_labels() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        let geocoding = Geocoding::new(
            FakeGeocoder::answering(Some("12 Elm St")),
            GeocodeCache::with_default_ttl(Arc::new(clock.clone())),
            Duration::from_secs(1),
        );
        geocoding.label_for(LatLng::new(1.0, 1.0)).await;
        geocoding.label_for(LatLng::new(2.0, 2.0)).await;

        assert_eq!(geocoding.purge_expired(), 0);
        clock.advance(chrono::TimeDelta::hours(2));
        assert_eq!(geocoding.purge_expired(), 2);
        assert_eq!(geocoding.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_failure_yields_placeholder_and_is_not_cached() {
        let geocoding =
            Geocoding::new(FakeGeocoder::answering(None), cache(), Duration::from_secs(1));

        assert_eq!(geocoding.label_for(LatLng::new(1.0, 1.0)).await, PLACEHOLDER);
        assert_eq!(geocoding.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let slow = FakeGeocoder {
            delay: Duration::from_secs(30),
            ..FakeGeocoder::answering(Some("late"))
        };
        let geocoding = Geocoding::new(slow, cache(), Duration::from_millis(50));

        let label = geocoding.spawn_label(LatLng::new(1.0, 1.0)).await.unwrap();

        assert_eq!(label, PLACEHOLDER);
    }

    #[test]
    fn test_reverse_url() {
        let geocoder = HttpGeocoder::new(BasicClient::new(), "https://geo.example.com").unwrap();
        let url = geocoder.reverse_url(LatLng::new(12.5, -3.25)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://geo.example.com/reverse?format=json&lat=12.5&lon=-3.25"
        );
    }
}
