use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::Clock;
use crate::model::LatLng;

/// How long a resolved label stays valid.
pub const DEFAULT_TTL_SECS: i64 = 60 * 60;

/// Coordinates rounded to three decimals (roughly 100 m), so nearby
/// samples share one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    lat_milli: i64,
    lng_milli: i64,
}

impl CoordKey {
    pub fn from_position(pos: LatLng) -> Self {
        Self {
            lat_milli: (pos.lat * 1000.0).round() as i64,
            lng_milli: (pos.lng * 1000.0).round() as i64,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedLabel {
    label: String,
    stored_at: DateTime<Utc>,
}

/// Reverse-geocoding results with time-based expiry.
pub struct GeocodeCache {
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    entries: HashMap<CoordKey, CachedLabel>,
}

impl GeocodeCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: TimeDelta) -> Self {
        Self {
            clock,
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn with_default_ttl(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, TimeDelta::seconds(DEFAULT_TTL_SECS))
    }

    /// A live label for `key`. Expired entries are evicted on the way.
    pub fn get(&mut self, key: CoordKey) -> Option<String> {
        let now = self.clock.now();
        match self.entries.get(&key) {
            Some(entry) if now - entry.stored_at < self.ttl => Some(entry.label.clone()),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: CoordKey, label: String) {
        let stored_at = self.clock.now();
        self.entries.insert(key, CachedLabel { label, stored_at });
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.stored_at < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
