//! Records observed from the document store.
//!
//! Every field is optional on the wire: the store is schemaless and the
//! dashboard must keep counting records it cannot fully understand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Lifecycle status of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Active,
    Pending,
    Delivered,
    Cancelled,
    InTransit,
    #[serde(other)]
    Unknown,
}

/// Operational status of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Pickup,
    InTransit,
    Accomplished,
    Breakdown,
    #[serde(other)]
    Unknown,
}

/// A shipment as stored in the `loads` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadRecord {
    pub id: Option<String>,
    pub origin_city: Option<String>,
    pub destination_city: Option<String>,
    pub status: Option<LoadStatus>,
    /// Flat rate for the whole load.
    pub rate: Option<f64>,
    pub rate_per_mile: Option<f64>,
    /// in miles
    pub distance: Option<f64>,
    /// in miles per gallon
    pub fuel_efficiency: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LoadRecord {
    /// A load without identity or status can only be counted, never classified.
    pub fn is_malformed(&self) -> bool {
        self.id.is_none() || self.status.is_none()
    }
}

/// A driver as stored in the `drivers` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub status: Option<DriverStatus>,
    pub position: Option<LatLng>,
    pub load_id: Option<String>,
    pub pickup: Option<LatLng>,
    pub dropoff: Option<LatLng>,
    /// in minutes
    pub eta: Option<f64>,
    /// in miles
    pub remaining_distance: Option<f64>,
}

impl DriverRecord {
    pub fn is_malformed(&self) -> bool {
        self.id.is_none() || self.status.is_none()
    }
}

/// A shipper account from the `users` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShipperRecord {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_record_from_camel_case_document() {
        let doc = serde_json::json!({
            "id": "L-1",
            "originCity": "Dallas",
            "destinationCity": "Austin",
            "status": "in_transit",
            "ratePerMile": 2.5,
            "distance": 195.0,
            "createdAt": "2024-03-01T10:00:00Z"
        });

        let load: LoadRecord = serde_json::from_value(doc).unwrap();

        assert_eq!(load.status, Some(LoadStatus::InTransit));
        assert_eq!(load.rate_per_mile, Some(2.5));
        assert_eq!(load.rate, None);
        assert!(load.created_at.is_some());
        assert!(!load.is_malformed());
    }

    #[test]
    fn test_unrecognized_status_decodes_to_unknown() {
        let doc = serde_json::json!({ "id": "L-2", "status": "on_hold" });
        let load: LoadRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Unknown));
    }

    #[test]
    fn test_missing_status_is_malformed() {
        let doc = serde_json::json!({ "id": "L-3", "rate": 900.0 });
        let load: LoadRecord = serde_json::from_value(doc).unwrap();
        assert!(load.is_malformed());
    }

    #[test]
    fn test_driver_record_position() {
        let doc = serde_json::json!({
            "id": "D-1",
            "name": "Sam",
            "status": "pickup",
            "position": { "lat": 32.7, "lng": -96.8 },
            "loadId": "L-1"
        });

        let driver: DriverRecord = serde_json::from_value(doc).unwrap();

        assert_eq!(driver.status, Some(DriverStatus::Pickup));
        assert_eq!(driver.position, Some(LatLng::new(32.7, -96.8)));
        assert_eq!(driver.load_id.as_deref(), Some("L-1"));
    }
}
