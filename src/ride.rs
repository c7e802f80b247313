use serde::{Deserialize, Serialize};
use std::fmt;

use crate::get_current_time_ms;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RideId(pub String);

impl RideId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiderId(pub String);

impl RiderId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit timestamp unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

/// Validated lat/lon pair.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        if !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }
}

/// Canonical ride status. The backend speaks two vocabularies (current
/// English statuses and a legacy French set); [`RideStatus::normalize`] is
/// the single total mapping from either into this closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    #[default]
    Incoming,
    Pickup,
    Arrived,
    Ongoing,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Total, idempotent normalization. Unknown and absent inputs default to
    /// `Incoming`, but unknown raw values are logged under the
    /// `ride_status` target so garbled payloads remain observable apart
    /// from genuine new offers.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Incoming;
        };

        let lookup = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match lookup.as_str() {
            "incoming" | "requested" | "pending" | "en_attente" => Self::Incoming,
            "pickup" | "accepted" | "acceptee" | "accept\u{e9}e" => Self::Pickup,
            "arrived" | "arrivee" | "arriv\u{e9}e" => Self::Arrived,
            "ongoing" | "started" | "en_cours" => Self::Ongoing,
            "completed" | "paid" | "terminee" | "termin\u{e9}e" | "payee" | "pay\u{e9}e" => {
                Self::Completed
            }
            "cancelled" | "canceled" | "annulee" | "annul\u{e9}e" => Self::Cancelled,
            other => {
                tracing::warn!(
                    target: "ride_status",
                    raw = other,
                    "unrecognized ride status, treating as incoming"
                );
                Self::Incoming
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Pickup => "pickup",
            Self::Arrived => "arrived",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pickup | Self::Arrived | Self::Ongoing)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Course,
    Delivery,
    Scheduled,
}

impl ServiceType {
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::to_lowercase).as_deref() {
            Some("delivery" | "livraison") => Self::Delivery,
            Some("scheduled" | "reservation" | "r\u{e9}servation") => Self::Scheduled,
            _ => Self::Course,
        }
    }

    #[must_use]
    pub const fn is_delivery(self) -> bool {
        matches!(self, Self::Delivery)
    }
}

/// Driver's preferred turn-by-turn navigation app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavApp {
    #[default]
    GoogleMaps,
    Waze,
    AppleMaps,
}

impl NavApp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GoogleMaps => "google_maps",
            Self::Waze => "waze",
            Self::AppleMaps => "apple_maps",
        }
    }

    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "google_maps" | "google" => Some(Self::GoogleMaps),
            "waze" => Some(Self::Waze),
            "apple_maps" | "apple" => Some(Self::AppleMaps),
            _ => None,
        }
    }
}

/// The central entity: one transport or delivery task from request to
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub status: RideStatus,

    pub pickup_label: String,
    pub dropoff_label: String,
    pub pickup_coords: Option<LatLon>,
    pub dropoff_coords: Option<LatLon>,

    pub fare: f64,
    pub driver_earnings: Option<f64>,

    pub service_type: ServiceType,
    pub vehicle_type: Option<String>,
    pub has_baggage: bool,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,

    pub rider_id: Option<RiderId>,
    pub rider_name: Option<String>,
    pub rider_phone: Option<String>,

    pub started_at: Option<UnixTimeMs>,
    pub completed_at: Option<UnixTimeMs>,
    pub arrived_at: Option<UnixTimeMs>,
    /// Set while a stop is running; mutually exclusive with accumulating
    /// into `total_stop_duration_s`.
    pub stop_started_at: Option<UnixTimeMs>,
    pub total_stop_duration_s: u64,

    pub rating: Option<f32>,
    pub tip: Option<f64>,
    pub payment_confirmed: bool,
}

impl Ride {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_started_at.is_some()
    }
}

/// An offer is a ride in `incoming` status, plus the client-local receipt
/// time driving the auto-decline timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub ride: Ride,
    pub received_at_ms: u64,
}

impl Offer {
    #[must_use]
    pub fn new(ride: Ride) -> Self {
        Self {
            ride,
            received_at_ms: get_current_time_ms(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.received_at_ms) > timeout_ms
    }
}

/// Lenient wire shape for a ride. Field-level defaults keep a partially
/// garbled payload from sinking a whole sync response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RidePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pickup_address: String,
    #[serde(default)]
    pub dropoff_address: String,
    #[serde(default)]
    pub pickup_lat: Option<f64>,
    #[serde(default)]
    pub pickup_lng: Option<f64>,
    #[serde(default)]
    pub dropoff_lat: Option<f64>,
    #[serde(default)]
    pub dropoff_lng: Option<f64>,
    #[serde(default)]
    pub fare: f64,
    #[serde(default)]
    pub driver_earnings: Option<f64>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub has_baggage: bool,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub rider_id: Option<String>,
    #[serde(default)]
    pub rider_name: Option<String>,
    #[serde(default)]
    pub rider_phone: Option<String>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub arrived_at: Option<u64>,
    #[serde(default)]
    pub stop_started_at: Option<u64>,
    #[serde(default)]
    pub total_stop_duration_s: Option<u64>,
}

impl RidePayload {
    /// Converts the wire shape into the domain model. A payload without an
    /// id is unusable and dropped.
    #[must_use]
    pub fn into_ride(self) -> Option<Ride> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;

        let pickup_coords = match (self.pickup_lat, self.pickup_lng) {
            (Some(lat), Some(lon)) => LatLon::new(lat, lon),
            _ => None,
        };
        let dropoff_coords = match (self.dropoff_lat, self.dropoff_lng) {
            (Some(lat), Some(lon)) => LatLon::new(lat, lon),
            _ => None,
        };

        Some(Ride {
            id: RideId::new(id),
            status: RideStatus::normalize(self.status.as_deref()),
            pickup_label: self.pickup_address,
            dropoff_label: self.dropoff_address,
            pickup_coords,
            dropoff_coords,
            fare: self.fare,
            driver_earnings: self.driver_earnings,
            service_type: ServiceType::normalize(self.service_type.as_deref()),
            vehicle_type: self.vehicle_type,
            has_baggage: self.has_baggage,
            recipient_name: self.recipient_name,
            recipient_phone: self.recipient_phone,
            rider_id: self.rider_id.map(RiderId::new),
            rider_name: self.rider_name,
            rider_phone: self.rider_phone,
            started_at: self.started_at.map(UnixTimeMs),
            completed_at: self.completed_at.map(UnixTimeMs),
            arrived_at: self.arrived_at.map(UnixTimeMs),
            stop_started_at: self.stop_started_at.map(UnixTimeMs),
            total_stop_duration_s: self.total_stop_duration_s.unwrap_or(0),
            rating: None,
            tip: None,
            payment_confirmed: false,
        })
    }
}

/// Paged history envelope, `GET driver/rides?status=completed&per_page=N`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RidePage {
    #[serde(default)]
    pub data: Vec<RidePayload>,
}

/// Fields the server computes authoritatively on a successful transition;
/// present fields overwrite the optimistic placeholders.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionAck {
    #[serde(default)]
    pub arrived_at: Option<u64>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub stop_started_at: Option<u64>,
    #[serde(default)]
    pub total_stop_duration_s: Option<u64>,
}

/// Final fare breakdown returned by `POST driver/trips/{id}/complete`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionReceipt {
    #[serde(default)]
    pub fare: Option<f64>,
    #[serde(default)]
    pub driver_earnings: Option<f64>,
    #[serde(default)]
    pub total_stop_duration_s: Option<u64>,
    #[serde(default)]
    pub payment_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_total_and_defaults_to_incoming() {
        assert_eq!(RideStatus::normalize(None), RideStatus::Incoming);
        assert_eq!(RideStatus::normalize(Some("")), RideStatus::Incoming);
        assert_eq!(RideStatus::normalize(Some("garbage")), RideStatus::Incoming);
    }

    #[test]
    fn normalize_accepts_english_vocabulary() {
        assert_eq!(RideStatus::normalize(Some("requested")), RideStatus::Incoming);
        assert_eq!(RideStatus::normalize(Some("accepted")), RideStatus::Pickup);
        assert_eq!(RideStatus::normalize(Some("Arrived")), RideStatus::Arrived);
        assert_eq!(RideStatus::normalize(Some("ONGOING")), RideStatus::Ongoing);
        assert_eq!(RideStatus::normalize(Some("paid")), RideStatus::Completed);
        assert_eq!(RideStatus::normalize(Some("canceled")), RideStatus::Cancelled);
    }

    #[test]
    fn normalize_accepts_legacy_vocabulary() {
        assert_eq!(RideStatus::normalize(Some("en_attente")), RideStatus::Incoming);
        assert_eq!(RideStatus::normalize(Some("en cours")), RideStatus::Ongoing);
        assert_eq!(RideStatus::normalize(Some("termin\u{e9}e")), RideStatus::Completed);
        assert_eq!(RideStatus::normalize(Some("annulee")), RideStatus::Cancelled);
        assert_eq!(RideStatus::normalize(Some("accept\u{e9}e")), RideStatus::Pickup);
    }

    #[test]
    fn normalize_is_idempotent_over_canonical_names() {
        for status in [
            RideStatus::Incoming,
            RideStatus::Pickup,
            RideStatus::Arrived,
            RideStatus::Ongoing,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert_eq!(RideStatus::normalize(Some(status.as_str())), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(RideStatus::Completed.is_terminal());
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(!RideStatus::Ongoing.is_terminal());
        assert!(!RideStatus::Incoming.is_terminal());
    }

    #[test]
    fn lat_lon_rejects_out_of_range() {
        assert!(LatLon::new(0.0, 0.0).is_some());
        assert!(LatLon::new(90.0, -180.0).is_some());
        assert!(LatLon::new(91.0, 0.0).is_none());
        assert!(LatLon::new(0.0, 181.0).is_none());
        assert!(LatLon::new(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn payload_without_id_is_dropped() {
        let payload = RidePayload {
            status: Some("requested".into()),
            ..RidePayload::default()
        };
        assert!(payload.into_ride().is_none());

        let blank = RidePayload {
            id: Some("   ".into()),
            ..RidePayload::default()
        };
        assert!(blank.into_ride().is_none());
    }

    #[test]
    fn payload_conversion_normalizes_status_and_coords() {
        let payload = RidePayload {
            id: Some("5".into()),
            status: Some("requested".into()),
            pickup_address: "Gare du Nord".into(),
            dropoff_address: "Opera".into(),
            pickup_lat: Some(48.88),
            pickup_lng: Some(2.35),
            dropoff_lat: Some(200.0),
            dropoff_lng: Some(2.33),
            fare: 18.5,
            ..RidePayload::default()
        };

        let ride = payload.into_ride().unwrap();
        assert_eq!(ride.id.as_str(), "5");
        assert_eq!(ride.status, RideStatus::Incoming);
        assert!(ride.pickup_coords.is_some());
        assert!(ride.dropoff_coords.is_none());
        assert_eq!(ride.total_stop_duration_s, 0);
    }

    #[test]
    fn offer_expiry_window() {
        let ride = RidePayload {
            id: Some("1".into()),
            ..RidePayload::default()
        }
        .into_ride()
        .unwrap();

        let offer = Offer {
            ride,
            received_at_ms: 1_000,
        };
        assert!(!offer.is_expired(1_000, 30_000));
        assert!(!offer.is_expired(31_000, 30_000));
        assert!(offer.is_expired(31_001, 30_000));
    }

    #[test]
    fn nav_app_round_trip() {
        for nav in [NavApp::GoogleMaps, NavApp::Waze, NavApp::AppleMaps] {
            assert_eq!(NavApp::from_str(nav.as_str()), Some(nav));
        }
        assert_eq!(NavApp::from_str("bing"), None);
    }
}
