use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ride::{Offer, Ride, RideId};

/// A pending action older than this is assumed lost and rolled back.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Every driver-initiated transition. One executor handles all of them:
/// snapshot, apply locally, POST, then commit or roll back on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverAction {
    Accept,
    Decline,
    /// Decline fired by the offer-timeout sweep rather than the driver; its
    /// failures are swallowed and never resurrect the expired offer.
    AutoDecline,
    SignalArrival,
    StartTrip,
    StartStop,
    EndStop,
    Complete,
}

impl DriverAction {
    #[must_use]
    pub fn path(self, ride_id: &RideId) -> String {
        let verb = match self {
            Self::Accept => "accept",
            Self::Decline | Self::AutoDecline => "decline",
            Self::SignalArrival => "arrived",
            Self::StartTrip => "start",
            Self::StartStop => "start-stop",
            Self::EndStop => "end-stop",
            Self::Complete => "complete",
        };
        format!("driver/trips/{ride_id}/{verb}")
    }

    #[must_use]
    pub const fn timeout(self) -> Duration {
        ACTION_TIMEOUT
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::AutoDecline => "auto_decline",
            Self::SignalArrival => "signal_arrival",
            Self::StartTrip => "start_trip",
            Self::StartStop => "start_stop",
            Self::EndStop => "end_stop",
            Self::Complete => "complete",
        }
    }

    /// Whether a failure is surfaced to the driver. The timeout sweep's
    /// auto-decline stays silent.
    #[must_use]
    pub const fn alerts_user(self) -> bool {
        !matches!(self, Self::AutoDecline)
    }

    /// Actions that target an entry in the offer set rather than the
    /// current-ride slot.
    #[must_use]
    pub const fn targets_offer(self) -> bool {
        matches!(self, Self::Accept | Self::Decline | Self::AutoDecline)
    }

    /// Failed auto-declines are not rolled back: the offer already expired
    /// locally and restoring it would resurrect a dead offer.
    #[must_use]
    pub const fn rolls_back_on_failure(self) -> bool {
        !matches!(self, Self::AutoDecline)
    }
}

/// Exact pre-mutation copy of whichever slot the action touches. Rollback
/// restores it bit for bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionSnapshot {
    CurrentRide(Option<Box<Ride>>),
    Offer { offer: Box<Offer>, index: usize },
    /// Accept touches both slots: the promoted offer and whatever occupied
    /// the current-ride slot before it.
    Promotion {
        offer: Box<Offer>,
        index: usize,
        previous_current: Option<Box<Ride>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: DriverAction,
    pub ride_id: RideId,
    pub snapshot: ActionSnapshot,
    pub idempotency_key: String,
    pub started_at_ms: u64,
}

impl PendingAction {
    #[must_use]
    pub fn new(
        action: DriverAction,
        ride_id: RideId,
        snapshot: ActionSnapshot,
        now_ms: u64,
    ) -> Self {
        Self {
            action,
            ride_id,
            snapshot,
            idempotency_key: Uuid::new_v4().to_string(),
            started_at_ms: now_ms,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.started_at_ms) > ACTION_TIMEOUT.as_millis() as u64
    }
}

/// Why an action could not start. `InFlight` is the per-ride guard: a second
/// action cannot race the rollback of one still awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("another action is already in flight for ride {0}")]
    InFlight(RideId),

    #[error("ride {0} not found")]
    NotFound(RideId),

    #[error("{action:?} is not valid from the current ride state")]
    InvalidState { action: DriverAction },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::{RidePayload, RideStatus};

    fn ride(id: &str) -> Ride {
        RidePayload {
            id: Some(id.into()),
            status: Some("requested".into()),
            ..RidePayload::default()
        }
        .into_ride()
        .unwrap()
    }

    #[test]
    fn paths_follow_the_trips_api() {
        let id = RideId::new("42");
        assert_eq!(DriverAction::Accept.path(&id), "driver/trips/42/accept");
        assert_eq!(DriverAction::AutoDecline.path(&id), "driver/trips/42/decline");
        assert_eq!(DriverAction::StartStop.path(&id), "driver/trips/42/start-stop");
        assert_eq!(DriverAction::EndStop.path(&id), "driver/trips/42/end-stop");
        assert_eq!(DriverAction::Complete.path(&id), "driver/trips/42/complete");
    }

    #[test]
    fn auto_decline_is_silent_and_never_rolled_back() {
        assert!(!DriverAction::AutoDecline.alerts_user());
        assert!(!DriverAction::AutoDecline.rolls_back_on_failure());
        assert!(DriverAction::Decline.alerts_user());
        assert!(DriverAction::Decline.rolls_back_on_failure());
    }

    #[test]
    fn pending_action_expiry() {
        let pending = PendingAction::new(
            DriverAction::SignalArrival,
            RideId::new("9"),
            ActionSnapshot::CurrentRide(Some(Box::new(ride("9")))),
            10_000,
        );
        assert!(!pending.is_expired(10_000 + 30_000));
        assert!(pending.is_expired(10_000 + 30_001));
    }

    #[test]
    fn idempotency_keys_are_unique_per_action() {
        let snapshot = ActionSnapshot::CurrentRide(None);
        let a = PendingAction::new(DriverAction::Accept, RideId::new("1"), snapshot.clone(), 0);
        let b = PendingAction::new(DriverAction::Accept, RideId::new("1"), snapshot, 0);
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn snapshot_preserves_the_exact_ride() {
        let original = ride("5");
        let snapshot = ActionSnapshot::Promotion {
            offer: Box::new(Offer {
                ride: original.clone(),
                received_at_ms: 123,
            }),
            index: 0,
            previous_current: None,
        };

        let ActionSnapshot::Promotion { offer, .. } = snapshot else {
            panic!("expected promotion snapshot");
        };
        assert_eq!(offer.ride, original);
        assert_eq!(offer.ride.status, RideStatus::Incoming);
    }
}
