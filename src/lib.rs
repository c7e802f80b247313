#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod actions;
pub mod capabilities;
pub mod ride;
pub mod sync;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::actions::{ActionError, ActionSnapshot, DriverAction, PendingAction};
use crate::capabilities::{
    ApiError, ApiResult, LocationPermissions, LocationResult, RealtimeResult, StorageResult,
};
use crate::ride::{NavApp, Offer, Ride, RideId, RideStatus, UnixTimeMs};
use crate::sync::{RealtimeConnection, SyncScheduler};

pub use app::App;
pub use capabilities::{Capabilities, Effect};

pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(15);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOCATION_REPORT_TIMEOUT: Duration = Duration::from_secs(10);
pub const OFFER_TIMEOUT_MS: u64 = 30_000;
pub const HISTORY_PAGE_SIZE: u32 = 20;
pub const MAX_PERSISTED_HISTORY: usize = 50;
pub const MAX_OFFERS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    Location,
    LocationPermissionDenied,
    Realtime,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::Realtime => "REALTIME_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Conflict | Self::RateLimited | Self::Storage
            | Self::Location | Self::Realtime => ErrorSeverity::Transient,

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::LocationPermissionDenied
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::Storage
                | Self::Conflict
                | Self::Location
                | Self::Realtime
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => "You don't have permission to perform this action.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "This ride is no longer available.".into(),
            ErrorKind::Conflict => {
                "This ride was updated elsewhere. Please wait for the next sync.".into()
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.".into(),
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required while online. Please enable it in Settings.".into()
            }
            ErrorKind::Realtime => "Live updates are temporarily unavailable.".into(),
            ErrorKind::InvalidState => "The app is in an invalid state. Please restart it.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

pub type AppResult<T> = Result<T, AppError>;

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl AlertKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertMessage {
    pub message: String,
    pub kind: AlertKind,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl AlertMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: AlertKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at_ms: get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.duration_ms
    }
}

/// Keys of the persisted key-value snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Online,
    NavApp,
    History,
    ActiveRideId,
    HistoryResetMarker,
}

impl StoreKey {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Online => capabilities::keys::ONLINE,
            Self::NavApp => capabilities::keys::NAV_APP,
            Self::History => capabilities::keys::RIDE_HISTORY,
            Self::ActiveRideId => capabilities::keys::ACTIVE_RIDE_ID,
            Self::HistoryResetMarker => capabilities::keys::HISTORY_RESET_MARKER,
        }
    }
}

/// Pushes delivered over the presence channel and the per-ride private
/// channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimePayload {
    #[serde(rename = "ride.requested")]
    RideRequested,
    #[serde(rename = "ride.cancelled")]
    RideCancelled { ride_id: String },
    #[serde(rename = "ride.rated")]
    RideRated {
        ride_id: String,
        rating: f32,
        #[serde(default)]
        tip: Option<f64>,
    },
    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed { ride_id: String },
}

pub struct Model {
    pub access_token: Option<String>,
    pub session_expired: bool,
    pub online: bool,
    pub nav_app: NavApp,

    pub current_ride: Option<Ride>,
    pub offers: Vec<Offer>,
    pub history: Vec<Ride>,

    /// Per-ride in-flight action registry; doubles as the mutex that keeps a
    /// second action from racing a pending rollback.
    pub pending_actions: HashMap<RideId, PendingAction>,
    pub scheduler: SyncScheduler,
    pub connection: RealtimeConnection,
    pub presence_subscribed: bool,
    /// Ride whose private channel is bound for the end-of-ride screen.
    pub summary_channel: Option<RideId>,

    pub location_permissions: LocationPermissions,
    pub foreground_watching: bool,
    pub background_watching: bool,

    pub history_loading: bool,
    pub alert: Option<AlertMessage>,
    pub view_timestamp_ms: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            access_token: None,
            session_expired: false,
            online: false,
            nav_app: NavApp::default(),
            current_ride: None,
            offers: Vec::new(),
            history: Vec::new(),
            pending_actions: HashMap::new(),
            scheduler: SyncScheduler::default(),
            connection: RealtimeConnection::default(),
            presence_subscribed: false,
            summary_channel: None,
            location_permissions: LocationPermissions::default(),
            foreground_watching: false,
            background_watching: false,
            history_loading: false,
            alert: None,
            view_timestamp_ms: get_current_time_ms(),
        }
    }
}

impl Model {
    pub fn update_timestamp(&mut self) {
        self.view_timestamp_ms = get_current_time_ms();
    }

    pub fn show_alert(&mut self, message: impl Into<String>, kind: AlertKind) {
        self.alert = Some(AlertMessage::new(message, kind));
    }

    pub fn clear_alert(&mut self) {
        self.alert = None;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && !self.session_expired
    }

    #[must_use]
    pub fn has_offer(&self, id: &RideId) -> bool {
        self.offers.iter().any(|o| &o.ride.id == id)
    }

    /// Additive merge of a polled offer list: existing offers are never
    /// replaced, ids stay unique, and rides already owned or in flight are
    /// skipped. Returns the number of offers added.
    pub fn merge_offers(&mut self, incoming: Vec<Ride>, now_ms: u64) -> usize {
        let mut added = 0;
        for ride in incoming {
            if ride.status != RideStatus::Incoming {
                continue;
            }
            if self.has_offer(&ride.id) {
                continue;
            }
            if self.current_ride.as_ref().map_or(false, |c| c.id == ride.id) {
                continue;
            }
            if self.pending_actions.contains_key(&ride.id) {
                continue;
            }
            if self.offers.len() >= MAX_OFFERS {
                tracing::warn!(ride_id = %ride.id, "offer list full, dropping incoming offer");
                continue;
            }
            self.offers.push(Offer {
                ride,
                received_at_ms: now_ms,
            });
            added += 1;
        }
        added
    }

    pub fn remove_offer(&mut self, id: &RideId) -> Option<Offer> {
        let index = self.offers.iter().position(|o| &o.ride.id == id)?;
        Some(self.offers.remove(index))
    }

    /// Id-deduplicated history merge. A fetched completed ride overwrites a
    /// same-id local entry (terminal wins over any stub); entries the server
    /// does not know about yet are preserved. Rating, tip, and payment
    /// confirmation arrive over the realtime channel only, so a server page
    /// never erases them.
    pub fn merge_history(&mut self, fetched: Vec<Ride>) {
        for ride in fetched {
            if ride.status != RideStatus::Completed {
                continue;
            }
            if let Some(existing) = self.history.iter_mut().find(|r| r.id == ride.id) {
                let (rating, tip, paid) =
                    (existing.rating, existing.tip, existing.payment_confirmed);
                *existing = ride;
                if existing.rating.is_none() {
                    existing.rating = rating;
                }
                if existing.tip.is_none() {
                    existing.tip = tip;
                }
                existing.payment_confirmed |= paid;
            } else {
                self.history.push(ride);
            }
        }
    }

    /// The history snapshot that goes to disk: completed only, deduplicated,
    /// newest first, capped.
    #[must_use]
    pub fn sanitized_history(&self) -> Vec<Ride> {
        let mut out: Vec<Ride> = Vec::with_capacity(self.history.len());
        for ride in &self.history {
            if ride.status != RideStatus::Completed {
                continue;
            }
            if out.iter().any(|r| r.id == ride.id) {
                continue;
            }
            out.push(ride.clone());
        }
        out.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        out.truncate(MAX_PERSISTED_HISTORY);
        out
    }

    /// Snapshot-then-apply half of the optimistic executor. Registers the
    /// pending action so the response handler can commit or roll back.
    pub fn begin_action(
        &mut self,
        action: DriverAction,
        ride_id: &RideId,
        now_ms: u64,
    ) -> Result<PendingAction, ActionError> {
        if self.pending_actions.contains_key(ride_id) {
            return Err(ActionError::InFlight(ride_id.clone()));
        }

        let snapshot = if action.targets_offer() {
            let index = self
                .offers
                .iter()
                .position(|o| &o.ride.id == ride_id)
                .ok_or_else(|| ActionError::NotFound(ride_id.clone()))?;
            let offer = self.offers.remove(index);

            if action == DriverAction::Accept {
                let previous_current = self.current_ride.take().map(Box::new);
                let mut ride = offer.ride.clone();
                ride.status = RideStatus::Pickup;
                self.current_ride = Some(ride);
                ActionSnapshot::Promotion {
                    offer: Box::new(offer),
                    index,
                    previous_current,
                }
            } else {
                ActionSnapshot::Offer {
                    offer: Box::new(offer),
                    index,
                }
            }
        } else {
            let ride = self
                .current_ride
                .as_mut()
                .filter(|r| &r.id == ride_id)
                .ok_or_else(|| ActionError::NotFound(ride_id.clone()))?;
            let snapshot = ActionSnapshot::CurrentRide(Some(Box::new(ride.clone())));

            match action {
                DriverAction::SignalArrival => {
                    if ride.status != RideStatus::Pickup {
                        return Err(ActionError::InvalidState { action });
                    }
                    ride.status = RideStatus::Arrived;
                    ride.arrived_at = Some(UnixTimeMs(now_ms));
                }
                DriverAction::StartTrip => {
                    if ride.status != RideStatus::Arrived {
                        return Err(ActionError::InvalidState { action });
                    }
                    ride.status = RideStatus::Ongoing;
                    ride.started_at = Some(UnixTimeMs(now_ms));
                }
                DriverAction::StartStop => {
                    if !ride.status.is_active() || ride.stop_started_at.is_some() {
                        return Err(ActionError::InvalidState { action });
                    }
                    ride.stop_started_at = Some(UnixTimeMs(now_ms));
                }
                DriverAction::EndStop => {
                    let Some(started) = ride.stop_started_at else {
                        return Err(ActionError::InvalidState { action });
                    };
                    ride.total_stop_duration_s += now_ms.saturating_sub(started.0) / 1000;
                    ride.stop_started_at = None;
                }
                DriverAction::Complete => {
                    if ride.status != RideStatus::Ongoing {
                        return Err(ActionError::InvalidState { action });
                    }
                    ride.status = RideStatus::Completed;
                    ride.completed_at = Some(UnixTimeMs(now_ms));
                }
                DriverAction::Accept | DriverAction::Decline | DriverAction::AutoDecline => {
                    return Err(ActionError::InvalidState { action });
                }
            }
            snapshot
        };

        let pending = PendingAction::new(action, ride_id.clone(), snapshot, now_ms);
        self.pending_actions.insert(ride_id.clone(), pending.clone());
        Ok(pending)
    }

    /// Restores the exact pre-mutation state captured by `begin_action`.
    pub fn rollback_action(&mut self, pending: PendingAction) {
        match pending.snapshot {
            ActionSnapshot::CurrentRide(previous) => {
                self.current_ride = previous.map(|b| *b);
            }
            ActionSnapshot::Offer { offer, index } => {
                let index = index.min(self.offers.len());
                self.offers.insert(index, *offer);
            }
            ActionSnapshot::Promotion {
                offer,
                index,
                previous_current,
            } => {
                self.current_ride = previous_current.map(|b| *b);
                let index = index.min(self.offers.len());
                self.offers.insert(index, *offer);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    AppStarted,
    AppBackgrounded,

    StoredValueLoaded {
        key: StoreKey,
        result: Box<StorageResult>,
    },
    StoragePersisted {
        key: StoreKey,
        result: Box<StorageResult>,
    },

    /// The shell's login flow hands the bearer token to the core; the flow
    /// itself lives outside this crate.
    SessionTokenProvided {
        token: String,
    },

    OnlineToggleRequested {
        online: bool,
    },
    OnlineStatusResponse {
        requested: bool,
        result: Box<ApiResult>,
    },
    NavAppSelected {
        nav_app: NavApp,
    },

    SyncTick,
    CurrentRideSynced {
        result: Box<ApiResult>,
    },
    OffersSynced {
        result: Box<ApiResult>,
    },

    AcceptRequested {
        ride_id: String,
    },
    DeclineRequested {
        ride_id: String,
    },
    ArrivalSignaled,
    PickupCompleted,
    StopStarted,
    StopEnded,
    CompletionRequested,
    ActionResponse {
        action: DriverAction,
        ride_id: String,
        result: Box<ApiResult>,
    },

    HistoryRefreshRequested,
    HistoryLoaded {
        result: Box<ApiResult>,
    },

    RealtimeConnectionChanged {
        connection: RealtimeConnection,
    },
    RealtimeEventArrived(RealtimePayload),
    RealtimeSubscriptionAck {
        channel: String,
        result: Box<RealtimeResult>,
    },

    LocationPermissionsLoaded {
        result: Box<LocationResult>,
    },
    LocationWatchAck {
        result: Box<LocationResult>,
    },
    LocationSampled {
        lat: f64,
        lng: f64,
        accuracy: Option<f64>,
    },
    LocationReported {
        result: Box<ApiResult>,
    },

    SummaryDismissed,
    AlertDismissed,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted => "app_started",
            Self::AppBackgrounded => "app_backgrounded",
            Self::StoredValueLoaded { .. } => "stored_value_loaded",
            Self::StoragePersisted { .. } => "storage_persisted",
            Self::SessionTokenProvided { .. } => "session_token_provided",
            Self::OnlineToggleRequested { .. } => "online_toggle_requested",
            Self::OnlineStatusResponse { .. } => "online_status_response",
            Self::NavAppSelected { .. } => "nav_app_selected",
            Self::SyncTick => "sync_tick",
            Self::CurrentRideSynced { .. } => "current_ride_synced",
            Self::OffersSynced { .. } => "offers_synced",
            Self::AcceptRequested { .. } => "accept_requested",
            Self::DeclineRequested { .. } => "decline_requested",
            Self::ArrivalSignaled => "arrival_signaled",
            Self::PickupCompleted => "pickup_completed",
            Self::StopStarted => "stop_started",
            Self::StopEnded => "stop_ended",
            Self::CompletionRequested => "completion_requested",
            Self::ActionResponse { .. } => "action_response",
            Self::HistoryRefreshRequested => "history_refresh_requested",
            Self::HistoryLoaded { .. } => "history_loaded",
            Self::RealtimeConnectionChanged { .. } => "realtime_connection_changed",
            Self::RealtimeEventArrived(_) => "realtime_event_arrived",
            Self::RealtimeSubscriptionAck { .. } => "realtime_subscription_ack",
            Self::LocationPermissionsLoaded { .. } => "location_permissions_loaded",
            Self::LocationWatchAck { .. } => "location_watch_ack",
            Self::LocationSampled { .. } => "location_sampled",
            Self::LocationReported { .. } => "location_reported",
            Self::SummaryDismissed => "summary_dismissed",
            Self::AlertDismissed => "alert_dismissed",
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::Noop
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OfferView {
    pub id: String,
    pub pickup_label: String,
    pub dropoff_label: String,
    pub fare: f64,
    pub service_type: crate::ride::ServiceType,
    pub has_baggage: bool,
    pub expires_in_s: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RideView {
    pub id: String,
    pub status: RideStatus,
    pub pickup_label: String,
    pub dropoff_label: String,
    pub fare: f64,
    pub driver_earnings: Option<f64>,
    pub service_type: crate::ride::ServiceType,
    pub has_baggage: bool,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub rider_name: Option<String>,
    pub rider_phone: Option<String>,
    pub is_stopped: bool,
    pub stop_elapsed_s: Option<u64>,
    pub total_stop_duration_s: u64,
    pub action_in_flight: bool,
    pub can_signal_arrival: bool,
    pub can_start_trip: bool,
    pub can_start_stop: bool,
    pub can_end_stop: bool,
    pub can_complete: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SummaryView {
    pub ride_id: String,
    pub fare: f64,
    pub driver_earnings: Option<f64>,
    pub rating: Option<f32>,
    pub tip: Option<f64>,
    pub payment_confirmed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryItemView {
    pub id: String,
    pub completed_at_ms: Option<u64>,
    pub pickup_label: String,
    pub dropoff_label: String,
    pub fare: f64,
    pub driver_earnings: Option<f64>,
    pub rating: Option<f32>,
    pub payment_confirmed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Screen {
    SessionExpired,
    Offline,
    Idle,
    ActiveRide(RideView),
    RideSummary(SummaryView),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlertView {
    pub message: String,
    pub kind: AlertKind,
    pub duration_ms: u64,
}

impl From<&AlertMessage> for AlertView {
    fn from(alert: &AlertMessage) -> Self {
        Self {
            message: alert.message.clone(),
            kind: alert.kind,
            duration_ms: alert.duration_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub screen: Screen,
    pub online: bool,
    pub realtime_connected: bool,
    pub nav_app: NavApp,
    pub offers: Vec<OfferView>,
    pub history: Vec<HistoryItemView>,
    pub alert: Option<AlertView>,
}

pub mod app {
    use super::*;
    use crate::capabilities::{
        ride_channel, Capabilities, RequestBuilder, WatchKind, BACKGROUND_PROFILE,
        FOREGROUND_PROFILE, PRESENCE_CHANNEL,
    };
    use crate::ride::{CompletionReceipt, RidePage, RidePayload, TransitionAck};

    #[derive(Default)]
    pub struct App;

    impl App {
        fn with_auth<'a>(
            builder: RequestBuilder<'a, Event>,
            model: &Model,
        ) -> RequestBuilder<'a, Event> {
            match &model.access_token {
                Some(token) => builder.bearer(token),
                None => builder,
            }
        }

        fn map_api_error(error: &ApiError) -> AppError {
            match error {
                ApiError::Network { message } => {
                    AppError::new(ErrorKind::Network, "Network error").with_internal(message)
                }
                ApiError::Timeout => AppError::new(ErrorKind::Timeout, "Request timed out"),
                ApiError::Cancelled => AppError::new(ErrorKind::Unknown, "Request cancelled"),
                ApiError::Other { message } => {
                    AppError::new(ErrorKind::Unknown, "Request failed").with_internal(message)
                }
            }
        }

        const fn action_error_message(error: &ActionError) -> &'static str {
            match error {
                ActionError::InFlight(_) => "Hang on, the previous action is still processing.",
                ActionError::NotFound(_) => "This ride is no longer available.",
                ActionError::InvalidState { .. } => "That action isn't available right now.",
            }
        }

        fn sync_current_ride(model: &mut Model, caps: &Capabilities, now_ms: u64) {
            let builder = caps.api.get("driver/current-ride").timeout(SYNC_TIMEOUT);
            Self::with_auth(builder, model).send(|result| Event::CurrentRideSynced {
                result: Box::new(result),
            });
            model.scheduler.mark_current_polled(now_ms);
        }

        fn poll_offers(model: &mut Model, caps: &Capabilities, now_ms: u64) {
            let builder = caps.api.get("driver/next-offer").timeout(SYNC_TIMEOUT);
            Self::with_auth(builder, model).send(|result| Event::OffersSynced {
                result: Box::new(result),
            });
            model.scheduler.mark_offers_polled(now_ms);
        }

        fn send_action(pending: &PendingAction, model: &Model, caps: &Capabilities) {
            let action = pending.action;
            let ride_id = pending.ride_id.0.clone();
            let builder = caps
                .api
                .post(action.path(&pending.ride_id))
                .header("Idempotency-Key", pending.idempotency_key.clone())
                .timeout(action.timeout());

            Self::with_auth(builder, model).send(move |result| Event::ActionResponse {
                action,
                ride_id,
                result: Box::new(result),
            });
        }

        fn send_status_update(online: bool, model: &Model, caps: &Capabilities) {
            let body = match serde_json::to_vec(&serde_json::json!({ "online": online })) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode status payload");
                    return;
                }
            };

            let builder = caps
                .api
                .post("driver/status")
                .body(body)
                .timeout(STATUS_TIMEOUT);
            Self::with_auth(builder, model).send(move |result| Event::OnlineStatusResponse {
                requested: online,
                result: Box::new(result),
            });
        }

        fn report_location(lat: f64, lng: f64, model: &Model, caps: &Capabilities) {
            let ride_id = model.current_ride.as_ref().map(|r| r.id.as_str());
            let body = match serde_json::to_vec(&serde_json::json!({
                "lat": lat,
                "lng": lng,
                "ride_id": ride_id,
            })) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode location payload");
                    return;
                }
            };

            let builder = caps
                .api
                .post("driver/location")
                .body(body)
                .timeout(LOCATION_REPORT_TIMEOUT);
            Self::with_auth(builder, model).send(|result| Event::LocationReported {
                result: Box::new(result),
            });
        }

        fn request_history(model: &Model, caps: &Capabilities) {
            let builder = caps
                .api
                .get(format!(
                    "driver/rides?status=completed&per_page={HISTORY_PAGE_SIZE}"
                ))
                .timeout(HISTORY_TIMEOUT);
            Self::with_auth(builder, model).send(|result| Event::HistoryLoaded {
                result: Box::new(result),
            });
        }

        fn persist(caps: &Capabilities, key: StoreKey, value: Vec<u8>) {
            caps.storage.write(key.key(), value, move |result| {
                Event::StoragePersisted {
                    key,
                    result: Box::new(result),
                }
            });
        }

        fn persist_online(model: &Model, caps: &Capabilities) {
            match serde_json::to_vec(&model.online) {
                Ok(bytes) => Self::persist(caps, StoreKey::Online, bytes),
                Err(e) => tracing::error!(error = %e, "failed to encode online flag"),
            }
        }

        fn persist_nav_app(model: &Model, caps: &Capabilities) {
            match serde_json::to_vec(&model.nav_app) {
                Ok(bytes) => Self::persist(caps, StoreKey::NavApp, bytes),
                Err(e) => tracing::error!(error = %e, "failed to encode nav preference"),
            }
        }

        fn persist_history(model: &Model, caps: &Capabilities) {
            match serde_json::to_vec(&model.sanitized_history()) {
                Ok(bytes) => Self::persist(caps, StoreKey::History, bytes),
                Err(e) => tracing::error!(error = %e, "failed to encode ride history"),
            }
        }

        /// Mirrors the current-ride id into storage for the background
        /// location task, which cannot see core memory.
        fn persist_active_ride_id(model: &Model, caps: &Capabilities) {
            match &model.current_ride {
                Some(ride) if !ride.status.is_terminal() => {
                    Self::persist(
                        caps,
                        StoreKey::ActiveRideId,
                        ride.id.as_str().as_bytes().to_vec(),
                    );
                }
                _ => {
                    caps.storage
                        .delete(StoreKey::ActiveRideId.key(), |result| {
                            Event::StoragePersisted {
                                key: StoreKey::ActiveRideId,
                                result: Box::new(result),
                            }
                        });
                }
            }
        }

        fn subscribe_ack(channel: String) -> impl FnOnce(RealtimeResult) -> Event {
            move |result| Event::RealtimeSubscriptionAck {
                channel,
                result: Box::new(result),
            }
        }

        fn watch_ack(result: LocationResult) -> Event {
            Event::LocationWatchAck {
                result: Box::new(result),
            }
        }

        fn go_online_side_effects(model: &mut Model, caps: &Capabilities) {
            if !model.presence_subscribed {
                model.presence_subscribed = true;
                caps.realtime.subscribe(
                    PRESENCE_CHANNEL,
                    Self::subscribe_ack(PRESENCE_CHANNEL.to_string()),
                );
            }

            caps.location
                .check_permissions(|result| Event::LocationPermissionsLoaded {
                    result: Box::new(result),
                });

            model.scheduler.request_immediate_offer_poll();
        }

        fn go_offline_side_effects(model: &mut Model, caps: &Capabilities) {
            if model.presence_subscribed {
                model.presence_subscribed = false;
                caps.realtime.unsubscribe(
                    PRESENCE_CHANNEL,
                    Self::subscribe_ack(PRESENCE_CHANNEL.to_string()),
                );
            }

            // The OS keeps the background registration alive unless it is
            // torn down explicitly, so both stops are always sent.
            model.foreground_watching = false;
            model.background_watching = false;
            caps.location
                .stop_watch(WatchKind::Foreground, Self::watch_ack);
            caps.location
                .stop_watch(WatchKind::Background, Self::watch_ack);

            model.scheduler.reset();
        }

        fn handle_unauthorized(model: &mut Model, caps: &Capabilities) {
            tracing::warn!("unauthorized response, resetting session");

            model.access_token = None;
            model.session_expired = true;
            model.online = false;
            model.current_ride = None;
            model.offers.clear();
            model.pending_actions.clear();

            if let Some(ride_id) = model.summary_channel.take() {
                caps.realtime.unsubscribe(
                    ride_channel(ride_id.as_str()),
                    Self::subscribe_ack(ride_channel(ride_id.as_str())),
                );
            }

            Self::go_offline_side_effects(model, caps);
            Self::persist_online(model, caps);
            Self::persist_active_ride_id(model, caps);
        }

        fn handle_stored_value(
            key: StoreKey,
            result: &StorageResult,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let bytes = match result {
                Ok(output) => output.value(),
                Err(e) => {
                    tracing::warn!(key = key.key(), error = %e, "restore read failed");
                    None
                }
            };

            match key {
                StoreKey::HistoryResetMarker => {
                    if bytes.is_some() {
                        caps.storage.read(StoreKey::History.key(), |result| {
                            Event::StoredValueLoaded {
                                key: StoreKey::History,
                                result: Box::new(result),
                            }
                        });
                    } else {
                        // First run after the upgrade that fixed the corrupted
                        // history cache: purge it once and stamp the marker.
                        tracing::info!("purging legacy history cache");
                        caps.storage
                            .delete(StoreKey::History.key(), |result| Event::StoragePersisted {
                                key: StoreKey::History,
                                result: Box::new(result),
                            });
                        Self::persist(caps, StoreKey::HistoryResetMarker, b"1".to_vec());
                    }
                }
                StoreKey::Online => {
                    let stored = bytes
                        .and_then(|b| serde_json::from_slice::<bool>(b).ok())
                        .unwrap_or(false);
                    if stored && !model.online {
                        model.online = true;
                        Self::go_online_side_effects(model, caps);
                    }
                }
                StoreKey::NavApp => {
                    if let Some(nav) = bytes.and_then(|b| serde_json::from_slice::<NavApp>(b).ok())
                    {
                        model.nav_app = nav;
                    }
                }
                StoreKey::History => {
                    match bytes.map(serde_json::from_slice::<Vec<Ride>>) {
                        Some(Ok(rides)) => {
                            model.merge_history(rides);
                            tracing::debug!(count = model.history.len(), "history restored");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "persisted history unreadable, dropping");
                        }
                        None => {}
                    }
                }
                StoreKey::ActiveRideId => {
                    // Written for the background task; the core never reads
                    // it back.
                    tracing::debug!("ignoring active-ride-id restore");
                }
            }
        }

        fn handle_current_ride_response(
            result: &ApiResult,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            match result {
                Ok(resp) if resp.is_unauthorized() => Self::handle_unauthorized(model, caps),

                Ok(resp) if resp.is_no_content() => {
                    // A transient server gap during a transition must not
                    // wipe an active ride, but an orphan cannot live forever
                    // either.
                    let preserve = model
                        .current_ride
                        .as_ref()
                        .map_or(false, |r| !r.status.is_terminal());

                    if preserve {
                        if model.scheduler.note_preserved(model.view_timestamp_ms) {
                            if let Some(ride) = model.current_ride.take() {
                                tracing::warn!(
                                    ride_id = %ride.id,
                                    "ride preserved past staleness window, dropping"
                                );
                            }
                            model.scheduler.clear_preserved();
                            Self::persist_active_ride_id(model, caps);
                        } else {
                            tracing::debug!("no server ride, preserving active local ride");
                        }
                    } else {
                        let had_ride = model.current_ride.take().is_some();
                        model.scheduler.clear_preserved();
                        if had_ride {
                            Self::persist_active_ride_id(model, caps);
                        }
                    }
                }

                Ok(resp) if resp.is_success() => {
                    match serde_json::from_slice::<RidePayload>(&resp.body) {
                        Ok(payload) => {
                            if let Some(ride) = payload.into_ride() {
                                model.scheduler.clear_preserved();
                                model.offers.retain(|o| o.ride.id != ride.id);
                                model.current_ride = Some(ride);
                                Self::persist_active_ride_id(model, caps);
                            } else {
                                tracing::warn!("current-ride payload missing id, ignoring");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to decode current-ride snapshot");
                        }
                    }
                }

                Ok(resp) => {
                    tracing::warn!(status = resp.status, "current-ride sync failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "current-ride sync error");
                }
            }
        }

        fn handle_offers_response(result: &ApiResult, model: &mut Model, caps: &Capabilities) {
            match result {
                Ok(resp) if resp.is_unauthorized() => Self::handle_unauthorized(model, caps),

                Ok(resp) if resp.is_success() => {
                    match serde_json::from_slice::<Vec<RidePayload>>(&resp.body) {
                        Ok(payloads) => {
                            let rides: Vec<Ride> =
                                payloads.into_iter().filter_map(RidePayload::into_ride).collect();
                            let added = model.merge_offers(rides, model.view_timestamp_ms);
                            if added > 0 {
                                tracing::info!(added, "new ride offers");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to decode offer list");
                        }
                    }
                }

                Ok(resp) => {
                    tracing::warn!(status = resp.status, "offer poll failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "offer poll error");
                }
            }
        }

        fn begin_offer_action(
            action: DriverAction,
            ride_id: &str,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let ride_id = RideId::new(ride_id);
            match model.begin_action(action, &ride_id, model.view_timestamp_ms) {
                Ok(pending) => {
                    if action == DriverAction::Accept {
                        Self::persist_active_ride_id(model, caps);
                    }
                    Self::send_action(&pending, model, caps);
                }
                Err(e) => {
                    tracing::warn!(ride_id = %ride_id, action = action.name(), error = %e, "action rejected");
                    model.show_alert(Self::action_error_message(&e), AlertKind::Warning);
                }
            }
        }

        fn begin_current_ride_action(
            action: DriverAction,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let Some(ride_id) = model.current_ride.as_ref().map(|r| r.id.clone()) else {
                tracing::warn!(action = action.name(), "no current ride for action");
                return;
            };

            match model.begin_action(action, &ride_id, model.view_timestamp_ms) {
                Ok(pending) => Self::send_action(&pending, model, caps),
                Err(e) => {
                    tracing::warn!(ride_id = %ride_id, action = action.name(), error = %e, "action rejected");
                    model.show_alert(Self::action_error_message(&e), AlertKind::Warning);
                }
            }
        }

        fn commit_action(
            action: DriverAction,
            ride_id: &RideId,
            body: &[u8],
            model: &mut Model,
            caps: &Capabilities,
        ) {
            match action {
                DriverAction::Accept => {
                    // The accept response may carry the authoritative ride.
                    if let Some(ride) = serde_json::from_slice::<RidePayload>(body)
                        .ok()
                        .and_then(RidePayload::into_ride)
                    {
                        if &ride.id == ride_id {
                            let mut ride = ride;
                            if ride.status == RideStatus::Incoming {
                                ride.status = RideStatus::Pickup;
                            }
                            model.current_ride = Some(ride);
                        }
                    }
                    Self::persist_active_ride_id(model, caps);
                    model.show_alert("Ride accepted", AlertKind::Success);
                }

                DriverAction::Decline | DriverAction::AutoDecline => {
                    // Removal was already applied optimistically.
                    tracing::debug!(ride_id = %ride_id, "decline confirmed");
                }

                DriverAction::SignalArrival
                | DriverAction::StartTrip
                | DriverAction::StartStop
                | DriverAction::EndStop => {
                    let ack: TransitionAck =
                        serde_json::from_slice(body).unwrap_or_default();
                    if let Some(ride) =
                        model.current_ride.as_mut().filter(|r| &r.id == ride_id)
                    {
                        if let Some(v) = ack.arrived_at {
                            ride.arrived_at = Some(UnixTimeMs(v));
                        }
                        if let Some(v) = ack.started_at {
                            ride.started_at = Some(UnixTimeMs(v));
                        }
                        if let Some(v) = ack.stop_started_at {
                            ride.stop_started_at = Some(UnixTimeMs(v));
                        }
                        if let Some(v) = ack.total_stop_duration_s {
                            ride.total_stop_duration_s = v;
                        }
                    }
                }

                DriverAction::Complete => {
                    let receipt: CompletionReceipt =
                        serde_json::from_slice(body).unwrap_or_default();

                    let completes_current = model
                        .current_ride
                        .as_ref()
                        .map_or(false, |r| &r.id == ride_id);
                    if let Some(mut ride) = completes_current
                        .then(|| model.current_ride.take())
                        .flatten()
                    {
                        if let Some(fare) = receipt.fare {
                            ride.fare = fare;
                        }
                        if let Some(earnings) = receipt.driver_earnings {
                            ride.driver_earnings = Some(earnings);
                        }
                        if let Some(total) = receipt.total_stop_duration_s {
                            ride.total_stop_duration_s = total;
                        }
                        ride.stop_started_at = None;
                        ride.status = RideStatus::Completed;

                        let id = ride.id.clone();
                        model.merge_history(vec![ride]);
                        model.summary_channel = Some(id.clone());
                        caps.realtime.subscribe(
                            ride_channel(id.as_str()),
                            Self::subscribe_ack(ride_channel(id.as_str())),
                        );

                        model.scheduler.clear_preserved();
                        Self::persist_history(model, caps);
                        Self::persist_active_ride_id(model, caps);
                        model.show_alert("Ride completed", AlertKind::Success);
                    }
                }
            }
        }

        fn fail_action(
            pending: PendingAction,
            error: &AppError,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let action = pending.action;
            tracing::warn!(
                ride_id = %pending.ride_id,
                action = action.name(),
                error = %error,
                "driver action failed"
            );

            if action.rolls_back_on_failure() {
                model.rollback_action(pending);
                Self::persist_active_ride_id(model, caps);
            }

            if action.alerts_user() {
                model.show_alert(error.user_facing_message(), AlertKind::Error);
            }
        }

        fn handle_action_response(
            action: DriverAction,
            ride_id: &str,
            result: &ApiResult,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let ride_id = RideId::new(ride_id);
            let Some(pending) = model.pending_actions.remove(&ride_id) else {
                tracing::warn!(
                    ride_id = %ride_id,
                    action = action.name(),
                    "response for unknown action, ignoring"
                );
                return;
            };

            match result {
                Ok(resp) if resp.is_unauthorized() => {
                    if action.rolls_back_on_failure() {
                        model.rollback_action(pending);
                    }
                    Self::handle_unauthorized(model, caps);
                }
                Ok(resp) if resp.is_success() => {
                    Self::commit_action(action, &ride_id, &resp.body, model, caps);
                }
                Ok(resp) => {
                    let error = AppError::from_http_status(resp.status, Some(&resp.body));
                    Self::fail_action(pending, &error, model, caps);
                }
                Err(e) => {
                    let error = Self::map_api_error(e);
                    Self::fail_action(pending, &error, model, caps);
                }
            }
        }

        fn handle_history_response(result: &ApiResult, model: &mut Model, caps: &Capabilities) {
            model.history_loading = false;

            match result {
                Ok(resp) if resp.is_unauthorized() => Self::handle_unauthorized(model, caps),

                Ok(resp) if resp.is_success() => {
                    match serde_json::from_slice::<RidePage>(&resp.body) {
                        Ok(page) => {
                            let rides: Vec<Ride> = page
                                .data
                                .into_iter()
                                .filter_map(RidePayload::into_ride)
                                .collect();
                            model.merge_history(rides);
                            Self::persist_history(model, caps);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to decode history page");
                        }
                    }
                }

                Ok(resp) => {
                    tracing::warn!(status = resp.status, "history fetch failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "history fetch error");
                }
            }
        }

        fn handle_realtime_payload(
            payload: RealtimePayload,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            match payload {
                RealtimePayload::RideRequested => {
                    model.scheduler.request_immediate_offer_poll();
                    if model.online && !model.session_expired {
                        let now = model.view_timestamp_ms;
                        Self::poll_offers(model, caps, now);
                    }
                }

                RealtimePayload::RideCancelled { ride_id } => {
                    let ride_id = RideId::new(ride_id);
                    model.pending_actions.remove(&ride_id);

                    if model.remove_offer(&ride_id).is_some() {
                        tracing::info!(ride_id = %ride_id, "offer withdrawn by server");
                    }

                    // A server-confirmed terminal fact: the slot is cleared
                    // unconditionally, nothing to roll back.
                    if model.current_ride.as_ref().map_or(false, |r| r.id == ride_id) {
                        model.current_ride = None;
                        model.scheduler.clear_preserved();
                        Self::persist_active_ride_id(model, caps);
                        model.show_alert("The ride was cancelled.", AlertKind::Warning);
                    }
                }

                RealtimePayload::RideRated {
                    ride_id,
                    rating,
                    tip,
                } => {
                    let ride_id = RideId::new(ride_id);
                    if let Some(ride) = model.history.iter_mut().find(|r| r.id == ride_id) {
                        ride.rating = Some(rating);
                        if tip.is_some() {
                            ride.tip = tip;
                        }
                        Self::persist_history(model, caps);
                    }
                }

                RealtimePayload::PaymentConfirmed { ride_id } => {
                    let ride_id = RideId::new(ride_id);
                    if let Some(ride) = model.history.iter_mut().find(|r| r.id == ride_id) {
                        ride.payment_confirmed = true;
                        Self::persist_history(model, caps);
                    }
                }
            }
        }

        fn handle_tick(model: &mut Model, caps: &Capabilities) {
            let now = model.view_timestamp_ms;

            if model.alert.as_ref().is_some_and(|a| a.is_expired(now)) {
                model.alert = None;
            }

            let expired: Vec<RideId> = model
                .pending_actions
                .iter()
                .filter(|(_, p)| p.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            for ride_id in expired {
                if let Some(pending) = model.pending_actions.remove(&ride_id) {
                    tracing::warn!(
                        ride_id = %ride_id,
                        action = pending.action.name(),
                        "pending action timed out, rolling back"
                    );
                    if pending.action.rolls_back_on_failure() {
                        model.rollback_action(pending);
                        Self::persist_active_ride_id(model, caps);
                    }
                }
            }

            let expired_offers: Vec<RideId> = model
                .offers
                .iter()
                .filter(|o| o.is_expired(now, OFFER_TIMEOUT_MS))
                .map(|o| o.ride.id.clone())
                .collect();
            for ride_id in expired_offers {
                match model.begin_action(DriverAction::AutoDecline, &ride_id, now) {
                    Ok(pending) => {
                        tracing::info!(ride_id = %ride_id, "offer timed out, auto-declining");
                        Self::send_action(&pending, model, caps);
                    }
                    Err(e) => {
                        tracing::debug!(ride_id = %ride_id, error = %e, "skipping auto-decline");
                    }
                }
            }

            if model.online && !model.session_expired {
                if model.scheduler.should_poll_current(now) {
                    Self::sync_current_ride(model, caps, now);
                }
                if model.scheduler.should_poll_offers(now, model.connection) {
                    Self::poll_offers(model, caps, now);
                }
            }
        }

        fn build_ride_view(model: &Model, ride: &Ride, now_ms: u64) -> RideView {
            let action_in_flight = model.pending_actions.contains_key(&ride.id);
            let idle = !action_in_flight;

            RideView {
                id: ride.id.0.clone(),
                status: ride.status,
                pickup_label: ride.pickup_label.clone(),
                dropoff_label: ride.dropoff_label.clone(),
                fare: ride.fare,
                driver_earnings: ride.driver_earnings,
                service_type: ride.service_type,
                has_baggage: ride.has_baggage,
                recipient_name: ride.recipient_name.clone(),
                recipient_phone: ride.recipient_phone.clone(),
                rider_name: ride.rider_name.clone(),
                rider_phone: ride.rider_phone.clone(),
                is_stopped: ride.is_stopped(),
                stop_elapsed_s: ride
                    .stop_started_at
                    .map(|t| now_ms.saturating_sub(t.0) / 1000),
                total_stop_duration_s: ride.total_stop_duration_s,
                action_in_flight,
                can_signal_arrival: idle && ride.status == RideStatus::Pickup,
                can_start_trip: idle && ride.status == RideStatus::Arrived,
                can_start_stop: idle && ride.status.is_active() && !ride.is_stopped(),
                can_end_stop: idle && ride.is_stopped(),
                can_complete: idle && ride.status == RideStatus::Ongoing,
            }
        }

        fn build_offer_views(model: &Model, now_ms: u64) -> Vec<OfferView> {
            model
                .offers
                .iter()
                .map(|offer| {
                    let elapsed = now_ms.saturating_sub(offer.received_at_ms);
                    OfferView {
                        id: offer.ride.id.0.clone(),
                        pickup_label: offer.ride.pickup_label.clone(),
                        dropoff_label: offer.ride.dropoff_label.clone(),
                        fare: offer.ride.fare,
                        service_type: offer.ride.service_type,
                        has_baggage: offer.ride.has_baggage,
                        expires_in_s: OFFER_TIMEOUT_MS.saturating_sub(elapsed) / 1000,
                    }
                })
                .collect()
        }

        fn build_history_views(model: &Model) -> Vec<HistoryItemView> {
            let mut items: Vec<HistoryItemView> = model
                .history
                .iter()
                .map(|ride| HistoryItemView {
                    id: ride.id.0.clone(),
                    completed_at_ms: ride.completed_at.map(|t| t.0),
                    pickup_label: ride.pickup_label.clone(),
                    dropoff_label: ride.dropoff_label.clone(),
                    fare: ride.fare,
                    driver_earnings: ride.driver_earnings,
                    rating: ride.rating,
                    payment_confirmed: ride.payment_confirmed,
                })
                .collect();
            items.sort_by(|a, b| b.completed_at_ms.cmp(&a.completed_at_ms));
            items
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            model.update_timestamp();
            tracing::debug!(event = event.name(), "handling event");

            match event {
                Event::Noop => {}

                Event::AppStarted => {
                    for key in [StoreKey::HistoryResetMarker, StoreKey::Online, StoreKey::NavApp]
                    {
                        caps.storage.read(key.key(), move |result| {
                            Event::StoredValueLoaded {
                                key,
                                result: Box::new(result),
                            }
                        });
                    }
                }

                Event::AppBackgrounded => {
                    Self::persist_online(model, caps);
                    Self::persist_history(model, caps);
                    Self::persist_active_ride_id(model, caps);
                }

                Event::StoredValueLoaded { key, result } => {
                    Self::handle_stored_value(key, &result, model, caps);
                }

                Event::StoragePersisted { key, result } => {
                    if let Err(e) = &*result {
                        tracing::warn!(key = key.key(), error = %e, "persist failed");
                    }
                }

                Event::SessionTokenProvided { token } => {
                    model.access_token = Some(token);
                    model.session_expired = false;
                }

                Event::OnlineToggleRequested { online } => {
                    if model.session_expired {
                        tracing::warn!("ignoring online toggle on expired session");
                    } else if model.online != online {
                        // Optimistic flip; the status POST confirms or rolls
                        // it back.
                        model.online = online;
                        if online {
                            Self::go_online_side_effects(model, caps);
                        } else {
                            Self::go_offline_side_effects(model, caps);
                        }
                        Self::persist_online(model, caps);
                        Self::send_status_update(online, model, caps);
                    }
                }

                Event::OnlineStatusResponse { requested, result } => match &*result {
                    Ok(resp) if resp.is_unauthorized() => Self::handle_unauthorized(model, caps),
                    Ok(resp) if resp.is_success() => {
                        tracing::debug!(online = requested, "availability confirmed");
                    }
                    other => {
                        match other {
                            Ok(resp) => tracing::warn!(
                                status = resp.status,
                                "availability update failed, rolling back"
                            ),
                            Err(e) => tracing::warn!(
                                error = %e,
                                "availability update error, rolling back"
                            ),
                        }
                        if model.online == requested {
                            model.online = !requested;
                            if model.online {
                                Self::go_online_side_effects(model, caps);
                            } else {
                                Self::go_offline_side_effects(model, caps);
                            }
                            Self::persist_online(model, caps);
                        }
                        model.show_alert(
                            "Could not update your availability. Please try again.",
                            AlertKind::Error,
                        );
                    }
                },

                Event::NavAppSelected { nav_app } => {
                    model.nav_app = nav_app;
                    Self::persist_nav_app(model, caps);
                }

                Event::SyncTick => Self::handle_tick(model, caps),

                Event::CurrentRideSynced { result } => {
                    Self::handle_current_ride_response(&result, model, caps);
                }

                Event::OffersSynced { result } => {
                    Self::handle_offers_response(&result, model, caps);
                }

                Event::AcceptRequested { ride_id } => {
                    Self::begin_offer_action(DriverAction::Accept, &ride_id, model, caps);
                }

                Event::DeclineRequested { ride_id } => {
                    Self::begin_offer_action(DriverAction::Decline, &ride_id, model, caps);
                }

                Event::ArrivalSignaled => {
                    Self::begin_current_ride_action(DriverAction::SignalArrival, model, caps);
                }

                Event::PickupCompleted => {
                    Self::begin_current_ride_action(DriverAction::StartTrip, model, caps);
                }

                Event::StopStarted => {
                    Self::begin_current_ride_action(DriverAction::StartStop, model, caps);
                }

                Event::StopEnded => {
                    Self::begin_current_ride_action(DriverAction::EndStop, model, caps);
                }

                Event::CompletionRequested => {
                    Self::begin_current_ride_action(DriverAction::Complete, model, caps);
                }

                Event::ActionResponse {
                    action,
                    ride_id,
                    result,
                } => {
                    Self::handle_action_response(action, &ride_id, &result, model, caps);
                }

                Event::HistoryRefreshRequested => {
                    if !model.history_loading {
                        model.history_loading = true;
                        Self::request_history(model, caps);
                    }
                }

                Event::HistoryLoaded { result } => {
                    Self::handle_history_response(&result, model, caps);
                }

                Event::RealtimeConnectionChanged { connection } => {
                    tracing::debug!(?connection, "realtime connection changed");
                    model.connection = connection;
                }

                Event::RealtimeEventArrived(payload) => {
                    Self::handle_realtime_payload(payload, model, caps);
                }

                Event::RealtimeSubscriptionAck { channel, result } => match &*result {
                    Ok(output) => {
                        tracing::debug!(channel = %channel, ?output, "subscription ack");
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "subscription failed");
                        if channel == PRESENCE_CHANNEL {
                            // The fast poll interval covers offers until the
                            // channel comes back.
                            model.presence_subscribed = false;
                        }
                    }
                },

                Event::LocationPermissionsLoaded { result } => match &*result {
                    Ok(output) => {
                        if let Some(perms) = output.permissions() {
                            model.location_permissions = perms;
                            if model.online {
                                if perms.foreground && !model.foreground_watching {
                                    model.foreground_watching = true;
                                    caps.location.start_watch(
                                        WatchKind::Foreground,
                                        FOREGROUND_PROFILE,
                                        Self::watch_ack,
                                    );
                                }
                                if perms.background && !model.background_watching {
                                    model.background_watching = true;
                                    caps.location.start_watch(
                                        WatchKind::Background,
                                        BACKGROUND_PROFILE,
                                        Self::watch_ack,
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "location permission check failed");
                        model.location_permissions = LocationPermissions::default();
                    }
                },

                Event::LocationWatchAck { result } => match &*result {
                    Ok(output) => tracing::debug!(?output, "location watch ack"),
                    Err(e) => tracing::warn!(error = %e, "location watch failed"),
                },

                Event::LocationSampled { lat, lng, accuracy } => {
                    if model.online {
                        tracing::trace!(lat, lng, ?accuracy, "location sample");
                        Self::report_location(lat, lng, model, caps);
                    }
                }

                Event::LocationReported { result } => match &*result {
                    // Location is best-effort telemetry: failures are logged
                    // and dropped, never retried, never surfaced.
                    Ok(resp) if resp.is_unauthorized() => Self::handle_unauthorized(model, caps),
                    Ok(resp) if !resp.is_success() => {
                        tracing::debug!(status = resp.status, "location report rejected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "location report failed");
                    }
                },

                Event::SummaryDismissed => {
                    if let Some(ride_id) = model.summary_channel.take() {
                        caps.realtime.unsubscribe(
                            ride_channel(ride_id.as_str()),
                            Self::subscribe_ack(ride_channel(ride_id.as_str())),
                        );
                    }
                }

                Event::AlertDismissed => {
                    model.clear_alert();
                }
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            let now = model.view_timestamp_ms;

            let screen = if model.session_expired {
                Screen::SessionExpired
            } else if let Some(ride) = &model.current_ride {
                Screen::ActiveRide(Self::build_ride_view(model, ride, now))
            } else if let Some(summary) = model
                .summary_channel
                .as_ref()
                .and_then(|id| model.history.iter().find(|r| &r.id == id))
            {
                Screen::RideSummary(SummaryView {
                    ride_id: summary.id.0.clone(),
                    fare: summary.fare,
                    driver_earnings: summary.driver_earnings,
                    rating: summary.rating,
                    tip: summary.tip,
                    payment_confirmed: summary.payment_confirmed,
                })
            } else if model.online {
                Screen::Idle
            } else {
                Screen::Offline
            };

            ViewModel {
                screen,
                online: model.online,
                realtime_connected: model.connection.is_healthy(),
                nav_app: model.nav_app,
                offers: Self::build_offer_views(model, now),
                history: Self::build_history_views(model),
                alert: model.alert.as_ref().map(AlertView::from),
            }
        }
    }
}
