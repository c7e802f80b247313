use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Foreground watch: high accuracy, tight thresholds while the app is
/// active.
pub const FOREGROUND_PROFILE: WatchProfile = WatchProfile {
    interval_ms: 3_000,
    min_distance_m: 10,
};

/// Background watch: coarser cadence; the OS task reads the active ride id
/// from persistent storage, not from core memory.
pub const BACKGROUND_PROFILE: WatchProfile = WatchProfile {
    interval_ms: 10_000,
    min_distance_m: 20,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchProfile {
    pub interval_ms: u64,
    pub min_distance_m: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocationPermissions {
    pub foreground: bool,
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum LocationOperation {
    CheckPermissions,
    StartWatch {
        kind: WatchKind,
        profile: WatchProfile,
    },
    StopWatch {
        kind: WatchKind,
    },
}

impl Operation for LocationOperation {
    type Output = LocationResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LocationOutput {
    Permissions(LocationPermissions),
    WatchStarted(WatchKind),
    WatchStopped(WatchKind),
}

impl LocationOutput {
    #[must_use]
    pub const fn permissions(&self) -> Option<LocationPermissions> {
        match self {
            Self::Permissions(p) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location services disabled")]
    ServicesDisabled,

    #[error("location error: {message}")]
    Unknown { message: String },
}

pub type LocationResult = Result<LocationOutput, LocationError>;

#[derive(Clone)]
pub struct Location<Ev> {
    context: CapabilityContext<LocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for Location<Ev> {
    type Operation = LocationOperation;
    type MappedSelf<MappedEv> = Location<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Location::new(self.context.map_event(f))
    }
}

impl<Ev> Location<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<LocationOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn check_permissions<F>(&self, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + Sync + 'static,
    {
        self.request(LocationOperation::CheckPermissions, make_event);
    }

    pub fn start_watch<F>(&self, kind: WatchKind, profile: WatchProfile, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + Sync + 'static,
    {
        self.request(LocationOperation::StartWatch { kind, profile }, make_event);
    }

    pub fn stop_watch<F>(&self, kind: WatchKind, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + Sync + 'static,
    {
        self.request(LocationOperation::StopWatch { kind }, make_event);
    }

    fn request<F>(&self, operation: LocationOperation, make_event: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
