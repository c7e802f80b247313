mod api;
mod kv;
mod location;
mod realtime;

pub use self::api::{Api, ApiError, ApiRequest, ApiResponse, ApiResult, Method, RequestBuilder};
pub use self::kv::{keys, Storage, StorageError, StorageOperation, StorageOutput, StorageResult};
pub use self::location::{
    Location, LocationError, LocationOperation, LocationOutput, LocationPermissions,
    LocationResult, WatchKind, WatchProfile, BACKGROUND_PROFILE, FOREGROUND_PROFILE,
};
pub use self::realtime::{
    ride_channel, Realtime, RealtimeError, RealtimeOperation, RealtimeOutput, RealtimeResult,
    PRESENCE_CHANNEL,
};

pub use crux_core::render::Render;

use crate::{App, Event};

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub api: Api<Event>,
    pub storage: Storage<Event>,
    pub realtime: Realtime<Event>,
    pub location: Location<Event>,
}
