use crux_core::testing::AppTester;
use driver_core::capabilities::{ApiResponse, StorageOperation, StorageOutput};
use driver_core::ride::{RidePayload, RideStatus};
use driver_core::sync::RealtimeConnection;
use driver_core::{get_current_time_ms, App, Effect, Event, Model, StoreKey};

fn ride(id: &str, status: &str) -> driver_core::ride::Ride {
    RidePayload {
        id: Some(id.into()),
        status: Some(status.into()),
        pickup_address: "A".into(),
        dropoff_address: "B".into(),
        fare: 12.0,
        ..RidePayload::default()
    }
    .into_ride()
    .unwrap()
}

fn ok(status: u16, body: serde_json::Value) -> Box<driver_core::capabilities::ApiResult> {
    Box::new(Ok(ApiResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    }))
}

fn empty(status: u16) -> Box<driver_core::capabilities::ApiResult> {
    Box::new(Ok(ApiResponse {
        status,
        body: vec![],
    }))
}

fn api_paths(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Api(req) => Some(req.operation.path.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn offer_poll_merges_additively_and_dedupes() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.merge_offers(vec![ride("1", "requested")], get_current_time_ms());

    let body = serde_json::json!([
        { "id": "1", "status": "requested", "fare": 99.0 },
        { "id": "2", "status": "requested", "fare": 14.0 },
        { "id": "2", "status": "requested", "fare": 15.0 },
        { "id": "3", "status": "ongoing" },
        { "status": "requested" }
    ]);
    let _ = app.update(Event::OffersSynced { result: ok(200, body) }, &mut model);

    assert_eq!(model.offers.len(), 2);
    assert_eq!(model.offers[0].ride.id.as_str(), "1");
    // the existing offer's fields were not replaced
    assert!((model.offers[0].ride.fare - 12.0).abs() < f64::EPSILON);
    assert_eq!(model.offers[1].ride.id.as_str(), "2");
}

#[test]
fn http_204_preserves_an_active_local_ride() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.current_ride = Some(ride("7", "ongoing"));
    let before = model.current_ride.clone();

    let _ = app.update(Event::CurrentRideSynced { result: empty(204) }, &mut model);

    assert_eq!(model.current_ride, before);
    assert!(model.scheduler.preserved_since_ms.is_some());
}

#[test]
fn http_204_clears_a_terminal_or_absent_ride() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.current_ride = Some(ride("7", "completed"));

    let _ = app.update(Event::CurrentRideSynced { result: empty(204) }, &mut model);
    assert!(model.current_ride.is_none());

    let _ = app.update(Event::CurrentRideSynced { result: empty(204) }, &mut model);
    assert!(model.current_ride.is_none());
}

#[test]
fn http_200_replaces_the_slot_unconditionally() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.current_ride = Some(ride("7", "pickup"));

    let _ = app.update(
        Event::CurrentRideSynced {
            result: ok(
                200,
                serde_json::json!({ "id": "9", "status": "ongoing", "fare": 20.0 }),
            ),
        },
        &mut model,
    );

    let current = model.current_ride.as_ref().unwrap();
    assert_eq!(current.id.as_str(), "9");
    assert_eq!(current.status, RideStatus::Ongoing);
}

#[test]
fn healthy_realtime_channel_slows_the_offer_poll() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;

    let now = get_current_time_ms();
    model.scheduler.mark_current_polled(now);
    // 15s since the last offer poll: due at the fast cadence, not the slow one
    model.scheduler.last_offer_poll_ms = Some(now.saturating_sub(15_000));

    let _ = app.update(
        Event::RealtimeConnectionChanged {
            connection: RealtimeConnection::Connected,
        },
        &mut model,
    );
    let update = app.update(Event::SyncTick, &mut model);
    assert!(
        !api_paths(&update.effects)
            .iter()
            .any(|p| p == "driver/next-offer"),
        "connected channel must stretch the poll interval"
    );

    model.scheduler.last_offer_poll_ms = Some(get_current_time_ms().saturating_sub(15_000));
    let _ = app.update(
        Event::RealtimeConnectionChanged {
            connection: RealtimeConnection::Disconnected,
        },
        &mut model,
    );
    let update = app.update(Event::SyncTick, &mut model);
    assert!(
        api_paths(&update.effects)
            .iter()
            .any(|p| p == "driver/next-offer"),
        "disconnected channel falls back to the fast poll"
    );
}

#[test]
fn ride_requested_push_triggers_an_immediate_poll() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.connection = RealtimeConnection::Connected;

    let now = get_current_time_ms();
    model.scheduler.mark_offers_polled(now);
    model.scheduler.mark_current_polled(now);

    let update = app.update(
        Event::RealtimeEventArrived(driver_core::RealtimePayload::RideRequested),
        &mut model,
    );

    assert!(api_paths(&update.effects)
        .iter()
        .any(|p| p == "driver/next-offer"));
}

#[test]
fn history_page_merges_with_local_entries() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.history.push(ride("1", "completed"));

    let body = serde_json::json!({
        "data": [
            { "id": "1", "status": "completed", "fare": 10.0 },
            { "id": "2", "status": "completed", "fare": 22.0 }
        ]
    });
    let _ = app.update(Event::HistoryLoaded { result: ok(200, body) }, &mut model);

    assert_eq!(model.history.len(), 2);
    let ids: Vec<&str> = model.history.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"1"));
    assert!(ids.contains(&"2"));
    assert!(!model.history_loading);
}

#[test]
fn history_refresh_is_not_issued_twice_concurrently() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;

    let first = app.update(Event::HistoryRefreshRequested, &mut model);
    assert!(api_paths(&first.effects)
        .iter()
        .any(|p| p.starts_with("driver/rides?status=completed")));

    let second = app.update(Event::HistoryRefreshRequested, &mut model);
    assert!(api_paths(&second.effects).is_empty());
}

#[test]
fn provided_token_is_stamped_onto_requests() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let _ = app.update(
        Event::SessionTokenProvided {
            token: "t0k3n".into(),
        },
        &mut model,
    );
    model.online = true;

    let update = app.update(Event::HistoryRefreshRequested, &mut model);
    let request = update
        .effects
        .iter()
        .find_map(|e| match e {
            Effect::Api(req) => Some(&req.operation),
            _ => None,
        })
        .expect("history request sent");

    assert!(request
        .headers
        .iter()
        .any(|(name, value)| name == "Authorization" && value == "Bearer t0k3n"));
}

#[test]
fn unauthorized_response_resets_the_session() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.access_token = Some("token".into());
    model.online = true;
    model.presence_subscribed = true;
    model.current_ride = Some(ride("7", "pickup"));
    model.merge_offers(vec![ride("8", "requested")], get_current_time_ms());

    let _ = app.update(Event::OffersSynced { result: empty(401) }, &mut model);

    assert!(model.session_expired);
    assert_eq!(model.access_token, None);
    assert!(!model.online);
    assert!(model.current_ride.is_none());
    assert!(model.offers.is_empty());
    assert!(!model.presence_subscribed);
}

#[test]
fn first_run_purges_the_legacy_history_cache() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(Event::AppStarted, &mut model);
    let reads: Vec<String> = update
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Storage(req) => match &req.operation {
                StorageOperation::Read { key } => Some(key.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert!(reads.contains(&"driver.history_reset.v2".to_string()));
    assert!(reads.contains(&"driver.online".to_string()));
    assert!(reads.contains(&"driver.nav_app".to_string()));

    // marker absent: purge once and stamp it
    let update = app.update(
        Event::StoredValueLoaded {
            key: StoreKey::HistoryResetMarker,
            result: Box::new(Ok(StorageOutput::Value(None))),
        },
        &mut model,
    );
    let mut purged = false;
    let mut stamped = false;
    for effect in &update.effects {
        if let Effect::Storage(req) = effect {
            match &req.operation {
                StorageOperation::Delete { key } if key == "driver.ride_history" => purged = true,
                StorageOperation::Write { key, .. } if key == "driver.history_reset.v2" => {
                    stamped = true;
                }
                _ => {}
            }
        }
    }
    assert!(purged);
    assert!(stamped);

    // marker present: history is read instead
    let update = app.update(
        Event::StoredValueLoaded {
            key: StoreKey::HistoryResetMarker,
            result: Box::new(Ok(StorageOutput::Value(Some(b"1".to_vec())))),
        },
        &mut model,
    );
    let reads_history = update.effects.iter().any(|e| match e {
        Effect::Storage(req) => matches!(
            &req.operation,
            StorageOperation::Read { key } if key == "driver.ride_history"
        ),
        _ => false,
    });
    assert!(reads_history);
}

#[test]
fn restored_online_flag_restarts_the_reporters() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::StoredValueLoaded {
            key: StoreKey::Online,
            result: Box::new(Ok(StorageOutput::Value(Some(b"true".to_vec())))),
        },
        &mut model,
    );

    assert!(model.online);
    assert!(model.presence_subscribed);
    let checks_permissions = update.effects.iter().any(|e| match e {
        Effect::Location(req) => matches!(
            req.operation,
            driver_core::capabilities::LocationOperation::CheckPermissions
        ),
        _ => false,
    });
    assert!(checks_permissions);
}

#[test]
fn restored_history_is_filtered_to_completed() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let stored = vec![ride("1", "completed"), ride("2", "ongoing")];
    let bytes = serde_json::to_vec(&stored).unwrap();
    let _ = app.update(
        Event::StoredValueLoaded {
            key: StoreKey::History,
            result: Box::new(Ok(StorageOutput::Value(Some(bytes)))),
        },
        &mut model,
    );

    assert_eq!(model.history.len(), 1);
    assert_eq!(model.history[0].id.as_str(), "1");
}

#[test]
fn going_online_subscribes_and_going_offline_tears_down() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(Event::OnlineToggleRequested { online: true }, &mut model);
    assert!(model.online);
    assert!(model.presence_subscribed);
    assert!(api_paths(&update.effects).iter().any(|p| p == "driver/status"));

    let update = app.update(Event::OnlineToggleRequested { online: false }, &mut model);
    assert!(!model.online);
    assert!(!model.presence_subscribed);

    // both watchers are stopped explicitly
    let stops: Vec<_> = update
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Location(req) => match req.operation {
                driver_core::capabilities::LocationOperation::StopWatch { kind } => Some(kind),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert!(stops.contains(&driver_core::capabilities::WatchKind::Foreground));
    assert!(stops.contains(&driver_core::capabilities::WatchKind::Background));
}

#[test]
fn failed_status_post_rolls_the_flag_back() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let _ = app.update(Event::OnlineToggleRequested { online: true }, &mut model);
    assert!(model.online);

    let _ = app.update(
        Event::OnlineStatusResponse {
            requested: true,
            result: empty(500),
        },
        &mut model,
    );

    assert!(!model.online);
    assert!(model.alert.is_some());
}

#[test]
fn location_samples_are_posted_with_the_ride_id() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.online = true;
    model.current_ride = Some(ride("7", "ongoing"));

    let update = app.update(
        Event::LocationSampled {
            lat: 48.85,
            lng: 2.35,
            accuracy: Some(5.0),
        },
        &mut model,
    );

    let request = update
        .effects
        .iter()
        .find_map(|e| match e {
            Effect::Api(req) => Some(&req.operation),
            _ => None,
        })
        .expect("location report sent");
    assert_eq!(request.path, "driver/location");

    let body: serde_json::Value =
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["ride_id"], "7");

    // offline samples are dropped
    model.online = false;
    let update = app.update(
        Event::LocationSampled {
            lat: 48.85,
            lng: 2.35,
            accuracy: None,
        },
        &mut model,
    );
    assert!(api_paths(&update.effects).is_empty());
}
