use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use delivery_coordinator::api::rest::router;
use delivery_coordinator::config::CoordinatorSettings;
use delivery_coordinator::engine::dispatch::run_dispatch_engine;
use delivery_coordinator::engine::offers;
use delivery_coordinator::error::AppError;
use delivery_coordinator::ledger;
use delivery_coordinator::models::delivery::{
    ContactInfo, Delivery, DeliveryStatus, PackageInfo, Quote,
};
use delivery_coordinator::models::driver::{Driver, VehicleType};
use delivery_coordinator::models::location::{GeoPoint, GpsFix};
use delivery_coordinator::state::AppState;

fn setup() -> (axum::Router, mpsc::Receiver<Uuid>) {
    let (state, rx) = AppState::new(CoordinatorSettings::default());
    (router(Arc::new(state)), rx)
}

fn setup_with_engine() -> (Arc<AppState>, axum::Router) {
    let (state, rx) = AppState::new(CoordinatorSettings::default());
    let shared = Arc::new(state);
    tokio::spawn(run_dispatch_engine(shared.clone(), rx));
    (shared.clone(), router(shared))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn empty_post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn online_driver(app: &axum::Router, name: &str, lat: f64, lng: f64) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": name, "vehicle": "Motorcycle" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    let id = driver["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(empty_post(&format!("/drivers/{id}/verify")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/drivers/{id}/online"),
            json!({ "lat": lat, "lng": lng, "speed_kmh": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    id
}

async fn create_delivery(app: &axum::Router, pickup: (f64, f64), dropoff: (f64, f64)) -> Value {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/deliveries",
            json!({
                "customer_id": Uuid::new_v4(),
                "vehicle": "Motorcycle",
                "pickup": { "lat": pickup.0, "lng": pickup.1 },
                "dropoff": { "lat": dropoff.0, "lng": dropoff.1 },
                "pickup_contact": { "name": "Ana", "phone": "+63-900-000-0001" },
                "dropoff_contact": { "name": "Ben", "phone": "+63-900-000-0002" },
                "package": { "description": "documents", "weight_kg": 0.5 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn get_delivery(app: &axum::Router, id: &str) -> Value {
    let res = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drivers"], 0);
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["active_location_streams"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _rx) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("deliveries_in_queue"));
    assert!(body.contains("active_location_streams"));
}

#[tokio::test]
async fn registered_driver_starts_unverified_and_offline() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": "Carla", "vehicle": "Sedan" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "Carla");
    assert_eq!(body["verified"], false);
    assert_eq!(body["online"], false);
    assert_eq!(body["available"], false);
    assert!(body["last_fix"].is_null());
}

#[tokio::test]
async fn register_driver_empty_name_returns_400() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": "  ", "vehicle": "Sedan" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unverified_driver_cannot_go_online() {
    let (app, _rx) = setup();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": "Dan", "vehicle": "Van" }),
        ))
        .await
        .unwrap();
    let driver = body_json(res).await;
    let id = driver["id"].as_str().unwrap();

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/drivers/{id}/online"),
            json!({ "lat": 14.5995, "lng": 121.0244 }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn going_online_with_unusable_fix_is_rejected() {
    let (app, _rx) = setup();
    let id = {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/drivers",
                json!({ "name": "Eva", "vehicle": "Motorcycle" }),
            ))
            .await
            .unwrap();
        let driver = body_json(res).await;
        driver["id"].as_str().unwrap().to_string()
    };

    app.clone()
        .oneshot(empty_post(&format!("/drivers/{id}/verify")))
        .await
        .unwrap();

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/drivers/{id}/online"),
            json!({ "lat": 94.0, "lng": 121.0244 }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn online_offline_round_trip_clears_coordinates() {
    let (app, _rx) = setup();
    let id = online_driver(&app, "Flor", 14.5995, 121.0244).await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["online"], true);
    assert_eq!(driver["available"], true);
    assert_eq!(driver["last_fix"]["point"]["lat"], 14.5995);
    assert_eq!(driver["last_fix"]["point"]["lng"], 121.0244);

    let res = app
        .clone()
        .oneshot(empty_post(&format!("/drivers/{id}/offline")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    assert_eq!(driver["online"], false);
    assert_eq!(driver["available"], false);
    assert!(driver["last_fix"].is_null());
}

#[tokio::test]
async fn create_delivery_returns_pending_with_quote() {
    let (app, _rx) = setup();
    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;

    assert_eq!(delivery["status"], "pending");
    assert!(delivery["driver_id"].is_null());
    assert!(delivery["quote"]["distance_km"].as_f64().unwrap() > 4.0);
    assert!(delivery["quote"]["price"].as_f64().unwrap() > 49.0);
    assert!(delivery["quote"]["duration_min"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn create_delivery_rejects_bad_coordinates() {
    let (app, _rx) = setup();
    let res = app
        .oneshot(json_request(
            "POST",
            "/deliveries",
            json!({
                "customer_id": Uuid::new_v4(),
                "vehicle": "Motorcycle",
                "pickup": { "lat": 200.0, "lng": 121.0 },
                "dropoff": { "lat": 14.55, "lng": 121.02 },
                "pickup_contact": { "name": "Ana", "phone": "1" },
                "dropoff_contact": { "name": "Ben", "phone": "2" },
                "package": { "description": "box" }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_nonexistent_delivery_returns_404() {
    let (app, _rx) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/deliveries/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn offline_driver_is_never_offered() {
    let (_state, app) = setup_with_engine();

    // verified but never went online
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": "Gio", "vehicle": "Motorcycle" }),
        ))
        .await
        .unwrap();
    let driver = body_json(res).await;
    let id = driver["id"].as_str().unwrap().to_string();
    app.clone()
        .oneshot(empty_post(&format!("/drivers/{id}/verify")))
        .await
        .unwrap();

    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let delivery = get_delivery(&app, &delivery_id).await;
    assert_eq!(delivery["status"], "pending");
    assert!(delivery["driver_id"].is_null());
}

#[tokio::test]
async fn full_offer_accept_and_delivery_flow() {
    let (_state, app) = setup_with_engine();
    let driver_id = online_driver(&app, "Hana", 14.5995, 121.0244).await;

    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let delivery = get_delivery(&app, &delivery_id).await;
    assert_eq!(delivery["status"], "driver_offered");
    assert_eq!(delivery["driver_id"], driver_id);
    assert!(!delivery["offered_at"].is_null());

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let delivery = body_json(res).await;
    assert_eq!(delivery["status"], "driver_assigned");

    // accepting marked the driver busy and started the location stream
    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["available"], false);

    let res = app.clone().oneshot(get_request("/health")).await.unwrap();
    let health = body_json(res).await;
    assert_eq!(health["active_location_streams"], 1);

    for next in ["pickup_arrived", "package_collected", "in_transit"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/deliveries/{delivery_id}/advance"),
                json!({ "driver_id": driver_id, "status": next }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["status"], next);
    }

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/complete"),
            json!({
                "driver_id": driver_id,
                "proof": {
                    "recipient_name": "Ben",
                    "photo_url": "https://cdn.example/pod/1.jpg",
                    "signature": null,
                    "notes": "left with guard"
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let delivery = body_json(res).await;
    assert_eq!(delivery["status"], "delivered");
    assert_eq!(delivery["proof"]["recipient_name"], "Ben");
    assert!(!delivery["delivered_at"].is_null());

    // only the two milestones produced durable rows
    let res = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/events")))
        .await
        .unwrap();
    let events = body_json(res).await;
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "pickup_confirmed");
    assert_eq!(events[1]["event"], "delivery_confirmed");

    // driver freed, stream torn down
    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["available"], true);

    let res = app.oneshot(get_request("/health")).await.unwrap();
    let health = body_json(res).await;
    assert_eq!(health["active_location_streams"], 0);
}

#[tokio::test]
async fn stage_skipping_is_rejected_at_the_state_machine() {
    let (_state, app) = setup_with_engine();
    let driver_id = online_driver(&app, "Iris", 14.5995, 121.0244).await;

    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();

    // driver_assigned -> in_transit skips pickup stages
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/advance"),
            json!({ "driver_id": driver_id, "status": "in_transit" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // completing straight from driver_assigned is rejected too
    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/complete"),
            json!({ "driver_id": driver_id, "proof": { "recipient_name": "Ben" } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn accept_from_non_offered_driver_returns_conflict() {
    let (_state, app) = setup_with_engine();

    // nearest driver sits on the pickup point and wins deterministically
    let near = online_driver(&app, "Near", 14.5995, 121.0244).await;
    let far = online_driver(&app, "Far", 14.7000, 121.1000).await;

    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let delivery = get_delivery(&app, &delivery_id).await;
    assert_eq!(delivery["driver_id"], near);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "driver_id": far }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "driver_id": near }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn decline_resets_delivery_and_redispatches_to_another_driver() {
    let (_state, app) = setup_with_engine();

    let near = online_driver(&app, "Near", 14.5995, 121.0244).await;
    let far = online_driver(&app, "Far", 14.6200, 121.0500).await;

    let delivery = create_delivery(&app, (14.5995, 121.0244), (14.5547, 121.0244)).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let delivery = get_delivery(&app, &delivery_id).await;
    assert_eq!(delivery["driver_id"], near);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/decline"),
            json!({ "driver_id": near }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let declined = body_json(res).await;
    assert_eq!(declined["status"], "pending");
    assert!(declined["driver_id"].is_null());

    // the decliner is skipped on the next attempt
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let delivery = get_delivery(&app, &delivery_id).await;
    assert_eq!(delivery["status"], "driver_offered");
    assert_eq!(delivery["driver_id"], far);
}

// -- direct-engine scenarios -------------------------------------------------

fn seed_driver(state: &AppState, id_seed: u128, lat: f64, lng: f64) -> Uuid {
    let id = Uuid::from_u128(id_seed);
    state.drivers.insert(
        id,
        Driver {
            id,
            name: format!("driver-{id_seed}"),
            vehicle: VehicleType::Motorcycle,
            verified: true,
            online: true,
            available: true,
            last_fix: Some(GpsFix {
                point: GeoPoint { lat, lng },
                speed_kmh: 0.0,
                heading: None,
                accuracy_m: None,
                recorded_at: Utc::now(),
            }),
            updated_at: Utc::now(),
        },
    );
    id
}

fn seed_offered_delivery(state: &AppState, driver_id: Uuid, offered_secs_ago: i64) -> Uuid {
    let pickup = GeoPoint {
        lat: 14.5995,
        lng: 121.0244,
    };
    let dropoff = GeoPoint {
        lat: 14.5547,
        lng: 121.0244,
    };
    let delivery = Delivery {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        driver_id: Some(driver_id),
        vehicle: VehicleType::Motorcycle,
        quote: Quote::for_route(&pickup, &dropoff, VehicleType::Motorcycle),
        pickup,
        dropoff,
        pickup_contact: ContactInfo {
            name: "Ana".to_string(),
            phone: "+63-900-000-0001".to_string(),
        },
        dropoff_contact: ContactInfo {
            name: "Ben".to_string(),
            phone: "+63-900-000-0002".to_string(),
        },
        package: PackageInfo {
            description: "documents".to_string(),
            weight_kg: None,
        },
        status: DeliveryStatus::DriverOffered,
        declined_by: Vec::new(),
        proof: None,
        created_at: Utc::now(),
        offered_at: Some(Utc::now() - Duration::seconds(offered_secs_ago)),
        assigned_at: None,
        picked_up_at: None,
        delivered_at: None,
    };
    let id = delivery.id;
    state.deliveries.insert(id, delivery);
    id
}

#[tokio::test]
async fn concurrent_accepts_on_one_offer_yield_exactly_one_winner() {
    let (state, _rx) = AppState::new(CoordinatorSettings::default());
    let state = Arc::new(state);
    let driver_id = seed_driver(&state, 1, 14.5995, 121.0244);
    let delivery_id = seed_offered_delivery(&state, driver_id, 0);

    let a = {
        let state = state.clone();
        tokio::spawn(async move { offers::accept(&state, delivery_id, driver_id) })
    };
    let b = {
        let state = state.clone();
        tokio::spawn(async move { offers::accept(&state, delivery_id, driver_id) })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let losses = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::OfferExpired)))
        .count();

    assert_eq!(wins, 1);
    assert_eq!(losses, 1);

    let delivery = state.deliveries.get(&delivery_id).unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DriverAssigned);
    assert_eq!(delivery.driver_id, Some(driver_id));
}

#[tokio::test]
async fn timeout_sweep_and_manual_decline_produce_the_same_end_state() {
    let settings = CoordinatorSettings {
        offer_timeout_secs: 60,
        ..CoordinatorSettings::default()
    };
    let (state, _rx) = AppState::new(settings);
    let state = Arc::new(state);
    let driver_id = seed_driver(&state, 1, 14.5995, 121.0244);

    let declined_id = seed_offered_delivery(&state, driver_id, 0);
    let expired_id = seed_offered_delivery(&state, driver_id, 120);

    offers::decline(&state, declined_id, driver_id).await.unwrap();
    let released = offers::sweep_expired_offers(&state).await;
    assert_eq!(released, 1);

    for id in [declined_id, expired_id] {
        let delivery = state.deliveries.get(&id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.driver_id, None);
        assert_eq!(delivery.offered_at, None);
        assert!(delivery.declined_by.contains(&driver_id));
    }
}

#[tokio::test]
async fn sweep_leaves_fresh_offers_alone() {
    let settings = CoordinatorSettings {
        offer_timeout_secs: 300,
        ..CoordinatorSettings::default()
    };
    let (state, _rx) = AppState::new(settings);
    let state = Arc::new(state);
    let driver_id = seed_driver(&state, 1, 14.5995, 121.0244);
    let delivery_id = seed_offered_delivery(&state, driver_id, 10);

    let released = offers::sweep_expired_offers(&state).await;

    assert_eq!(released, 0);
    let delivery = state.deliveries.get(&delivery_id).unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DriverOffered);
    assert_eq!(delivery.driver_id, Some(driver_id));
}

#[tokio::test]
async fn going_offline_stops_the_location_stream() {
    let (state, _rx) = AppState::new(CoordinatorSettings::default());
    let state = Arc::new(state);
    let driver_id = seed_driver(&state, 1, 14.5995, 121.0244);
    let delivery_id = seed_offered_delivery(&state, driver_id, 0);

    offers::accept(&state, delivery_id, driver_id).unwrap();
    assert!(state.streams.get(&delivery_id).is_some());

    let mut feed = state.topics.subscribe_location_feed(delivery_id);

    ledger::set_offline(&state, driver_id).unwrap();

    assert!(state.streams.get(&delivery_id).is_none());
    assert_eq!(state.metrics.active_location_streams.get(), 0);

    // feed closes once buffered samples are drained; no new ones arrive
    let deadline = std::time::Duration::from_secs(1);
    let drained = tokio::time::timeout(deadline, async {
        loop {
            if feed.recv().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(drained.is_ok());

    // the durable log never saw the routine samples
    assert!(state.critical_events.get(&delivery_id).is_none());
}

#[tokio::test]
async fn cancelling_an_offered_delivery_withdraws_the_offer() {
    let (state, _rx) = AppState::new(CoordinatorSettings::default());
    let state = Arc::new(state);
    let driver_id = seed_driver(&state, 1, 14.5995, 121.0244);
    let delivery_id = seed_offered_delivery(&state, driver_id, 0);

    let mut offer_feed = state.topics.subscribe_driver_feed(driver_id);

    let delivery =
        delivery_coordinator::engine::transitions::cancel(&state, delivery_id).unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Cancelled);

    let event = offer_feed.recv().await.unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "withdrawn");
    assert_eq!(json["reason"], "cancelled");

    // terminal state: no further cancel is possible
    let err = delivery_coordinator::engine::transitions::cancel(&state, delivery_id);
    assert!(matches!(
        err,
        Err(AppError::TransitionNotAllowed { .. })
    ));
}

#[tokio::test]
async fn location_stream_starts_and_restarts_are_stable_across_redispatch() {
    let (state, _rx) = AppState::new(CoordinatorSettings::default());
    let state = Arc::new(state);
    let first = seed_driver(&state, 1, 14.5995, 121.0244);
    let second = seed_driver(&state, 2, 14.6100, 121.0300);
    let delivery_id = seed_offered_delivery(&state, first, 0);

    // first driver declines, offer moves on
    offers::decline(&state, delivery_id, first).await.unwrap();

    // re-offer manually to the second driver and accept
    {
        let mut delivery = state.deliveries.get_mut(&delivery_id).unwrap();
        delivery.status = DeliveryStatus::DriverOffered;
        delivery.driver_id = Some(second);
        delivery.offered_at = Some(Utc::now());
    }
    offers::accept(&state, delivery_id, second).unwrap();

    let handle = state.streams.get(&delivery_id).unwrap();
    assert_eq!(handle.driver_id, second);
}
