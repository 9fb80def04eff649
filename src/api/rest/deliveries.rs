use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::queue::enqueue_dispatch;
use crate::engine::{offers, transitions};
use crate::error::AppError;
use crate::geo::is_usable_point;
use crate::models::delivery::{
    ContactInfo, Delivery, DeliveryStatus, PackageInfo, ProofOfDelivery, Quote,
};
use crate::models::driver::VehicleType;
use crate::models::location::{CriticalEventRecord, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/accept", post(accept_offer))
        .route("/deliveries/:id/decline", post(decline_offer))
        .route("/deliveries/:id/advance", post(advance_status))
        .route("/deliveries/:id/complete", post(complete_delivery))
        .route("/deliveries/:id/cancel", post(cancel_delivery))
        .route("/deliveries/:id/fail", post(fail_delivery))
        .route("/deliveries/:id/events", get(list_critical_events))
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub customer_id: Uuid,
    pub vehicle: VehicleType,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_contact: ContactInfo,
    pub dropoff_contact: ContactInfo,
    pub package: PackageInfo,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub driver_id: Uuid,
    pub status: DeliveryStatus,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub driver_id: Uuid,
    pub proof: ProofOfDelivery,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    if !is_usable_point(&payload.pickup) || !is_usable_point(&payload.dropoff) {
        return Err(AppError::BadRequest(
            "pickup and dropoff must be valid coordinates".to_string(),
        ));
    }

    let delivery = Delivery {
        id: Uuid::new_v4(),
        customer_id: payload.customer_id,
        driver_id: None,
        vehicle: payload.vehicle,
        quote: Quote::for_route(&payload.pickup, &payload.dropoff, payload.vehicle),
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        pickup_contact: payload.pickup_contact,
        dropoff_contact: payload.dropoff_contact,
        package: payload.package,
        status: DeliveryStatus::Pending,
        declined_by: Vec::new(),
        proof: None,
        created_at: Utc::now(),
        offered_at: None,
        assigned_at: None,
        picked_up_at: None,
        delivered_at: None,
    };

    state.deliveries.insert(delivery.id, delivery.clone());
    enqueue_dispatch(&state, delivery.id).await?;

    Ok(Json(delivery))
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Json<Vec<Delivery>> {
    let deliveries = state
        .deliveries
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(deliveries)
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    Ok(Json(delivery.value().clone()))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(offers::accept(&state, id, payload.driver_id)?))
}

async fn decline_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(offers::decline(&state, id, payload.driver_id).await?))
}

async fn advance_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(transitions::advance(
        &state,
        id,
        payload.driver_id,
        payload.status,
    )?))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(transitions::complete(
        &state,
        id,
        payload.driver_id,
        payload.proof,
    )?))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(transitions::cancel(&state, id)?))
}

async fn fail_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(transitions::fail(&state, id)?))
}

async fn list_critical_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<CriticalEventRecord>> {
    let events = state
        .critical_events
        .get(&id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    Json(events)
}
