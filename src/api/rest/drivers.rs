use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::driver::{Driver, VehicleType};
use crate::models::location::{GeoPoint, GpsFix};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/verify", post(verify_driver))
        .route("/drivers/:id/online", post(go_online))
        .route("/drivers/:id/offline", post(go_offline))
        .route("/drivers/:id/location", patch(report_fix))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub vehicle: VehicleType,
}

#[derive(Deserialize)]
pub struct FixRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub speed_kmh: f64,
    pub heading: Option<f64>,
    pub accuracy_m: Option<f64>,
}

impl FixRequest {
    fn into_fix(self) -> GpsFix {
        GpsFix {
            point: GeoPoint {
                lat: self.lat,
                lng: self.lng,
            },
            speed_kmh: self.speed_kmh,
            heading: self.heading,
            accuracy_m: self.accuracy_m,
            recorded_at: Utc::now(),
        }
    }
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        vehicle: payload.vehicle,
        verified: false,
        online: false,
        available: false,
        last_fix: None,
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver.value().clone()))
}

async fn verify_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(ledger::set_verified(&state, id)?))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FixRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(ledger::set_online(&state, id, payload.into_fix())?))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(ledger::set_offline(&state, id)?))
}

async fn report_fix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FixRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(ledger::record_fix(&state, id, payload.into_fix())?))
}
