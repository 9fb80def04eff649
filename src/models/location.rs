use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsFix {
    pub point: GeoPoint,
    pub speed_kmh: f64,
    pub heading: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationSample {
    pub driver_id: Uuid,
    pub delivery_id: Uuid,
    pub point: GeoPoint,
    pub speed_kmh: f64,
    pub heading: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn from_fix(driver_id: Uuid, delivery_id: Uuid, fix: &GpsFix) -> Self {
        Self {
            driver_id,
            delivery_id,
            point: fix.point,
            speed_kmh: fix.speed_kmh,
            heading: fix.heading,
            accuracy_m: fix.accuracy_m,
            recorded_at: fix.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalEvent {
    PickupConfirmed,
    DeliveryConfirmed,
}

impl CriticalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalEvent::PickupConfirmed => "pickup_confirmed",
            CriticalEvent::DeliveryConfirmed => "delivery_confirmed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticalEventRecord {
    pub driver_id: Uuid,
    pub delivery_id: Uuid,
    pub event: CriticalEvent,
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}
