use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::driver::VehicleType;
use crate::models::location::GeoPoint;

const BASE_FARE: f64 = 49.0;
const AVERAGE_SPEED_KMH: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    DriverOffered,
    DriverAssigned,
    PickupArrived,
    PackageCollected,
    InTransit,
    Delivered,
    Cancelled,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub description: String,
    pub weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfDelivery {
    pub recipient_name: String,
    pub photo_url: Option<String>,
    pub signature: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub distance_km: f64,
    pub duration_min: f64,
    pub price: f64,
}

impl Quote {
    pub fn for_route(pickup: &GeoPoint, dropoff: &GeoPoint, vehicle: VehicleType) -> Self {
        let distance_km = haversine_km(pickup, dropoff);
        let duration_min = distance_km / AVERAGE_SPEED_KMH * 60.0;
        let price = BASE_FARE + distance_km * per_km_rate(vehicle);

        Self {
            distance_km,
            duration_min,
            price,
        }
    }
}

fn per_km_rate(vehicle: VehicleType) -> f64 {
    match vehicle {
        VehicleType::Motorcycle => 6.0,
        VehicleType::Sedan => 10.0,
        VehicleType::Van => 15.0,
        VehicleType::Truck => 25.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle: VehicleType,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_contact: ContactInfo,
    pub dropoff_contact: ContactInfo,
    pub package: PackageInfo,
    pub quote: Quote,
    pub status: DeliveryStatus,
    // skipped on re-dispatch
    pub declined_by: Vec<Uuid>,
    pub proof: Option<ProofOfDelivery>,
    pub created_at: DateTime<Utc>,
    pub offered_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_scales_with_distance_and_vehicle() {
        let pickup = GeoPoint {
            lat: 14.5995,
            lng: 121.0244,
        };
        let dropoff = GeoPoint {
            lat: 14.5547,
            lng: 121.0244,
        };

        let moto = Quote::for_route(&pickup, &dropoff, VehicleType::Motorcycle);
        let van = Quote::for_route(&pickup, &dropoff, VehicleType::Van);

        assert!(moto.distance_km > 4.0 && moto.distance_km < 6.0);
        assert!(moto.price > BASE_FARE);
        assert!(van.price > moto.price);
        assert!(moto.duration_min > 0.0);
    }

    #[test]
    fn terminal_states() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::InTransit.is_terminal());
    }
}
