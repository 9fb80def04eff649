use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GpsFix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VehicleType {
    Motorcycle,
    Sedan,
    Van,
    Truck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub vehicle: VehicleType,
    pub verified: bool,
    pub online: bool,
    pub available: bool,
    pub last_fix: Option<GpsFix>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_eligible(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        let fix_is_fresh = self
            .last_fix
            .as_ref()
            .is_some_and(|fix| now - fix.recorded_at <= freshness);

        self.online && self.available && self.verified && fix_is_fresh
    }
}
