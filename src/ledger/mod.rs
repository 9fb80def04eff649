use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::is_usable_point;
use crate::location;
use crate::models::driver::Driver;
use crate::models::location::GpsFix;
use crate::state::AppState;

pub fn set_online(state: &AppState, driver_id: Uuid, fix: GpsFix) -> Result<Driver, AppError> {
    if !is_usable_point(&fix.point) {
        return Err(AppError::LocationUnavailable);
    }

    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !driver.verified {
        return Err(AppError::NotVerified(driver_id));
    }

    driver.online = true;
    driver.available = true;
    driver.last_fix = Some(fix);
    driver.updated_at = Utc::now();

    info!(driver_id = %driver_id, "driver online");
    Ok(driver.clone())
}

pub fn set_offline(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let updated = {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        driver.online = false;
        driver.available = false;
        driver.last_fix = None;
        driver.updated_at = Utc::now();
        driver.clone()
    };

    location::stop_streams_for_driver(state, driver_id);

    info!(driver_id = %driver_id, "driver offline");
    Ok(updated)
}

pub fn record_fix(state: &AppState, driver_id: Uuid, fix: GpsFix) -> Result<Driver, AppError> {
    if !is_usable_point(&fix.point) {
        return Err(AppError::LocationUnavailable);
    }

    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !driver.online {
        return Err(AppError::BadRequest(
            "driver is offline; go online before reporting fixes".to_string(),
        ));
    }

    driver.last_fix = Some(fix);
    driver.updated_at = Utc::now();
    Ok(driver.clone())
}

pub fn set_verified(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    driver.verified = true;
    driver.updated_at = Utc::now();
    Ok(driver.clone())
}

pub fn mark_busy(state: &AppState, driver_id: Uuid) -> Result<(), AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    driver.available = false;
    driver.updated_at = Utc::now();
    Ok(())
}

// re-avails only if the driver is still online
pub fn mark_free(state: &AppState, driver_id: Uuid) -> Result<(), AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if driver.online {
        driver.available = true;
    }
    driver.updated_at = Utc::now();
    Ok(())
}
