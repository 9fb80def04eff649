use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::{OfferEvent, WithdrawReason};
use crate::engine::queue::enqueue_dispatch;
use crate::engine::transitions::{conditional_update, publish_status, CasResult};
use crate::error::AppError;
use crate::ledger;
use crate::location;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;

pub fn accept(state: &Arc<AppState>, delivery_id: Uuid, driver_id: Uuid) -> Result<Delivery, AppError> {
    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| d.status == DeliveryStatus::DriverOffered && d.driver_id == Some(driver_id),
        |d| {
            d.status = DeliveryStatus::DriverAssigned;
            d.assigned_at = Some(Utc::now());
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(current) => {
            debug!(
                delivery_id = %delivery_id,
                driver_id = %driver_id,
                status = ?current.status,
                "accept lost the race"
            );
            return Err(AppError::OfferExpired);
        }
    };

    ledger::mark_busy(state, driver_id)?;
    location::start_stream(state, driver_id, delivery_id);
    publish_status(state, &delivery);

    state
        .metrics
        .offer_outcomes_total
        .with_label_values(&["accepted"])
        .inc();

    info!(delivery_id = %delivery_id, driver_id = %driver_id, "offer accepted");
    Ok(delivery)
}

pub async fn decline(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    driver_id: Uuid,
) -> Result<Delivery, AppError> {
    let delivery =
        release_offer(state, delivery_id, Some(driver_id), WithdrawReason::Declined).await?;

    state
        .metrics
        .offer_outcomes_total
        .with_label_values(&["declined"])
        .inc();

    info!(delivery_id = %delivery_id, driver_id = %driver_id, "offer declined");
    Ok(delivery)
}

// shared by decline and the expiry sweep
async fn release_offer(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    expected_driver: Option<Uuid>,
    reason: WithdrawReason,
) -> Result<Delivery, AppError> {
    let mut released_driver: Option<Uuid> = None;

    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| {
            d.status == DeliveryStatus::DriverOffered
                && expected_driver.is_none_or(|id| d.driver_id == Some(id))
        },
        |d| {
            released_driver = d.driver_id;
            if let Some(id) = d.driver_id {
                if !d.declined_by.contains(&id) {
                    d.declined_by.push(id);
                }
            }
            d.driver_id = None;
            d.status = DeliveryStatus::Pending;
            d.offered_at = None;
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(_) => return Err(AppError::OfferExpired),
    };

    if let Some(driver_id) = released_driver {
        state.topics.publish_offer(
            driver_id,
            OfferEvent::Withdrawn {
                delivery_id,
                reason,
            },
        );
    }

    publish_status(state, &delivery);
    enqueue_dispatch(state, delivery_id).await?;
    Ok(delivery)
}

/// Releases offers older than the timeout; returns how many.
pub async fn sweep_expired_offers(state: &Arc<AppState>) -> usize {
    let deadline = Utc::now() - Duration::seconds(state.settings.offer_timeout_secs);

    let expired: Vec<Uuid> = state
        .deliveries
        .iter()
        .filter(|entry| {
            let d = entry.value();
            d.status == DeliveryStatus::DriverOffered
                && d.offered_at.is_some_and(|at| at <= deadline)
        })
        .map(|entry| *entry.key())
        .collect();

    let mut released = 0;
    for delivery_id in expired {
        match release_offer(state, delivery_id, None, WithdrawReason::TimedOut).await {
            Ok(_) => {
                released += 1;
                state.metrics.offers_expired_total.inc();
                warn!(delivery_id = %delivery_id, "offer timed out; delivery re-queued");
            }
            // driver answered between the scan and the release
            Err(AppError::OfferExpired) => {}
            Err(err) => error!(delivery_id = %delivery_id, error = %err, "expiry release failed"),
        }
    }

    released
}

pub async fn run_expiry_sweep(state: Arc<AppState>) {
    info!(
        interval_secs = state.settings.expiry_sweep_interval_secs,
        offer_timeout_secs = state.settings.offer_timeout_secs,
        "offer expiry sweep started"
    );

    let mut ticker = interval(std::time::Duration::from_secs(
        state.settings.expiry_sweep_interval_secs,
    ));

    loop {
        ticker.tick().await;
        sweep_expired_offers(&state).await;
    }
}
