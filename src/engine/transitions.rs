use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::broadcast::{DeliveryEvent, OfferEvent, WithdrawReason};
use crate::error::AppError;
use crate::ledger;
use crate::location;
use crate::models::delivery::{Delivery, DeliveryStatus, ProofOfDelivery};
use crate::models::location::CriticalEvent;
use crate::state::AppState;

pub fn allowed_next(from: DeliveryStatus) -> &'static [DeliveryStatus] {
    use DeliveryStatus::*;

    match from {
        Pending => &[DriverOffered, Cancelled, Failed],
        DriverOffered => &[DriverAssigned, Pending, Cancelled, Failed],
        DriverAssigned => &[PickupArrived, Cancelled],
        PickupArrived => &[PackageCollected, Cancelled],
        PackageCollected => &[InTransit, Cancelled],
        InTransit => &[Delivered, Cancelled],
        Delivered | Cancelled | Failed => &[],
    }
}

pub fn is_allowed(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub enum CasResult {
    Applied(Delivery),
    PreconditionFailed(Delivery),
}

/// Checks the precondition and mutates under the same row lock.
pub fn conditional_update<P, F>(
    deliveries: &DashMap<Uuid, Delivery>,
    delivery_id: Uuid,
    precondition: P,
    mutate: F,
) -> Result<CasResult, AppError>
where
    P: FnOnce(&Delivery) -> bool,
    F: FnOnce(&mut Delivery),
{
    let mut entry = deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if !precondition(&entry) {
        return Ok(CasResult::PreconditionFailed(entry.clone()));
    }

    mutate(&mut entry);
    Ok(CasResult::Applied(entry.clone()))
}

pub fn publish_status(state: &AppState, delivery: &Delivery) {
    state.topics.publish_delivery(
        delivery.id,
        DeliveryEvent::StatusChanged {
            delivery_id: delivery.id,
            status: delivery.status,
            driver_id: delivery.driver_id,
            at: Utc::now(),
        },
    );
}

/// `delivered` goes through [`complete`] because it carries proof.
pub fn advance(
    state: &AppState,
    delivery_id: Uuid,
    driver_id: Uuid,
    next: DeliveryStatus,
) -> Result<Delivery, AppError> {
    if !matches!(
        next,
        DeliveryStatus::PickupArrived | DeliveryStatus::PackageCollected | DeliveryStatus::InTransit
    ) {
        return Err(AppError::BadRequest(format!(
            "cannot advance to {next:?} through this operation"
        )));
    }

    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| d.driver_id == Some(driver_id) && is_allowed(d.status, next),
        |d| {
            d.status = next;
            if next == DeliveryStatus::PackageCollected {
                d.picked_up_at = Some(Utc::now());
            }
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(current) => {
            if current.driver_id != Some(driver_id) {
                return Err(AppError::BadRequest(
                    "delivery is assigned to a different driver".to_string(),
                ));
            }
            return Err(AppError::TransitionNotAllowed {
                from: current.status,
                to: next,
            });
        }
    };

    if next == DeliveryStatus::PackageCollected {
        location::record_critical_event(
            state,
            driver_id,
            delivery_id,
            CriticalEvent::PickupConfirmed,
            driver_point(state, driver_id).unwrap_or(delivery.pickup),
        );
    }

    publish_status(state, &delivery);
    Ok(delivery)
}

pub fn complete(
    state: &AppState,
    delivery_id: Uuid,
    driver_id: Uuid,
    proof: ProofOfDelivery,
) -> Result<Delivery, AppError> {
    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| d.driver_id == Some(driver_id) && is_allowed(d.status, DeliveryStatus::Delivered),
        |d| {
            d.status = DeliveryStatus::Delivered;
            d.delivered_at = Some(Utc::now());
            d.proof = Some(proof);
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(current) => {
            if current.driver_id != Some(driver_id) {
                return Err(AppError::BadRequest(
                    "delivery is assigned to a different driver".to_string(),
                ));
            }
            return Err(AppError::TransitionNotAllowed {
                from: current.status,
                to: DeliveryStatus::Delivered,
            });
        }
    };

    location::record_critical_event(
        state,
        driver_id,
        delivery_id,
        CriticalEvent::DeliveryConfirmed,
        driver_point(state, driver_id).unwrap_or(delivery.dropoff),
    );

    ledger::mark_free(state, driver_id)?;
    location::stop_stream(state, delivery_id);

    publish_status(state, &delivery);
    state.topics.close_delivery_topics(delivery_id);

    state.metrics.deliveries_completed_total.inc();
    Ok(delivery)
}

pub fn cancel(state: &AppState, delivery_id: Uuid) -> Result<Delivery, AppError> {
    terminate(state, delivery_id, DeliveryStatus::Cancelled, WithdrawReason::Cancelled)
}

pub fn fail(state: &AppState, delivery_id: Uuid) -> Result<Delivery, AppError> {
    terminate(state, delivery_id, DeliveryStatus::Failed, WithdrawReason::Failed)
}

fn terminate(
    state: &AppState,
    delivery_id: Uuid,
    to: DeliveryStatus,
    reason: WithdrawReason,
) -> Result<Delivery, AppError> {
    let mut prior: Option<(DeliveryStatus, Option<Uuid>)> = None;

    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| is_allowed(d.status, to),
        |d| {
            prior = Some((d.status, d.driver_id));
            d.status = to;
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(current) => {
            return Err(AppError::TransitionNotAllowed {
                from: current.status,
                to,
            });
        }
    };

    if let Some((prior_status, Some(prior_driver))) = prior {
        match prior_status {
            DeliveryStatus::DriverOffered => {
                state.topics.publish_offer(
                    prior_driver,
                    OfferEvent::Withdrawn {
                        delivery_id,
                        reason,
                    },
                );
            }
            DeliveryStatus::DriverAssigned
            | DeliveryStatus::PickupArrived
            | DeliveryStatus::PackageCollected
            | DeliveryStatus::InTransit => {
                ledger::mark_free(state, prior_driver)?;
                location::stop_stream(state, delivery_id);
            }
            _ => {}
        }
    }

    publish_status(state, &delivery);
    state.topics.close_delivery_topics(delivery_id);
    Ok(delivery)
}

fn driver_point(
    state: &AppState,
    driver_id: Uuid,
) -> Option<crate::models::location::GeoPoint> {
    state
        .drivers
        .get(&driver_id)
        .and_then(|d| d.last_fix.as_ref().map(|fix| fix.point))
}
