use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::OfferEvent;
use crate::engine::queue::enqueue_dispatch;
use crate::engine::transitions::{conditional_update, publish_status, CasResult};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::delivery::DeliveryStatus;
use crate::state::AppState;

pub enum DispatchOutcome {
    Offered,
    Requeued,
    Skipped,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Offered => "offered",
            DispatchOutcome::Requeued => "requeued",
            DispatchOutcome::Skipped => "skipped",
        }
    }
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut dispatch_rx: mpsc::Receiver<Uuid>) {
    info!("matching dispatcher started");

    while let Some(delivery_id) = dispatch_rx.recv().await {
        state.metrics.deliveries_in_queue.dec();

        let start = Instant::now();
        match dispatch_delivery(state.clone(), delivery_id).await {
            Ok(outcome) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&[outcome.label()])
                    .observe(elapsed);
                state
                    .metrics
                    .dispatches_total
                    .with_label_values(&[outcome.label()])
                    .inc();
            }
            Err(err) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .dispatch_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                state
                    .metrics
                    .dispatches_total
                    .with_label_values(&["error"])
                    .inc();
                error!(delivery_id = %delivery_id, error = %err, "failed to dispatch delivery");
            }
        }
    }

    warn!("matching dispatcher stopped: queue channel closed");
}

async fn dispatch_delivery(
    state: Arc<AppState>,
    delivery_id: Uuid,
) -> Result<DispatchOutcome, AppError> {
    let snapshot = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if snapshot.status != DeliveryStatus::Pending {
        debug!(delivery_id = %delivery_id, status = ?snapshot.status, "stale dispatch entry");
        return Ok(DispatchOutcome::Skipped);
    }

    let now = Utc::now();
    let freshness = Duration::seconds(state.settings.location_freshness_secs);

    let candidates: Vec<(f64, Uuid)> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if !driver.is_eligible(now, freshness) || snapshot.declined_by.contains(&driver.id) {
                return None;
            }
            let fix = driver.last_fix.as_ref()?;
            Some((haversine_km(&fix.point, &snapshot.pickup), driver.id))
        })
        .collect();

    let Some(&(distance_km, candidate_id)) = candidates
        .iter()
        .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
    else {
        warn!(
            delivery_id = %delivery_id,
            error = %AppError::NoEligibleDrivers,
            "re-queueing delivery"
        );
        sleep(std::time::Duration::from_millis(
            state.settings.redispatch_delay_ms,
        ))
        .await;
        enqueue_dispatch(&state, delivery_id).await?;
        return Ok(DispatchOutcome::Requeued);
    };

    let offered_at = Utc::now();
    let result = conditional_update(
        &state.deliveries,
        delivery_id,
        |d| d.status == DeliveryStatus::Pending,
        |d| {
            d.status = DeliveryStatus::DriverOffered;
            d.driver_id = Some(candidate_id);
            d.offered_at = Some(offered_at);
        },
    )?;

    let delivery = match result {
        CasResult::Applied(delivery) => delivery,
        CasResult::PreconditionFailed(current) => {
            debug!(delivery_id = %delivery_id, status = ?current.status, "dispatch claim lost");
            return Ok(DispatchOutcome::Skipped);
        }
    };

    let expires_at = offered_at + Duration::seconds(state.settings.offer_timeout_secs);
    state.topics.publish_offer(
        candidate_id,
        OfferEvent::Offered {
            delivery: delivery.clone(),
            expires_at,
        },
    );
    publish_status(&state, &delivery);

    info!(
        delivery_id = %delivery_id,
        driver_id = %candidate_id,
        distance_km,
        "offer extended"
    );

    Ok(DispatchOutcome::Offered)
}
