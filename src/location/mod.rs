use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::location::{CriticalEvent, CriticalEventRecord, GeoPoint, GpsFix, LocationSample};
use crate::state::{AppState, StreamHandle};

pub trait GeoProvider: Send + Sync + 'static {
    fn current_fix(&self, driver_id: Uuid) -> Option<GpsFix>;
}

pub struct LedgerGeoProvider {
    state: Arc<AppState>,
}

impl GeoProvider for LedgerGeoProvider {
    fn current_fix(&self, driver_id: Uuid) -> Option<GpsFix> {
        self.state
            .drivers
            .get(&driver_id)
            .filter(|d| d.online)
            .and_then(|d| d.last_fix.clone())
    }
}

pub fn sampling_interval(speed_kmh: f64) -> Duration {
    match speed_kmh {
        s if s >= 50.0 => Duration::from_secs(5),
        s if s >= 20.0 => Duration::from_secs(10),
        s if s >= 5.0 => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    }
}

pub fn start_stream(state: &Arc<AppState>, driver_id: Uuid, delivery_id: Uuid) {
    let provider = Arc::new(LedgerGeoProvider {
        state: state.clone(),
    });
    start_stream_with(state, driver_id, delivery_id, provider);
}

pub fn start_stream_with(
    state: &Arc<AppState>,
    driver_id: Uuid,
    delivery_id: Uuid,
    provider: Arc<dyn GeoProvider>,
) {
    if state.streams.contains_key(&delivery_id) {
        return;
    }

    let (handle, stop_rx) = StreamHandle::new(driver_id);
    state.topics.open_location_feed(delivery_id);
    state.streams.insert(delivery_id, handle);
    state.metrics.active_location_streams.inc();

    tokio::spawn(run_location_stream(
        state.clone(),
        driver_id,
        delivery_id,
        provider,
        stop_rx,
    ));
}

pub fn stop_stream(state: &AppState, delivery_id: Uuid) {
    if let Some((_, handle)) = state.streams.remove(&delivery_id) {
        handle.stop();
        state.topics.close_location_feed(delivery_id);
        state.metrics.active_location_streams.dec();
    }
}

pub fn stop_streams_for_driver(state: &AppState, driver_id: Uuid) {
    let owned: Vec<Uuid> = state
        .streams
        .iter()
        .filter(|entry| entry.value().driver_id == driver_id)
        .map(|entry| *entry.key())
        .collect();

    for delivery_id in owned {
        stop_stream(state, delivery_id);
    }
}

async fn run_location_stream(
    state: Arc<AppState>,
    driver_id: Uuid,
    delivery_id: Uuid,
    provider: Arc<dyn GeoProvider>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(driver_id = %driver_id, delivery_id = %delivery_id, "location stream started");

    loop {
        let wait = match provider.current_fix(driver_id) {
            Some(fix) => {
                let sample = LocationSample::from_fix(driver_id, delivery_id, &fix);
                if let Err(err) = state.topics.publish_location(delivery_id, sample) {
                    debug!(delivery_id = %delivery_id, error = %err, "location sample dropped");
                }
                sampling_interval(fix.speed_kmh)
            }
            None => {
                debug!(driver_id = %driver_id, "gps fix unavailable; sample skipped");
                sampling_interval(0.0)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(driver_id = %driver_id, delivery_id = %delivery_id, "location stream stopped");
}

pub fn record_critical_event(
    state: &AppState,
    driver_id: Uuid,
    delivery_id: Uuid,
    event: CriticalEvent,
    point: GeoPoint,
) {
    let record = CriticalEventRecord {
        driver_id,
        delivery_id,
        event,
        point,
        recorded_at: Utc::now(),
    };

    state
        .critical_events
        .entry(delivery_id)
        .or_default()
        .push(record);

    state
        .metrics
        .critical_events_total
        .with_label_values(&[event.as_str()])
        .inc();
}
