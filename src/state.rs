use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::broadcast::Topics;
use crate::config::CoordinatorSettings;
use crate::models::delivery::Delivery;
use crate::models::driver::Driver;
use crate::models::location::CriticalEventRecord;
use crate::observability::metrics::Metrics;

pub struct StreamHandle {
    pub driver_id: Uuid,
    stop: watch::Sender<bool>,
}

impl StreamHandle {
    pub fn new(driver_id: Uuid) -> (Self, watch::Receiver<bool>) {
        let (stop, stop_rx) = watch::channel(false);
        (Self { driver_id, stop }, stop_rx)
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

pub struct AppState {
    pub drivers: DashMap<Uuid, Driver>,
    pub deliveries: DashMap<Uuid, Delivery>,
    pub critical_events: DashMap<Uuid, Vec<CriticalEventRecord>>,
    pub topics: Topics,
    // keyed by delivery id
    pub streams: DashMap<Uuid, StreamHandle>,
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub metrics: Metrics,
    pub settings: CoordinatorSettings,
}

impl AppState {
    pub fn new(settings: CoordinatorSettings) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(settings.dispatch_queue_size);
        let topics = Topics::new(settings.event_buffer_size);

        (
            Self {
                drivers: DashMap::new(),
                deliveries: DashMap::new(),
                critical_events: DashMap::new(),
                topics,
                streams: DashMap::new(),
                dispatch_tx,
                metrics: Metrics::new(),
                settings,
            },
            dispatch_rx,
        )
    }
}
