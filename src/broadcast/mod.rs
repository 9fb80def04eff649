use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::location::LocationSample;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawReason {
    Declined,
    TimedOut,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfferEvent {
    Offered {
        delivery: Delivery,
        expires_at: DateTime<Utc>,
    },
    Withdrawn {
        delivery_id: Uuid,
        reason: WithdrawReason,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    StatusChanged {
        delivery_id: Uuid,
        status: DeliveryStatus,
        driver_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
}

/// Broadcast topic registry; dropping a receiver is the unsubscribe.
pub struct Topics {
    capacity: usize,
    driver_feeds: DashMap<Uuid, broadcast::Sender<OfferEvent>>,
    delivery_feeds: DashMap<Uuid, broadcast::Sender<DeliveryEvent>>,
    location_feeds: DashMap<Uuid, broadcast::Sender<LocationSample>>,
}

impl Topics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            driver_feeds: DashMap::new(),
            delivery_feeds: DashMap::new(),
            location_feeds: DashMap::new(),
        }
    }

    pub fn subscribe_driver_feed(&self, driver_id: Uuid) -> broadcast::Receiver<OfferEvent> {
        self.driver_feeds
            .entry(driver_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_delivery_feed(&self, delivery_id: Uuid) -> broadcast::Receiver<DeliveryEvent> {
        self.delivery_feeds
            .entry(delivery_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_location_feed(
        &self,
        delivery_id: Uuid,
    ) -> broadcast::Receiver<LocationSample> {
        self.location_feeds
            .entry(delivery_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn publish_offer(&self, driver_id: Uuid, event: OfferEvent) {
        if let Some(tx) = self.driver_feeds.get(&driver_id) {
            let _ = tx.send(event);
        }
    }

    pub fn publish_delivery(&self, delivery_id: Uuid, event: DeliveryEvent) {
        if let Some(tx) = self.delivery_feeds.get(&delivery_id) {
            let _ = tx.send(event);
        }
    }

    pub fn publish_location(
        &self,
        delivery_id: Uuid,
        sample: LocationSample,
    ) -> Result<usize, AppError> {
        let Some(tx) = self.location_feeds.get(&delivery_id) else {
            return Err(AppError::PublishFailed(format!(
                "location feed for delivery {delivery_id} is closed"
            )));
        };

        tx.send(sample)
            .map_err(|_| AppError::PublishFailed("no live subscribers".to_string()))
    }

    // opened by the stream task, never lazily on publish, so a closed
    // feed stays closed
    pub fn open_location_feed(&self, delivery_id: Uuid) {
        self.location_feeds
            .entry(delivery_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    pub fn close_location_feed(&self, delivery_id: Uuid) {
        self.location_feeds.remove(&delivery_id);
    }

    pub fn close_delivery_topics(&self, delivery_id: Uuid) {
        self.delivery_feeds.remove(&delivery_id);
        self.location_feeds.remove(&delivery_id);
    }
}
