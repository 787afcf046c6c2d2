//! Carrier bookings with a fixed number of pickup slots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// A booked shipment, recorded as the shipment step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub tracking_number: String,
}

#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Books a pickup slot for an order.
    async fn create_shipment(&self, order_id: &str) -> Result<Shipment>;

    /// Cancels a booking and frees its slot.
    async fn cancel_shipment(&self, tracking_number: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Carrier {
    /// tracking number -> order id
    booked: HashMap<String, String>,
    slots: Option<usize>,
    issued: u32,
}

/// In-memory carrier. Unlimited pickup slots unless capped.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    carrier: Arc<RwLock<Carrier>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of simultaneous bookings. `0` takes the carrier offline.
    pub fn set_pickup_slots(&self, slots: usize) {
        self.carrier.write().unwrap().slots = Some(slots);
    }

    pub fn active_shipments(&self) -> usize {
        self.carrier.read().unwrap().booked.len()
    }

    /// Order a tracking number was booked for.
    pub fn order_for(&self, tracking_number: &str) -> Option<String> {
        self.carrier
            .read()
            .unwrap()
            .booked
            .get(tracking_number)
            .cloned()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(&self, order_id: &str) -> Result<Shipment> {
        let mut carrier = self.carrier.write().unwrap();

        if carrier.slots.is_some_and(|slots| carrier.booked.len() >= slots) {
            return Err(ServiceError::ShippingUnavailable);
        }

        carrier.issued += 1;
        let tracking_number = format!("TRACK-{:04}", carrier.issued);
        carrier
            .booked
            .insert(tracking_number.clone(), order_id.to_string());

        Ok(Shipment { tracking_number })
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> Result<()> {
        self.carrier
            .write()
            .unwrap()
            .booked
            .remove(tracking_number)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Shipment", tracking_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_frees_the_slot() {
        let service = InMemoryShippingService::new();
        service.set_pickup_slots(1);

        let shipment = service.create_shipment("ord_1").await.unwrap();
        assert_eq!(service.order_for(&shipment.tracking_number).as_deref(), Some("ord_1"));
        assert_eq!(
            service.create_shipment("ord_2").await,
            Err(ServiceError::ShippingUnavailable)
        );

        service
            .cancel_shipment(&shipment.tracking_number)
            .await
            .unwrap();
        let next = service.create_shipment("ord_2").await.unwrap();
        assert_eq!(next.tracking_number, "TRACK-0002");
        assert_eq!(service.active_shipments(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_shipment() {
        let service = InMemoryShippingService::new();
        assert_eq!(
            service.cancel_shipment("TRACK-0042").await,
            Err(ServiceError::not_found("Shipment", "TRACK-0042"))
        );
    }
}
