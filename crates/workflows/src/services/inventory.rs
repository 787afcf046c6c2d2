//! Warehouse stock and per-order reservations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub sku: String,
    pub quantity: u32,
}

/// Stock held for one order, recorded as the reserve step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub order_id: String,
    pub items: Vec<ReservationItem>,
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Holds stock for every item of an order, or nothing if any SKU is short.
    ///
    /// An order holds at most one reservation; reserving again returns it.
    async fn reserve(&self, order_id: &str, items: Vec<ReservationItem>) -> Result<Reservation>;

    /// Puts a reservation's stock back on the shelf.
    async fn release(&self, reservation_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Warehouse {
    on_hand: HashMap<String, u32>,
    held: HashMap<String, Reservation>,
    issued: u32,
}

impl Warehouse {
    fn shortages<'a>(&self, items: &'a [ReservationItem]) -> Vec<&'a str> {
        let mut wanted: HashMap<&'a str, u32> = HashMap::new();
        for item in items {
            *wanted.entry(item.sku.as_str()).or_default() += item.quantity;
        }
        let mut short: Vec<&'a str> = wanted
            .into_iter()
            .filter(|(sku, qty)| self.on_hand.get(*sku).is_some_and(|have| have < qty))
            .map(|(sku, _)| sku)
            .collect();
        short.sort_unstable();
        short
    }

    fn adjust(&mut self, items: &[ReservationItem], take: bool) {
        for item in items {
            if let Some(have) = self.on_hand.get_mut(&item.sku) {
                *have = if take {
                    *have - item.quantity
                } else {
                    *have + item.quantity
                };
            }
        }
    }
}

/// In-memory warehouse. SKUs that were never stocked are not tracked and
/// never run short.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    warehouse: Arc<RwLock<Warehouse>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, sku: impl Into<String>, quantity: u32) {
        self.warehouse
            .write()
            .unwrap()
            .on_hand
            .insert(sku.into(), quantity);
    }

    pub fn stock(&self, sku: &str) -> Option<u32> {
        self.warehouse.read().unwrap().on_hand.get(sku).copied()
    }

    /// Number of orders currently holding stock.
    pub fn active_reservations(&self) -> usize {
        self.warehouse.read().unwrap().held.len()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(&self, order_id: &str, items: Vec<ReservationItem>) -> Result<Reservation> {
        let mut warehouse = self.warehouse.write().unwrap();

        if let Some(existing) = warehouse.held.values().find(|r| r.order_id == order_id) {
            return Ok(existing.clone());
        }
        let short = warehouse.shortages(&items);
        if !short.is_empty() {
            tracing::debug!(order_id, skus = ?short, "stock short");
            return Err(ServiceError::InsufficientStock);
        }

        warehouse.adjust(&items, true);
        warehouse.issued += 1;
        let reservation = Reservation {
            reservation_id: format!("RES-{:04}", warehouse.issued),
            order_id: order_id.to_string(),
            items,
        };
        warehouse
            .held
            .insert(reservation.reservation_id.clone(), reservation.clone());

        tracing::debug!(reservation_id = %reservation.reservation_id, order_id, "stock reserved");
        Ok(reservation)
    }

    async fn release(&self, reservation_id: &str) -> Result<()> {
        let mut warehouse = self.warehouse.write().unwrap();
        let reservation = warehouse
            .held
            .remove(reservation_id)
            .ok_or_else(|| ServiceError::not_found("Reservation", reservation_id))?;
        warehouse.adjust(&reservation.items, false);
        tracing::debug!(reservation_id, "stock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, u32)]) -> Vec<ReservationItem> {
        pairs
            .iter()
            .map(|(sku, quantity)| ReservationItem {
                sku: sku.to_string(),
                quantity: *quantity,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reserve_and_release_restores_stock() {
        let service = InMemoryInventoryService::new();
        service.set_stock("SKU-001", 5);

        let reservation = service
            .reserve("ord_1", items(&[("SKU-001", 2)]))
            .await
            .unwrap();
        assert_eq!(reservation.reservation_id, "RES-0001");
        assert_eq!(service.stock("SKU-001"), Some(3));

        service.release(&reservation.reservation_id).await.unwrap();
        assert_eq!(service.stock("SKU-001"), Some(5));
        assert_eq!(service.active_reservations(), 0);
    }

    #[tokio::test]
    async fn test_repeated_lines_count_against_the_same_stock() {
        let service = InMemoryInventoryService::new();
        service.set_stock("SKU-001", 3);

        let result = service
            .reserve("ord_1", items(&[("SKU-001", 2), ("SKU-001", 2)]))
            .await;
        assert_eq!(result, Err(ServiceError::InsufficientStock));
        assert_eq!(service.stock("SKU-001"), Some(3));
    }

    #[tokio::test]
    async fn test_one_reservation_per_order() {
        let service = InMemoryInventoryService::new();
        service.set_stock("SKU-001", 5);

        let first = service
            .reserve("ord_1", items(&[("SKU-001", 2)]))
            .await
            .unwrap();
        let again = service
            .reserve("ord_1", items(&[("SKU-001", 2)]))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(service.stock("SKU-001"), Some(3));
        assert_eq!(service.active_reservations(), 1);
    }

    #[tokio::test]
    async fn test_untracked_sku_never_runs_short() {
        let service = InMemoryInventoryService::new();
        assert!(
            service
                .reserve("ord_1", items(&[("GIFT-CARD", 100)]))
                .await
                .is_ok()
        );
        assert_eq!(service.stock("GIFT-CARD"), None);
    }

    #[tokio::test]
    async fn test_release_twice_is_not_found() {
        let service = InMemoryInventoryService::new();
        let reservation = service
            .reserve("ord_1", items(&[("SKU-001", 1)]))
            .await
            .unwrap();

        service.release(&reservation.reservation_id).await.unwrap();
        assert_eq!(
            service.release(&reservation.reservation_id).await,
            Err(ServiceError::not_found("Reservation", "RES-0001"))
        );
    }
}
