//! Order fulfillment workflow.
//!
//! ```text
//! reserve_inventory -> charge_payment -> create_shipment -> send_confirmation
//! ```
//!
//! Each service-backed step undoes itself using the output it recorded.
//! `send_confirmation` cannot be taken back and is never compensated.

use async_trait::async_trait;
use saga::{DefinitionError, HandlerSet, Step, StepContext, StepError, StepHandler, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::io::{input, read, recorded};
use crate::services::{
    InventoryService, Payment, PaymentService, Reservation, ReservationItem, Shipment,
    ShippingService,
};

pub const WORKFLOW_NAME: &str = "order_fulfillment";

pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";
pub const STEP_CREATE_SHIPMENT: &str = "create_shipment";
pub const STEP_SEND_CONFIRMATION: &str = "send_confirmation";

/// Input of the order fulfillment workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInput {
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: u64,
    pub items: Vec<ReservationItem>,
}

struct ReserveInventory<I> {
    inventory: I,
}

#[async_trait]
impl<I: InventoryService> StepHandler for ReserveInventory<I> {
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let order: OrderInput = input(ctx)?;
        let reservation = self
            .inventory
            .reserve(&order.order_id, order.items)
            .await?;
        Ok(serde_json::to_value(reservation)?)
    }

    async fn compensate(&self, ctx: &StepContext) -> Result<(), StepError> {
        if let Some(reservation) = recorded::<Reservation>(ctx)? {
            self.inventory.release(&reservation.reservation_id).await?;
        }
        Ok(())
    }
}

struct ChargePayment<P> {
    payment: P,
}

#[async_trait]
impl<P: PaymentService> StepHandler for ChargePayment<P> {
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let order: OrderInput = input(ctx)?;
        let payment = self
            .payment
            .charge(&order.order_id, &order.customer_id, order.amount_cents)
            .await?;
        Ok(serde_json::to_value(payment)?)
    }

    async fn compensate(&self, ctx: &StepContext) -> Result<(), StepError> {
        if let Some(payment) = recorded::<Payment>(ctx)? {
            self.payment.refund(&payment.payment_id).await?;
        }
        Ok(())
    }
}

struct CreateShipment<S> {
    shipping: S,
}

#[async_trait]
impl<S: ShippingService> StepHandler for CreateShipment<S> {
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let order: OrderInput = input(ctx)?;
        let shipment = self.shipping.create_shipment(&order.order_id).await?;
        Ok(serde_json::to_value(shipment)?)
    }

    async fn compensate(&self, ctx: &StepContext) -> Result<(), StepError> {
        if let Some(shipment) = recorded::<Shipment>(ctx)? {
            self.shipping
                .cancel_shipment(&shipment.tracking_number)
                .await?;
        }
        Ok(())
    }
}

fn send_confirmation() -> HandlerSet {
    HandlerSet::new(|ctx: StepContext| async move {
        let order: OrderInput = input(&ctx)?;
        let shipment: Shipment = read(&ctx, STEP_CREATE_SHIPMENT)?;
        tracing::info!(order_id = %order.order_id, "order confirmation sent");
        Ok(json!({
            "order_id": order.order_id,
            "tracking_number": shipment.tracking_number,
        }))
    })
}

/// Builds the order fulfillment workflow over the given services.
pub fn order_fulfillment_workflow<I, P, S>(
    inventory: I,
    payment: P,
    shipping: S,
) -> Result<Workflow, DefinitionError>
where
    I: InventoryService + 'static,
    P: PaymentService + 'static,
    S: ShippingService + 'static,
{
    Workflow::define(
        WORKFLOW_NAME,
        [
            Step::new(STEP_RESERVE_INVENTORY, ReserveInventory { inventory }),
            Step::new(STEP_CHARGE_PAYMENT, ChargePayment { payment }),
            Step::new(STEP_CREATE_SHIPMENT, CreateShipment { shipping }),
            Step::new(STEP_SEND_CONFIRMATION, send_confirmation()).no_compensation(),
        ],
    )
}
