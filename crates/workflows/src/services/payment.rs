//! Card payments against per-customer credit limits.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// A captured charge, recorded as the charge step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub amount_cents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    async fn charge(&self, order_id: &str, customer_id: &str, amount_cents: u64)
    -> Result<Payment>;

    /// Refunds a captured charge. Refunding an already refunded charge is a no-op.
    async fn refund(&self, payment_id: &str) -> Result<()>;
}

#[derive(Debug)]
struct Charge {
    customer_id: String,
    amount_cents: u64,
    status: PaymentStatus,
}

#[derive(Debug, Default)]
struct Gateway {
    charges: HashMap<String, Charge>,
    credit_limits: HashMap<String, u64>,
    refunds_offline: bool,
    issued: u32,
}

impl Gateway {
    /// Captured and not yet refunded amount for a customer.
    fn outstanding(&self, customer_id: &str) -> u64 {
        self.charges
            .values()
            .filter(|c| c.customer_id == customer_id && c.status == PaymentStatus::Captured)
            .map(|c| c.amount_cents)
            .sum()
    }
}

/// In-memory payment gateway. Customers without a credit limit are never
/// declined.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    gateway: Arc<RwLock<Gateway>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the outstanding captured amount for a customer.
    pub fn set_credit_limit(&self, customer_id: impl Into<String>, limit_cents: u64) {
        self.gateway
            .write()
            .unwrap()
            .credit_limits
            .insert(customer_id.into(), limit_cents);
    }

    /// Takes the refund endpoint offline (or back online).
    pub fn set_refunds_offline(&self, offline: bool) {
        self.gateway.write().unwrap().refunds_offline = offline;
    }

    pub fn status(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.gateway
            .read()
            .unwrap()
            .charges
            .get(payment_id)
            .map(|c| c.status)
    }

    /// Sum of captured, unrefunded charges across all customers.
    pub fn captured_cents(&self) -> u64 {
        self.gateway
            .read()
            .unwrap()
            .charges
            .values()
            .filter(|c| c.status == PaymentStatus::Captured)
            .map(|c| c.amount_cents)
            .sum()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: u64,
    ) -> Result<Payment> {
        let mut gateway = self.gateway.write().unwrap();

        if let Some(&limit) = gateway.credit_limits.get(customer_id) {
            if gateway.outstanding(customer_id) + amount_cents > limit {
                tracing::debug!(order_id, customer_id, amount_cents, limit, "charge declined");
                return Err(ServiceError::PaymentDeclined);
            }
        }

        gateway.issued += 1;
        let payment_id = format!("PAY-{:04}", gateway.issued);
        gateway.charges.insert(
            payment_id.clone(),
            Charge {
                customer_id: customer_id.to_string(),
                amount_cents,
                status: PaymentStatus::Captured,
            },
        );
        tracing::debug!(%payment_id, order_id, amount_cents, "charge captured");

        Ok(Payment {
            payment_id,
            amount_cents,
        })
    }

    async fn refund(&self, payment_id: &str) -> Result<()> {
        let mut gateway = self.gateway.write().unwrap();
        if gateway.refunds_offline {
            return Err(ServiceError::RefundFailed(payment_id.to_string()));
        }
        let charge = gateway
            .charges
            .get_mut(payment_id)
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;
        charge.status = PaymentStatus::Refunded;
        Ok(())
    }
}
