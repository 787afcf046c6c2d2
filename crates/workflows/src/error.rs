//! Workflow service error types.

use saga::StepError;
use thiserror::Error;

/// Errors returned by the services behind the workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Not enough stock to reserve the requested items.
    #[error("Insufficient stock")]
    InsufficientStock,

    /// The payment provider refused the charge.
    #[error("Payment declined")]
    PaymentDeclined,

    /// The payment provider could not refund a captured payment.
    #[error("Refund failed for payment: {0}")]
    RefundFailed(String),

    /// No carrier could take the shipment.
    #[error("Shipping unavailable")]
    ShippingUnavailable,

    /// The store has no region to assign.
    #[error("No regions found")]
    NoRegions,

    /// The sales channel exists but is disabled.
    #[error("Unable to assign cart to disabled Sales Channel: {0}")]
    DisabledSalesChannel(String),

    /// Some variants have no price in the cart's currency.
    #[error("Variants with IDs {0} do not have a price")]
    MissingPrices(String),

    /// A referenced record does not exist.
    #[error("{kind} with id: {id} was not found")]
    NotFound { kind: &'static str, id: String },
}

impl ServiceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InsufficientStock => "insufficient_inventory",
            ServiceError::PaymentDeclined => "payment_declined",
            ServiceError::RefundFailed(_) => "unexpected_state",
            ServiceError::ShippingUnavailable => "shipping_unavailable",
            ServiceError::NoRegions | ServiceError::NotFound { .. } => "not_found",
            ServiceError::DisabledSalesChannel(_) | ServiceError::MissingPrices(_) => {
                "invalid_data"
            }
        }
    }
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        StepError::new(err.to_string()).with_field("code", err.code())
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_converts_to_step_error_with_code() {
        let err: StepError = ServiceError::DisabledSalesChannel("Webshop".to_string()).into();
        assert_eq!(
            err.message,
            "Unable to assign cart to disabled Sales Channel: Webshop"
        );
        assert_eq!(err.field("code"), Some(&json!("invalid_data")));
    }

    #[test]
    fn test_not_found_message() {
        let err = ServiceError::not_found("Region", "reg_0009");
        assert_eq!(err.to_string(), "Region with id: reg_0009 was not found");
        assert_eq!(err.code(), "not_found");
    }
}
