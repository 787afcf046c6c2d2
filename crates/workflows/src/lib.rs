//! Domain workflows built on the saga orchestrator.
//!
//! - [`order_fulfillment`]: reserve inventory, charge payment, ship, confirm.
//! - [`create_cart`]: resolve region, sales channel and customer concurrently,
//!   then create the cart and its payment collection.
//!
//! Both run against the in-memory services in [`services`], which expose
//! failure switches for exercising rollback.

pub mod create_cart;
pub mod error;
mod io;
pub mod order_fulfillment;
pub mod services;

pub use create_cart::{CartInput, CartItemInput, create_cart_workflow};
pub use error::ServiceError;
pub use order_fulfillment::{OrderInput, order_fulfillment_workflow};
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    InMemoryStoreService,
};
