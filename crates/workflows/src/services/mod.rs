//! Service traits and in-memory implementations behind the workflow steps.

pub mod inventory;
pub mod payment;
pub mod shipping;
pub mod store;

pub use inventory::{InMemoryInventoryService, InventoryService, ReservationItem, Reservation};
pub use payment::{InMemoryPaymentService, Payment, PaymentService, PaymentStatus};
pub use shipping::{InMemoryShippingService, Shipment, ShippingService};
pub use store::{
    Cart, CartLineItem, Customer, InMemoryStoreService, PaymentCollection, Region, SalesChannel,
    StoreService,
};
