//! Cart creation workflow.
//!
//! ```text
//! find-region ─────────────┐
//! find-sales-channel ──────┼─> create-cart -> create-payment-collection
//! find-or-create-customer ─┘
//! ```
//!
//! The three lookups are independent and run concurrently. A customer is
//! created from the input email when none exists; only a customer created
//! by this run is deleted on rollback.

use std::sync::Arc;

use saga::{DefinitionError, HandlerSet, Step, StepContext, StepId, Workflow};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::io::{input, read, recorded};
use crate::services::{
    Cart, CartLineItem, Customer, PaymentCollection, Region, SalesChannel, StoreService,
};

pub const WORKFLOW_NAME: &str = "create_cart";

pub const FIND_REGION_STEP_ID: &str = "find-region";
pub const FIND_SALES_CHANNEL_STEP_ID: &str = "find-sales-channel";
pub const FIND_OR_CREATE_CUSTOMER_STEP_ID: &str = "find-or-create-customer";
pub const CREATE_CART_STEP_ID: &str = "create-cart";
pub const CREATE_PAYMENT_COLLECTION_STEP_ID: &str = "create-payment-collection";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemInput {
    pub variant_id: String,
    pub quantity: u32,
}

/// Input of the cart creation workflow. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartInput {
    pub email: Option<String>,
    pub currency_code: Option<String>,
    pub region_id: Option<String>,
    pub sales_channel_id: Option<String>,
    pub customer_id: Option<String>,
    pub items: Vec<CartItemInput>,
}

/// Output of the customer step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundCustomer {
    pub customer: Option<Customer>,
    pub created: bool,
}

type Store = Arc<dyn StoreService>;

fn find_region(store: &Store) -> HandlerSet {
    let store = Arc::clone(store);
    HandlerSet::new(move |ctx: StepContext| {
        let store = Arc::clone(&store);
        async move {
            let cart: CartInput = input(&ctx)?;
            let region = match cart.region_id {
                Some(id) => store.retrieve_region(&id).await?,
                None => store.default_region().await?,
            };
            Ok(serde_json::to_value(region)?)
        }
    })
}

fn find_sales_channel(store: &Store) -> HandlerSet {
    let store = Arc::clone(store);
    HandlerSet::new(move |ctx: StepContext| {
        let store = Arc::clone(&store);
        async move {
            let cart: CartInput = input(&ctx)?;
            let channel = match cart.sales_channel_id {
                Some(id) => Some(store.retrieve_sales_channel(&id).await?),
                None => store.default_sales_channel().await,
            };
            if let Some(channel) = channel.as_ref().filter(|c| c.is_disabled) {
                return Err(ServiceError::DisabledSalesChannel(channel.name.clone()).into());
            }
            Ok(serde_json::to_value(channel)?)
        }
    })
}

fn find_or_create_customer(store: &Store) -> HandlerSet {
    let invoke_store = Arc::clone(store);
    let undo_store = Arc::clone(store);
    HandlerSet::new(move |ctx: StepContext| {
        let store = Arc::clone(&invoke_store);
        async move {
            let cart: CartInput = input(&ctx)?;
            let found = if let Some(id) = cart.customer_id {
                FoundCustomer {
                    customer: Some(store.retrieve_customer(&id).await?),
                    created: false,
                }
            } else if let Some(email) = cart.email {
                match store.find_customer_by_email(&email).await {
                    Some(customer) => FoundCustomer {
                        customer: Some(customer),
                        created: false,
                    },
                    None => FoundCustomer {
                        customer: Some(store.create_customer(&email).await),
                        created: true,
                    },
                }
            } else {
                FoundCustomer {
                    customer: None,
                    created: false,
                }
            };
            Ok(serde_json::to_value(found)?)
        }
    })
    .with_compensate(move |ctx: StepContext| {
        let store = Arc::clone(&undo_store);
        async move {
            if let Some(FoundCustomer {
                customer: Some(customer),
                created: true,
            }) = recorded::<FoundCustomer>(&ctx)?
            {
                store.delete_customer(&customer.id).await?;
            }
            Ok(())
        }
    })
}

fn create_cart(store: &Store) -> HandlerSet {
    let invoke_store = Arc::clone(store);
    let undo_store = Arc::clone(store);
    HandlerSet::new(move |ctx: StepContext| {
        let store = Arc::clone(&invoke_store);
        async move {
            let cart: CartInput = input(&ctx)?;
            let region: Region = read(&ctx, FIND_REGION_STEP_ID)?;
            let channel: Option<SalesChannel> = read(&ctx, FIND_SALES_CHANNEL_STEP_ID)?;
            let found: FoundCustomer = read(&ctx, FIND_OR_CREATE_CUSTOMER_STEP_ID)?;
            let currency_code = cart.currency_code.unwrap_or(region.currency_code);

            let mut items = Vec::with_capacity(cart.items.len());
            let mut missing = Vec::new();
            for item in cart.items {
                match store.price(&item.variant_id, &currency_code).await {
                    Some(unit_price) => items.push(CartLineItem {
                        variant_id: item.variant_id,
                        quantity: item.quantity,
                        unit_price,
                    }),
                    None => missing.push(item.variant_id),
                }
            }
            if !missing.is_empty() {
                return Err(ServiceError::MissingPrices(missing.join(", ")).into());
            }

            let email = cart
                .email
                .or_else(|| found.customer.as_ref().and_then(|c| c.email.clone()));
            let created = store
                .create_cart(Cart {
                    id: String::new(),
                    region_id: region.id,
                    currency_code,
                    sales_channel_id: channel.map(|c| c.id),
                    customer_id: found.customer.map(|c| c.id),
                    email,
                    items,
                })
                .await;
            tracing::debug!(cart_id = %created.id, "cart created");
            Ok(serde_json::to_value(created)?)
        }
    })
    .with_compensate(move |ctx: StepContext| {
        let store = Arc::clone(&undo_store);
        async move {
            if let Some(cart) = recorded::<Cart>(&ctx)? {
                store.delete_cart(&cart.id).await?;
            }
            Ok(())
        }
    })
}

fn create_payment_collection(store: &Store) -> HandlerSet {
    let invoke_store = Arc::clone(store);
    let undo_store = Arc::clone(store);
    HandlerSet::new(move |ctx: StepContext| {
        let store = Arc::clone(&invoke_store);
        async move {
            let cart: Cart = read(&ctx, CREATE_CART_STEP_ID)?;
            let collection = store
                .create_payment_collection(&cart.id, &cart.currency_code, cart.total())
                .await;
            Ok(serde_json::to_value(collection)?)
        }
    })
    .with_compensate(move |ctx: StepContext| {
        let store = Arc::clone(&undo_store);
        async move {
            if let Some(collection) = recorded::<PaymentCollection>(&ctx)? {
                store.delete_payment_collection(&collection.id).await?;
            }
            Ok(())
        }
    })
}

/// Builds the cart creation workflow. The run's result is the created cart.
pub fn create_cart_workflow(store: Arc<dyn StoreService>) -> Result<Workflow, DefinitionError> {
    let independent: [StepId; 0] = [];
    Workflow::define(
        WORKFLOW_NAME,
        [
            Step::new(FIND_REGION_STEP_ID, find_region(&store)).depends_on(independent.clone()),
            Step::new(FIND_SALES_CHANNEL_STEP_ID, find_sales_channel(&store))
                .depends_on(independent.clone()),
            Step::new(FIND_OR_CREATE_CUSTOMER_STEP_ID, find_or_create_customer(&store))
                .depends_on(independent),
            Step::new(CREATE_CART_STEP_ID, create_cart(&store)),
            Step::new(
                CREATE_PAYMENT_COLLECTION_STEP_ID,
                create_payment_collection(&store),
            ),
        ],
    )?
    .with_result_step(CREATE_CART_STEP_ID)
}
