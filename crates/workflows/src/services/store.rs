//! Storefront service: regions, sales channels, customers, prices and carts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesChannel {
    pub id: String,
    pub name: String,
    pub is_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub variant_id: String,
    pub quantity: u32,
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub region_id: String,
    pub currency_code: String,
    pub sales_channel_id: Option<String>,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub items: Vec<CartLineItem>,
}

impl Cart {
    pub fn total(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.unit_price * u64::from(item.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCollection {
    pub id: String,
    pub cart_id: String,
    pub currency_code: String,
    pub amount: u64,
}

/// Storefront operations used by the cart workflow.
#[async_trait]
pub trait StoreService: Send + Sync {
    /// The first region created in the store.
    async fn default_region(&self) -> Result<Region>;

    async fn retrieve_region(&self, id: &str) -> Result<Region>;

    async fn default_sales_channel(&self) -> Option<SalesChannel>;

    async fn retrieve_sales_channel(&self, id: &str) -> Result<SalesChannel>;

    async fn retrieve_customer(&self, id: &str) -> Result<Customer>;

    async fn find_customer_by_email(&self, email: &str) -> Option<Customer>;

    async fn create_customer(&self, email: &str) -> Customer;

    async fn delete_customer(&self, id: &str) -> Result<()>;

    /// Price of a variant in the given currency, if one is set.
    async fn price(&self, variant_id: &str, currency_code: &str) -> Option<u64>;

    async fn create_cart(&self, cart: Cart) -> Cart;

    async fn delete_cart(&self, id: &str) -> Result<()>;

    async fn create_payment_collection(
        &self,
        cart_id: &str,
        currency_code: &str,
        amount: u64,
    ) -> PaymentCollection;

    async fn delete_payment_collection(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    regions: Vec<Region>,
    sales_channels: HashMap<String, SalesChannel>,
    default_sales_channel: Option<String>,
    customers: HashMap<String, Customer>,
    prices: HashMap<(String, String), u64>,
    carts: HashMap<String, Cart>,
    payment_collections: HashMap<String, PaymentCollection>,
    next_id: u32,
}

impl InMemoryStoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }
}

/// In-memory storefront.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreService {
    state: Arc<RwLock<InMemoryStoreState>>,
}

impl InMemoryStoreService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&self, name: &str, currency_code: &str) -> Region {
        let mut state = self.state.write().unwrap();
        let region = Region {
            id: state.next_id("reg"),
            name: name.to_string(),
            currency_code: currency_code.to_string(),
        };
        state.regions.push(region.clone());
        region
    }

    pub fn remove_region(&self, id: &str) {
        self.state.write().unwrap().regions.retain(|r| r.id != id);
    }

    pub fn add_sales_channel(&self, name: &str, is_disabled: bool) -> SalesChannel {
        let mut state = self.state.write().unwrap();
        let channel = SalesChannel {
            id: state.next_id("sc"),
            name: name.to_string(),
            is_disabled,
        };
        state
            .sales_channels
            .insert(channel.id.clone(), channel.clone());
        channel
    }

    pub fn set_default_sales_channel(&self, id: &str) {
        self.state.write().unwrap().default_sales_channel = Some(id.to_string());
    }

    pub fn add_customer(&self, email: &str) -> Customer {
        let mut state = self.state.write().unwrap();
        let customer = Customer {
            id: state.next_id("cus"),
            email: Some(email.to_string()),
        };
        state
            .customers
            .insert(customer.id.clone(), customer.clone());
        customer
    }

    pub fn set_price(&self, variant_id: &str, currency_code: &str, amount: u64) {
        self.state
            .write()
            .unwrap()
            .prices
            .insert((variant_id.to_string(), currency_code.to_string()), amount);
    }

    pub fn customers_with_email(&self, email: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .customers
            .values()
            .filter(|c| c.email.as_deref() == Some(email))
            .count()
    }

    pub fn cart(&self, id: &str) -> Option<Cart> {
        self.state.read().unwrap().carts.get(id).cloned()
    }

    pub fn cart_count(&self) -> usize {
        self.state.read().unwrap().carts.len()
    }

    pub fn payment_collection_count(&self) -> usize {
        self.state.read().unwrap().payment_collections.len()
    }
}

#[async_trait]
impl StoreService for InMemoryStoreService {
    async fn default_region(&self) -> Result<Region> {
        self.state
            .read()
            .unwrap()
            .regions
            .first()
            .cloned()
            .ok_or(ServiceError::NoRegions)
    }

    async fn retrieve_region(&self, id: &str) -> Result<Region> {
        self.state
            .read()
            .unwrap()
            .regions
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("Region", id))
    }

    async fn default_sales_channel(&self) -> Option<SalesChannel> {
        let state = self.state.read().unwrap();
        state
            .default_sales_channel
            .as_ref()
            .and_then(|id| state.sales_channels.get(id))
            .cloned()
    }

    async fn retrieve_sales_channel(&self, id: &str) -> Result<SalesChannel> {
        self.state
            .read()
            .unwrap()
            .sales_channels
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("Sales channel", id))
    }

    async fn retrieve_customer(&self, id: &str) -> Result<Customer> {
        self.state
            .read()
            .unwrap()
            .customers
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("Customer", id))
    }

    async fn find_customer_by_email(&self, email: &str) -> Option<Customer> {
        self.state
            .read()
            .unwrap()
            .customers
            .values()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned()
    }

    async fn create_customer(&self, email: &str) -> Customer {
        self.add_customer(email)
    }

    async fn delete_customer(&self, id: &str) -> Result<()> {
        self.state
            .write()
            .unwrap()
            .customers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Customer", id))
    }

    async fn price(&self, variant_id: &str, currency_code: &str) -> Option<u64> {
        self.state
            .read()
            .unwrap()
            .prices
            .get(&(variant_id.to_string(), currency_code.to_string()))
            .copied()
    }

    async fn create_cart(&self, mut cart: Cart) -> Cart {
        let mut state = self.state.write().unwrap();
        cart.id = state.next_id("cart");
        state.carts.insert(cart.id.clone(), cart.clone());
        cart
    }

    async fn delete_cart(&self, id: &str) -> Result<()> {
        self.state.write().unwrap().carts.remove(id);
        Ok(())
    }

    async fn create_payment_collection(
        &self,
        cart_id: &str,
        currency_code: &str,
        amount: u64,
    ) -> PaymentCollection {
        let mut state = self.state.write().unwrap();
        let collection = PaymentCollection {
            id: state.next_id("paycol"),
            cart_id: cart_id.to_string(),
            currency_code: currency_code.to_string(),
            amount,
        };
        state
            .payment_collections
            .insert(collection.id.clone(), collection.clone());
        collection
    }

    async fn delete_payment_collection(&self, id: &str) -> Result<()> {
        self.state.write().unwrap().payment_collections.remove(id);
        Ok(())
    }
}
