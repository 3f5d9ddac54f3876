//! Storage layer
//!
//! A [`Store`] hands out [`UnitOfWork`]s: one database transaction each.
//! Dropping a unit of work without calling [`UnitOfWork::commit`] rolls it
//! back, so every early `?` return leaves no trace.
//!
//! The shared counters (goods stock, pickup numbers) and order status are only
//! ever changed through single conditional statements; nothing here reads a
//! value and writes it back in a separate step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SystemSetting;
use crate::domain::aggregates::{
    Address, CartLine, Courier, Goods, NewOrder, Order, OrderDelivery, OrderDetail, OrderState, OrderView, User,
};
use crate::domain::value_objects::{
    AddressId, CartLineId, CourierId, DeliveryId, GoodsArea, GoodsId, OrderId, OrderStatus, PaymentMethod, TimeRange,
    UnknownCode, UserId,
};
use crate::ledger::LedgerEntry;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt { table: &'static str, id: i64, reason: String },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, id: i64) -> impl FnOnce(UnknownCode) -> Self {
        move |e| Self::Corrupt { table, id, reason: e.to_string() }
    }
}

/// Result of appending to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerWrite {
    Applied { balance: Decimal },
    /// An entry with the same account, reference and operation already exists.
    Duplicate,
    /// The entry would take the balance below zero; nothing was written.
    InsufficientBalance { balance: Decimal },
}

/// Which orders a status filter selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFilter {
    /// The status, with neither cancel nor refund flag set.
    Status(OrderStatus),
    /// Orders with a return request that are not cancelled.
    AfterSales,
}

impl StatusFilter {
    pub const AFTER_SALES_CODE: i16 = 10;

    /// Unrecognised codes select nothing in particular and are dropped.
    pub fn from_code(code: i16) -> Option<Self> {
        if code == Self::AFTER_SALES_CODE { return Some(Self::AfterSales); }
        OrderStatus::try_from(code).ok().map(Self::Status)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSearch {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<StatusFilter>,
    pub user_id: Option<UserId>,
    pub goods_area: Option<GoodsArea>,
    pub created: Option<TimeRange>,
    pub shipment_time: Option<TimeRange>,
    pub receive_time: Option<TimeRange>,
    pub cancel_time: Option<TimeRange>,
    pub order_sn: Option<String>,
    pub shipment_name: Option<String>,
    pub shipment_mobile: Option<String>,
    pub shipment_address: Option<String>,
    pub payment: Option<PaymentMethod>,
}

impl OrderSearch {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn limit(&self) -> i64 {
        let size = if self.page_size == 0 { Self::DEFAULT_PAGE_SIZE } else { self.page_size.min(Self::MAX_PAGE_SIZE) };
        i64::from(size)
    }

    pub fn offset(&self) -> i64 { i64::from(self.page.max(1) - 1) * self.limit() }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderPage { pub total: i64, pub orders: Vec<OrderView> }

/// Per-user order counts for the "my orders" badges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusCounts { pub unpaid: i64, pub delivered: i64, pub shipped: i64, pub success: i64 }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryLookup { ById(DeliveryId), ByOrder(OrderId) }

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    async fn order_view(&self, id: OrderId) -> Result<Option<OrderView>, StoreError>;
    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StoreError>;
    async fn user_order_counts(&self, user_id: UserId) -> Result<OrderStatusCounts, StoreError>;
    async fn search_orders(&self, search: &OrderSearch) -> Result<OrderPage, StoreError>;
    async fn find_delivery(&self, lookup: DeliveryLookup) -> Result<Option<OrderDelivery>, StoreError>;
}

/// One transaction against the shop database.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn user(&mut self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn address(&mut self, id: AddressId) -> Result<Option<Address>, StoreError>;
    async fn system_setting(&mut self, key: &str) -> Result<Option<SystemSetting>, StoreError>;

    /// Goods in the points partition only.
    async fn points_goods(&mut self, id: GoodsId) -> Result<Option<Goods>, StoreError>;
    /// Checked cart lines, held against concurrent checkouts until the transaction ends.
    async fn checked_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>, StoreError>;
    /// Returns how many of the lines were still present.
    async fn delete_cart_lines(&mut self, ids: &[CartLineId]) -> Result<u64, StoreError>;

    /// `stock = stock - quantity` only where the result stays non-negative. Returns whether it applied.
    async fn decrement_stock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<bool, StoreError>;
    async fn restock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<(), StoreError>;

    /// Atomically advances the pickup counter past every issued number; first value is 101.
    async fn next_pickup_number(&mut self) -> Result<i32, StoreError>;

    async fn insert_order(&mut self, order: &NewOrder, created_at: DateTime<Utc>) -> Result<OrderId, StoreError>;
    async fn insert_order_details(&mut self, order_id: OrderId, details: &[OrderDetail]) -> Result<(), StoreError>;
    async fn order_details(&mut self, order_id: OrderId) -> Result<Vec<OrderDetail>, StoreError>;
    /// Reads the order and holds it against concurrent writers until the transaction ends.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;
    /// Compare-and-swap of the state columns. Returns false when the stored state is no longer `expected`.
    async fn transition_order(&mut self, id: OrderId, expected: &OrderState, next: &OrderState) -> Result<bool, StoreError>;
    async fn set_paid_amount(&mut self, id: OrderId, amount: Decimal) -> Result<(), StoreError>;
    /// Deletes the order with its details, delivery record and return requests. Returns false if there was no such order.
    async fn delete_order(&mut self, id: OrderId) -> Result<bool, StoreError>;

    async fn delivery_for_order(&mut self, order_id: OrderId) -> Result<Option<OrderDelivery>, StoreError>;
    async fn insert_delivery(
        &mut self,
        order_id: OrderId,
        courier_id: Option<CourierId>,
        scheduled_time: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<OrderDelivery, StoreError>;
    async fn update_delivery(&mut self, delivery: &OrderDelivery) -> Result<(), StoreError>;
    async fn courier(&mut self, id: CourierId) -> Result<Option<Courier>, StoreError>;
    async fn increment_courier_count(&mut self, id: CourierId) -> Result<(), StoreError>;

    /// Idempotent on (account, reference id, operation); never drives a balance negative.
    async fn post_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<LedgerWrite, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_codes() {
        assert_eq!(StatusFilter::from_code(1), Some(StatusFilter::Status(OrderStatus::Paid)));
        assert_eq!(StatusFilter::from_code(10), Some(StatusFilter::AfterSales));
        assert_eq!(StatusFilter::from_code(5), None);
    }

    #[test]
    fn test_paging() {
        let search = OrderSearch { page: 3, page_size: 20, ..Default::default() };
        assert_eq!((search.limit(), search.offset()), (20, 40));
        let search = OrderSearch { page: 0, page_size: 0, ..Default::default() };
        assert_eq!((search.limit(), search.offset()), (10, 0));
        let search = OrderSearch { page: 1, page_size: 1000, ..Default::default() };
        assert_eq!(search.limit(), 100);
    }
}
