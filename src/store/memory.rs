//! In-process store
//!
//! Each unit of work holds the table lock for its whole lifetime and mutates a
//! private copy of the tables; commit swaps the copy in, drop throws it away.
//! Transactions are therefore fully serialized.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    DeliveryLookup, LedgerWrite, OrderPage, OrderSearch, OrderStatusCounts, StatusFilter, Store, StoreError, UnitOfWork,
};
use crate::config::SystemSetting;
use crate::domain::aggregates::{
    Address, CartLine, Courier, Goods, NewOrder, Order, OrderDelivery, OrderDetail, OrderReturn, OrderState, OrderView, User,
};
use crate::domain::value_objects::{
    AddressId, CartLineId, CourierId, DeliveryId, GoodsArea, GoodsId, OrderId, OrderStatus, UserId,
};
use crate::ledger::{Account, LedgerEntry};

const FIRST_PICKUP_NUMBER: i32 = 101;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartRow {
    pub id: CartLineId,
    pub user_id: UserId,
    pub goods_id: GoodsId,
    pub spec_item_id: i64,
    pub quantity: i32,
    pub checked: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryTables {
    pub users: BTreeMap<UserId, User>,
    pub addresses: BTreeMap<AddressId, Address>,
    pub goods: BTreeMap<GoodsId, Goods>,
    pub cart: BTreeMap<CartLineId, CartRow>,
    pub settings: HashMap<String, SystemSetting>,
    pub orders: BTreeMap<OrderId, Order>,
    pub details: BTreeMap<OrderId, Vec<OrderDetail>>,
    pub deliveries: BTreeMap<DeliveryId, OrderDelivery>,
    pub returns: Vec<OrderReturn>,
    pub couriers: BTreeMap<CourierId, Courier>,
    pub balances: HashMap<(UserId, Account), Decimal>,
    pub ledger: Vec<LedgerEntry>,
    pub last_pickup_number: Option<i32>,
    next_id: i64,
}

impl MemoryTables {
    fn next_id(&mut self) -> i64 { self.next_id += 1; self.next_id }

    pub fn insert_user(&mut self, username: &str) -> UserId {
        let id = UserId(self.next_id());
        self.users.insert(id, User { id, username: username.to_string(), open_id: format!("openid-{username}") });
        id
    }

    pub fn insert_goods(&mut self, goods: Goods) -> GoodsId {
        let id = goods.id;
        self.goods.insert(id, goods);
        id
    }

    pub fn insert_cart_line(&mut self, user_id: UserId, goods_id: GoodsId, quantity: i32, checked: bool) -> CartLineId {
        let id = CartLineId(self.next_id());
        self.cart.insert(id, CartRow { id, user_id, goods_id, spec_item_id: 0, quantity, checked });
        id
    }

    pub fn insert_address(&mut self, address: Address) -> AddressId {
        let id = address.id;
        self.addresses.insert(id, address);
        id
    }

    pub fn insert_courier(&mut self, name: &str) -> CourierId {
        let id = CourierId(self.next_id());
        self.couriers.insert(id, Courier { id, name: name.to_string(), mobile: String::new(), deliver_count: 0 });
        id
    }

    pub fn set_setting(&mut self, key: &str, value: &str, enabled: bool) {
        self.settings.insert(key.to_string(), SystemSetting { value: value.to_string(), enabled });
    }

    pub fn set_balance(&mut self, user_id: UserId, account: Account, amount: Decimal) {
        self.balances.insert((user_id, account), amount);
    }

    pub fn stock(&self, goods_id: GoodsId) -> Option<i32> { self.goods.get(&goods_id).map(|g| g.stock) }

    pub fn cart_of(&self, user_id: UserId) -> Vec<&CartRow> { self.cart.values().filter(|c| c.user_id == user_id).collect() }

    pub fn balance(&self, user_id: UserId, account: Account) -> Decimal {
        self.balances.get(&(user_id, account)).copied().unwrap_or(Decimal::ZERO)
    }

    fn view(&self, order: &Order) -> OrderView {
        OrderView {
            order: order.clone(),
            details: self.details.get(&order.id).cloned().unwrap_or_default(),
            delivery: self.deliveries.values().find(|d| d.order_id == order.id).cloned(),
            returns: self.returns.iter().filter(|r| r.order_id == order.id).cloned().collect(),
        }
    }

    fn has_return(&self, order_id: OrderId) -> bool { self.returns.iter().any(|r| r.order_id == order_id) }

    fn matches(&self, search: &OrderSearch, order: &Order) -> bool {
        let like = |needle: &Option<String>, hay: &str| needle.as_deref().map_or(true, |n| n.is_empty() || hay.contains(n));
        let state = &order.state;
        let status_ok = match search.status {
            None => true,
            Some(StatusFilter::Status(status)) => state.status == status && state.is_open(),
            Some(StatusFilter::AfterSales) => self.has_return(order.id) && state.cancel.is_none(),
        };
        status_ok
            && search.user_id.map_or(true, |u| order.user_id == u)
            && search.goods_area.map_or(true, |a| order.goods_area == a)
            && search.payment.map_or(true, |p| order.payment == p)
            && search.created.map_or(true, |r| r.contains(order.created_at))
            && search.shipment_time.map_or(true, |r| r.contains_opt(state.shipment_time))
            && search.receive_time.map_or(true, |r| r.contains_opt(state.receive_time))
            && search.cancel_time.map_or(true, |r| r.contains_opt(state.cancel_time))
            && like(&search.order_sn, order.order_sn.as_str())
            && like(&search.shipment_name, &order.shipment.name)
            && like(&search.shipment_mobile, &order.shipment.mobile)
            && like(&search.shipment_address, &order.shipment.address)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore { tables: Arc<Mutex<MemoryTables>> }

impl MemoryStore {
    pub async fn seed<R>(&self, f: impl FnOnce(&mut MemoryTables) -> R) -> R { f(&mut *self.tables.lock().await) }

    pub async fn snapshot(&self) -> MemoryTables { self.tables.lock().await.clone() }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn order_view(&self, id: OrderId) -> Result<Option<OrderView>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.get(&id).map(|o| tables.view(o)))
    }

    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StoreError> {
        Ok(self.tables.lock().await.orders.get(&id).map(|o| o.state.status))
    }

    async fn user_order_counts(&self, user_id: UserId) -> Result<OrderStatusCounts, StoreError> {
        let tables = self.tables.lock().await;
        let mut counts = OrderStatusCounts::default();
        for state in tables.orders.values().filter(|o| o.user_id == user_id).map(|o| &o.state) {
            match state.status {
                OrderStatus::Unpaid if state.cancel.is_none() => counts.unpaid += 1,
                OrderStatus::Paid if state.is_open() => counts.delivered += 1,
                OrderStatus::Shipped if state.is_open() => counts.shipped += 1,
                OrderStatus::Received if state.is_open() => counts.success += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn search_orders(&self, search: &OrderSearch) -> Result<OrderPage, StoreError> {
        let tables = self.tables.lock().await;
        let mut hits: Vec<&Order> = tables.orders.values().filter(|o| tables.matches(search, o)).collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = hits.len() as i64;
        let orders = hits.into_iter()
            .skip(search.offset() as usize)
            .take(search.limit() as usize)
            .map(|o| tables.view(o))
            .collect();
        Ok(OrderPage { total, orders })
    }

    async fn find_delivery(&self, lookup: DeliveryLookup) -> Result<Option<OrderDelivery>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(match lookup {
            DeliveryLookup::ById(id) => tables.deliveries.get(&id).cloned(),
            DeliveryLookup::ByOrder(order_id) => tables.deliveries.values().find(|d| d.order_id == order_id).cloned(),
        })
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryTables>,
    working: MemoryTables,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn user(&mut self, id: UserId) -> Result<Option<User>, StoreError> { Ok(self.working.users.get(&id).cloned()) }

    async fn address(&mut self, id: AddressId) -> Result<Option<Address>, StoreError> {
        Ok(self.working.addresses.get(&id).cloned())
    }

    async fn system_setting(&mut self, key: &str) -> Result<Option<SystemSetting>, StoreError> {
        Ok(self.working.settings.get(key).cloned())
    }

    async fn points_goods(&mut self, id: GoodsId) -> Result<Option<Goods>, StoreError> {
        Ok(self.working.goods.get(&id).filter(|g| g.area == GoodsArea::Points).cloned())
    }

    async fn checked_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>, StoreError> {
        let t = &self.working;
        Ok(t.cart.values()
            .filter(|c| c.user_id == user_id && c.checked)
            .filter_map(|c| t.goods.get(&c.goods_id).map(|g| CartLine {
                id: c.id, user_id: c.user_id, spec_item_id: c.spec_item_id, quantity: c.quantity, checked: c.checked, goods: g.clone(),
            }))
            .collect())
    }

    async fn delete_cart_lines(&mut self, ids: &[CartLineId]) -> Result<u64, StoreError> {
        Ok(ids.iter().filter(|id| self.working.cart.remove(*id).is_some()).count() as u64)
    }

    async fn decrement_stock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<bool, StoreError> {
        match self.working.goods.get_mut(&goods_id) {
            Some(g) if g.stock >= quantity => { g.stock -= quantity; Ok(true) }
            _ => Ok(false),
        }
    }

    async fn restock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<(), StoreError> {
        if let Some(g) = self.working.goods.get_mut(&goods_id) { g.stock += quantity; }
        Ok(())
    }

    async fn next_pickup_number(&mut self) -> Result<i32, StoreError> {
        let t = &mut self.working;
        let issued = t.orders.values().filter_map(|o| o.pick_up_number).filter(|n| *n != 0).max();
        let last = t.last_pickup_number.into_iter().chain(issued).max().unwrap_or(FIRST_PICKUP_NUMBER - 1);
        t.last_pickup_number = Some(last + 1);
        Ok(last + 1)
    }

    async fn insert_order(&mut self, order: &NewOrder, created_at: DateTime<Utc>) -> Result<OrderId, StoreError> {
        let id = OrderId(self.working.next_id());
        self.working.orders.insert(id, Order::from_new(id, created_at, order.clone()));
        Ok(id)
    }

    async fn insert_order_details(&mut self, order_id: OrderId, details: &[OrderDetail]) -> Result<(), StoreError> {
        self.working.details.entry(order_id).or_default().extend_from_slice(details);
        Ok(())
    }

    async fn order_details(&mut self, order_id: OrderId) -> Result<Vec<OrderDetail>, StoreError> {
        Ok(self.working.details.get(&order_id).cloned().unwrap_or_default())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn transition_order(&mut self, id: OrderId, expected: &OrderState, next: &OrderState) -> Result<bool, StoreError> {
        match self.working.orders.get_mut(&id) {
            Some(order) if &order.state == expected => { order.state = next.clone(); Ok(true) }
            _ => Ok(false),
        }
    }

    async fn set_paid_amount(&mut self, id: OrderId, amount: Decimal) -> Result<(), StoreError> {
        if let Some(order) = self.working.orders.get_mut(&id) { order.paid_amount = amount; }
        Ok(())
    }

    async fn delete_order(&mut self, id: OrderId) -> Result<bool, StoreError> {
        let t = &mut self.working;
        if t.orders.remove(&id).is_none() { return Ok(false); }
        t.details.remove(&id);
        t.deliveries.retain(|_, d| d.order_id != id);
        t.returns.retain(|r| r.order_id != id);
        Ok(true)
    }

    async fn delivery_for_order(&mut self, order_id: OrderId) -> Result<Option<OrderDelivery>, StoreError> {
        Ok(self.working.deliveries.values().find(|d| d.order_id == order_id).cloned())
    }

    async fn insert_delivery(
        &mut self,
        order_id: OrderId,
        courier_id: Option<CourierId>,
        scheduled_time: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<OrderDelivery, StoreError> {
        let delivery = OrderDelivery { id: DeliveryId(self.working.next_id()), order_id, courier_id, scheduled_time, receipt_time: None, created_at };
        self.working.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn update_delivery(&mut self, delivery: &OrderDelivery) -> Result<(), StoreError> {
        self.working.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn courier(&mut self, id: CourierId) -> Result<Option<Courier>, StoreError> { Ok(self.working.couriers.get(&id).cloned()) }

    async fn increment_courier_count(&mut self, id: CourierId) -> Result<(), StoreError> {
        if let Some(c) = self.working.couriers.get_mut(&id) { c.deliver_count += 1; }
        Ok(())
    }

    async fn post_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<LedgerWrite, StoreError> {
        let t = &mut self.working;
        let duplicate = t.ledger.iter().any(|e| {
            e.account == entry.account && e.reference_id == entry.reference_id && e.operation == entry.operation
        });
        if duplicate { return Ok(LedgerWrite::Duplicate); }
        let balance = t.balance(entry.user_id, entry.account);
        let next = balance + entry.amount;
        if next < Decimal::ZERO { return Ok(LedgerWrite::InsufficientBalance { balance }); }
        t.balances.insert((entry.user_id, entry.account), next);
        t.ledger.push(entry.clone());
        Ok(LedgerWrite::Applied { balance: next })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
