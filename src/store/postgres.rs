//! Postgres store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::{
    DeliveryLookup, LedgerWrite, OrderPage, OrderSearch, OrderStatusCounts, StatusFilter, Store, StoreError, UnitOfWork,
};
use crate::config::SystemSetting;
use crate::domain::aggregates::{
    Address, CartLine, Courier, Goods, NewOrder, Order, OrderDelivery, OrderDetail, OrderReturn, OrderState, OrderView,
    ShipmentSnapshot, User,
};
use crate::domain::value_objects::{
    AddressId, CancelReason, CartLineId, CourierId, DeliveryId, GoodsArea, GoodsId, OrderId, OrderSn, OrderStatus,
    PaymentMethod, RefundMark, ShipmentType, UnknownCode, UserId,
};
use crate::ledger::LedgerEntry;

const ORDER_COLUMNS: &str = "o.id, o.order_sn, o.user_id, o.goods_area, o.payment, o.shipment_type, o.pick_up_number, \
    o.address_id, o.shipment_name, o.shipment_mobile, o.shipment_address, o.num, o.total, o.finish, o.gift_points, \
    o.status, o.status_cancel, o.status_refund, o.pay_time, o.shipment_time, o.receive_time, o.cancel_time, o.created_at";

const GOODS_COLUMNS: &str = "g.id, g.name, g.price, g.cost_price, g.store, g.weight, g.unit, g.goods_area, \
    ARRAY(SELECT i.url FROM shop_goods_image i WHERE i.goods_id = g.id ORDER BY i.sort, i.id) AS images";

const DETAIL_COLUMNS: &str = "order_id, goods_id, goods_name, goods_image, unit, spec_key_name, num, price, total, gift_points";

const DELIVERY_COLUMNS: &str = "id, order_id, delivery_id, scheduled_time, receipt_time, created_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_sn: String,
    user_id: i64,
    goods_area: i16,
    payment: i16,
    shipment_type: i16,
    pick_up_number: Option<i32>,
    address_id: Option<i64>,
    shipment_name: String,
    shipment_mobile: String,
    shipment_address: String,
    num: i32,
    total: Decimal,
    finish: Decimal,
    gift_points: Decimal,
    status: i16,
    status_cancel: i16,
    status_refund: i16,
    pay_time: Option<DateTime<Utc>>,
    shipment_time: Option<DateTime<Utc>>,
    receive_time: Option<DateTime<Utc>>,
    cancel_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let id = r.id;
        let corrupt = move |e: UnknownCode| StoreError::corrupt("shop_order", id)(e);
        Ok(Self {
            id: OrderId(r.id),
            order_sn: OrderSn::from_stored(r.order_sn),
            user_id: UserId(r.user_id),
            goods_area: GoodsArea::try_from(r.goods_area).map_err(corrupt)?,
            payment: PaymentMethod::try_from(r.payment).map_err(corrupt)?,
            shipment_type: ShipmentType::try_from(r.shipment_type).map_err(corrupt)?,
            pick_up_number: r.pick_up_number.filter(|n| *n != 0),
            address_id: r.address_id.map(AddressId),
            shipment: ShipmentSnapshot { name: r.shipment_name, mobile: r.shipment_mobile, address: r.shipment_address },
            num: r.num,
            total: r.total,
            paid_amount: r.finish,
            gift_points: r.gift_points,
            state: OrderState {
                status: OrderStatus::try_from(r.status).map_err(corrupt)?,
                cancel: CancelReason::from_code(r.status_cancel),
                refund: RefundMark::from_code(r.status_refund),
                pay_time: r.pay_time,
                shipment_time: r.shipment_time,
                receive_time: r.receive_time,
                cancel_time: r.cancel_time,
            },
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GoodsRow {
    id: i64,
    name: String,
    price: Decimal,
    cost_price: Decimal,
    store: i32,
    weight: i32,
    unit: String,
    goods_area: i16,
    images: Vec<String>,
}

impl TryFrom<GoodsRow> for Goods {
    type Error = StoreError;

    fn try_from(r: GoodsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            area: GoodsArea::try_from(r.goods_area).map_err(StoreError::corrupt("shop_goods", r.id))?,
            id: GoodsId(r.id), name: r.name, price: r.price, cost_price: r.cost_price, stock: r.store,
            weight: r.weight, unit: r.unit, images: r.images,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    cart_id: i64,
    user_id: i64,
    spec_item_id: i64,
    num: i32,
    checked: bool,
    #[sqlx(flatten)]
    goods: GoodsRow,
}

#[derive(sqlx::FromRow)]
struct DetailRow {
    order_id: i64,
    goods_id: i64,
    goods_name: String,
    goods_image: String,
    unit: String,
    spec_key_name: String,
    num: i32,
    price: Decimal,
    total: Decimal,
    gift_points: Decimal,
}

impl From<DetailRow> for OrderDetail {
    fn from(r: DetailRow) -> Self {
        Self {
            goods_id: GoodsId(r.goods_id), goods_name: r.goods_name, goods_image: r.goods_image, unit: r.unit,
            spec_key_name: r.spec_key_name, quantity: r.num, price: r.price, total: r.total, gift_points: r.gift_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: i64,
    order_id: i64,
    delivery_id: Option<i64>,
    scheduled_time: Option<DateTime<Utc>>,
    receipt_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<DeliveryRow> for OrderDelivery {
    fn from(r: DeliveryRow) -> Self {
        Self {
            id: DeliveryId(r.id), order_id: OrderId(r.order_id), courier_id: r.delivery_id.map(CourierId),
            scheduled_time: r.scheduled_time, receipt_time: r.receipt_time, created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReturnRow { id: i64, order_id: i64, status: i16, reason: String, created_at: DateTime<Utc> }

impl From<ReturnRow> for OrderReturn {
    fn from(r: ReturnRow) -> Self {
        Self { id: r.id, order_id: OrderId(r.order_id), status: r.status, reason: r.reason, created_at: r.created_at }
    }
}

#[derive(Clone, Debug)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn views(&self, orders: Vec<Order>) -> Result<Vec<OrderView>, StoreError> {
        let ids: Vec<i64> = orders.iter().map(|o| o.id.0).collect();
        let mut details: HashMap<i64, Vec<OrderDetail>> = HashMap::new();
        let rows = sqlx::query_as::<_, DetailRow>(&format!("SELECT {DETAIL_COLUMNS} FROM shop_order_details WHERE order_id = ANY($1) ORDER BY id"))
            .bind(&ids).fetch_all(&self.pool).await?;
        for row in rows { details.entry(row.order_id).or_default().push(row.into()); }

        let mut deliveries: HashMap<i64, OrderDelivery> = sqlx::query_as::<_, DeliveryRow>(&format!("SELECT {DELIVERY_COLUMNS} FROM shop_order_delivery WHERE order_id = ANY($1)"))
            .bind(&ids).fetch_all(&self.pool).await?
            .into_iter().map(|r| (r.order_id, r.into())).collect();

        let mut returns: HashMap<i64, Vec<OrderReturn>> = HashMap::new();
        let rows = sqlx::query_as::<_, ReturnRow>("SELECT id, order_id, status, reason, created_at FROM shop_order_return WHERE order_id = ANY($1) ORDER BY id")
            .bind(&ids).fetch_all(&self.pool).await?;
        for row in rows { returns.entry(row.order_id).or_default().push(row.into()); }

        Ok(orders.into_iter().map(|order| OrderView {
            details: details.remove(&order.id.0).unwrap_or_default(),
            delivery: deliveries.remove(&order.id.0),
            returns: returns.remove(&order.id.0).unwrap_or_default(),
            order,
        }).collect())
    }
}

fn push_search_filters(qb: &mut QueryBuilder<'_, Postgres>, search: &OrderSearch) {
    qb.push(" WHERE TRUE");
    match search.status {
        Some(StatusFilter::Status(status)) => {
            qb.push(" AND o.status_cancel = 0 AND o.status_refund = 0 AND o.status = ").push_bind(status.code());
        }
        Some(StatusFilter::AfterSales) => {
            qb.push(" AND o.status_cancel = 0 AND EXISTS (SELECT 1 FROM shop_order_return r WHERE r.order_id = o.id)");
        }
        None => {}
    }
    if let Some(user_id) = search.user_id { qb.push(" AND o.user_id = ").push_bind(user_id.0); }
    if let Some(area) = search.goods_area { qb.push(" AND o.goods_area = ").push_bind(area.code()); }
    if let Some(payment) = search.payment { qb.push(" AND o.payment = ").push_bind(payment.code()); }
    let ranges = [
        ("o.created_at", search.created),
        ("o.shipment_time", search.shipment_time),
        ("o.receive_time", search.receive_time),
        ("o.cancel_time", search.cancel_time),
    ];
    for (column, range) in ranges {
        if let Some(range) = range {
            qb.push(format!(" AND {column} BETWEEN ")).push_bind(range.start).push(" AND ").push_bind(range.end);
        }
    }
    let needles = [
        ("o.order_sn", &search.order_sn),
        ("o.shipment_name", &search.shipment_name),
        ("o.shipment_mobile", &search.shipment_mobile),
        ("o.shipment_address", &search.shipment_address),
    ];
    for (column, needle) in needles {
        if let Some(needle) = needle.as_deref().filter(|n| !n.is_empty()) {
            qb.push(format!(" AND {column} LIKE ")).push_bind(format!("%{needle}%"));
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(PgUnitOfWork { tx: self.pool.begin().await? }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<(i64, String, String)> = sqlx::query_as("SELECT id, username, open_id FROM sys_users WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, username, open_id)| User { id: UserId(id), username, open_id }))
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM shop_order o WHERE o.id = $1"))
            .bind(id.0).fetch_optional(&self.pool).await?
            .map(Order::try_from).transpose()
    }

    async fn order_view(&self, id: OrderId) -> Result<Option<OrderView>, StoreError> {
        let Some(order) = self.find_order(id).await? else { return Ok(None) };
        Ok(self.views(vec![order]).await?.pop())
    }

    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StoreError> {
        let code: Option<i16> = sqlx::query_scalar("SELECT status FROM shop_order WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?;
        code.map(|c| OrderStatus::try_from(c).map_err(StoreError::corrupt("shop_order", id.0))).transpose()
    }

    async fn user_order_counts(&self, user_id: UserId) -> Result<OrderStatusCounts, StoreError> {
        let (unpaid, delivered, shipped, success): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 0 AND status_cancel = 0),
                COUNT(*) FILTER (WHERE status = 1 AND status_cancel = 0 AND status_refund = 0),
                COUNT(*) FILTER (WHERE status = 2 AND status_cancel = 0 AND status_refund = 0),
                COUNT(*) FILTER (WHERE status = 3 AND status_cancel = 0 AND status_refund = 0)
            FROM shop_order
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.0).fetch_one(&self.pool).await?;
        Ok(OrderStatusCounts { unpaid, delivered, shipped, success })
    }

    async fn search_orders(&self, search: &OrderSearch) -> Result<OrderPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM shop_order o");
        push_search_filters(&mut count, search);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM shop_order o"));
        push_search_filters(&mut select, search);
        select.push(" ORDER BY o.created_at DESC, o.id DESC LIMIT ").push_bind(search.limit())
            .push(" OFFSET ").push_bind(search.offset());
        let orders = select.build_query_as::<OrderRow>().fetch_all(&self.pool).await?
            .into_iter().map(Order::try_from).collect::<Result<Vec<_>, _>>()?;
        debug!(total, returned = orders.len(), "Order search");

        Ok(OrderPage { total, orders: self.views(orders).await? })
    }

    async fn find_delivery(&self, lookup: DeliveryLookup) -> Result<Option<OrderDelivery>, StoreError> {
        let (column, id) = match lookup {
            DeliveryLookup::ById(id) => ("id", id.0),
            DeliveryLookup::ByOrder(order_id) => ("order_id", order_id.0),
        };
        let row = sqlx::query_as::<_, DeliveryRow>(&format!("SELECT {DELIVERY_COLUMNS} FROM shop_order_delivery WHERE {column} = $1"))
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Into::into))
    }
}

pub struct PgUnitOfWork { tx: Transaction<'static, Postgres> }

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<(i64, String, String)> = sqlx::query_as("SELECT id, username, open_id FROM sys_users WHERE id = $1")
            .bind(id.0).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|(id, username, open_id)| User { id: UserId(id), username, open_id }))
    }

    async fn address(&mut self, id: AddressId) -> Result<Option<Address>, StoreError> {
        let row: Option<(i64, i64, String, String, Option<i16>, String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, name, mobile, sex, address, title, detail FROM shop_user_address WHERE id = $1",
        )
        .bind(id.0).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|(id, user_id, name, mobile, sex, address, title, detail)| Address {
            id: AddressId(id), user_id: UserId(user_id), name, mobile, sex, address, title, detail,
        }))
    }

    async fn system_setting(&mut self, key: &str) -> Result<Option<SystemSetting>, StoreError> {
        let row: Option<(String, bool)> = sqlx::query_as("SELECT value, enabled FROM sys_config WHERE key = $1")
            .bind(key).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|(value, enabled)| SystemSetting { value, enabled }))
    }

    async fn points_goods(&mut self, id: GoodsId) -> Result<Option<Goods>, StoreError> {
        sqlx::query_as::<_, GoodsRow>(&format!("SELECT {GOODS_COLUMNS} FROM shop_goods g WHERE g.id = $1 AND g.goods_area = $2"))
            .bind(id.0).bind(GoodsArea::Points.code())
            .fetch_optional(&mut *self.tx).await?
            .map(Goods::try_from).transpose()
    }

    async fn checked_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>, StoreError> {
        let rows = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT c.id AS cart_id, c.user_id, c.spec_item_id, c.num, c.checked, {GOODS_COLUMNS} \
             FROM shop_cart c JOIN shop_goods g ON g.id = c.goods_id \
             WHERE c.user_id = $1 AND c.checked ORDER BY c.id FOR UPDATE OF c"
        ))
        .bind(user_id.0).fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(|r| Ok(CartLine {
            id: CartLineId(r.cart_id), user_id: UserId(r.user_id), spec_item_id: r.spec_item_id,
            quantity: r.num, checked: r.checked, goods: r.goods.try_into()?,
        })).collect()
    }

    async fn delete_cart_lines(&mut self, ids: &[CartLineId]) -> Result<u64, StoreError> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("DELETE FROM shop_cart WHERE id = ANY($1)").bind(&ids).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn decrement_stock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE shop_goods SET store = store - $2 WHERE id = $1 AND store >= $2")
            .bind(goods_id.0).bind(quantity).execute(&mut *self.tx).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn restock(&mut self, goods_id: GoodsId, quantity: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE shop_goods SET store = store + $2 WHERE id = $1")
            .bind(goods_id.0).bind(quantity).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn next_pickup_number(&mut self) -> Result<i32, StoreError> {
        let number: i32 = sqlx::query_scalar(
            r#"
            UPDATE shop_pickup_counter
            SET last_number = GREATEST(
                last_number,
                COALESCE((SELECT MAX(pick_up_number) FROM shop_order WHERE pick_up_number IS NOT NULL AND pick_up_number <> 0), 0)
            ) + 1
            WHERE id = 1
            RETURNING last_number
            "#,
        )
        .fetch_one(&mut *self.tx).await?;
        Ok(number)
    }

    async fn insert_order(&mut self, o: &NewOrder, created_at: DateTime<Utc>) -> Result<OrderId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO shop_order (
                order_sn, user_id, goods_area, payment, shipment_type, pick_up_number, address_id,
                shipment_name, shipment_mobile, shipment_address, num, total, finish, gift_points,
                status, status_cancel, status_refund, pay_time, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $19)
            RETURNING id
            "#,
        )
        .bind(o.order_sn.as_str())
        .bind(o.user_id.0)
        .bind(o.goods_area.code())
        .bind(o.payment.code())
        .bind(o.shipment_type.code())
        .bind(o.pick_up_number)
        .bind(o.address_id.map(|a| a.0))
        .bind(&o.shipment.name)
        .bind(&o.shipment.mobile)
        .bind(&o.shipment.address)
        .bind(o.num)
        .bind(o.total)
        .bind(o.paid_amount)
        .bind(o.gift_points)
        .bind(o.state.status.code())
        .bind(o.state.cancel.map_or(0, CancelReason::code))
        .bind(o.state.refund.map_or(0, RefundMark::code))
        .bind(o.state.pay_time)
        .bind(created_at)
        .fetch_one(&mut *self.tx).await?;
        Ok(OrderId(id))
    }

    async fn insert_order_details(&mut self, order_id: OrderId, details: &[OrderDetail]) -> Result<(), StoreError> {
        if details.is_empty() { return Ok(()); }
        let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO shop_order_details ({DETAIL_COLUMNS}) "));
        qb.push_values(details, |mut b, d| {
            b.push_bind(order_id.0).push_bind(d.goods_id.0).push_bind(d.goods_name.clone()).push_bind(d.goods_image.clone())
                .push_bind(d.unit.clone()).push_bind(d.spec_key_name.clone()).push_bind(d.quantity).push_bind(d.price)
                .push_bind(d.total).push_bind(d.gift_points);
        });
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn order_details(&mut self, order_id: OrderId) -> Result<Vec<OrderDetail>, StoreError> {
        let rows = sqlx::query_as::<_, DetailRow>(&format!("SELECT {DETAIL_COLUMNS} FROM shop_order_details WHERE order_id = $1 ORDER BY id"))
            .bind(order_id.0).fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM shop_order o WHERE o.id = $1 FOR UPDATE"))
            .bind(id.0).fetch_optional(&mut *self.tx).await?
            .map(Order::try_from).transpose()
    }

    async fn transition_order(&mut self, id: OrderId, expected: &OrderState, next: &OrderState) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE shop_order
            SET status = $5, status_cancel = $6, status_refund = $7,
                pay_time = $8, shipment_time = $9, receive_time = $10, cancel_time = $11, updated_at = NOW()
            WHERE id = $1 AND status = $2 AND status_cancel = $3 AND status_refund = $4
            "#,
        )
        .bind(id.0)
        .bind(expected.status.code())
        .bind(expected.cancel.map_or(0, CancelReason::code))
        .bind(expected.refund.map_or(0, RefundMark::code))
        .bind(next.status.code())
        .bind(next.cancel.map_or(0, CancelReason::code))
        .bind(next.refund.map_or(0, RefundMark::code))
        .bind(next.pay_time)
        .bind(next.shipment_time)
        .bind(next.receive_time)
        .bind(next.cancel_time)
        .execute(&mut *self.tx).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_paid_amount(&mut self, id: OrderId, amount: Decimal) -> Result<(), StoreError> {
        sqlx::query("UPDATE shop_order SET finish = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.0).bind(amount).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_order(&mut self, id: OrderId) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM shop_order_details WHERE order_id = $1").bind(id.0).execute(&mut *self.tx).await?;
        sqlx::query("DELETE FROM shop_order_delivery WHERE order_id = $1").bind(id.0).execute(&mut *self.tx).await?;
        let result = sqlx::query("DELETE FROM shop_order WHERE id = $1").bind(id.0).execute(&mut *self.tx).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delivery_for_order(&mut self, order_id: OrderId) -> Result<Option<OrderDelivery>, StoreError> {
        let row = sqlx::query_as::<_, DeliveryRow>(&format!("SELECT {DELIVERY_COLUMNS} FROM shop_order_delivery WHERE order_id = $1 FOR UPDATE"))
            .bind(order_id.0).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(Into::into))
    }

    async fn insert_delivery(
        &mut self,
        order_id: OrderId,
        courier_id: Option<CourierId>,
        scheduled_time: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<OrderDelivery, StoreError> {
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "INSERT INTO shop_order_delivery (order_id, delivery_id, scheduled_time, created_at) VALUES ($1, $2, $3, $4) RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(order_id.0).bind(courier_id.map(|c| c.0)).bind(scheduled_time).bind(created_at)
        .fetch_one(&mut *self.tx).await?;
        Ok(row.into())
    }

    async fn update_delivery(&mut self, d: &OrderDelivery) -> Result<(), StoreError> {
        sqlx::query("UPDATE shop_order_delivery SET delivery_id = $2, scheduled_time = $3, receipt_time = $4 WHERE id = $1")
            .bind(d.id.0).bind(d.courier_id.map(|c| c.0)).bind(d.scheduled_time).bind(d.receipt_time)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn courier(&mut self, id: CourierId) -> Result<Option<Courier>, StoreError> {
        let row: Option<(i64, String, String, i32)> = sqlx::query_as("SELECT id, name, mobile, deliver_count FROM business_user_delivery WHERE id = $1")
            .bind(id.0).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|(id, name, mobile, deliver_count)| Courier { id: CourierId(id), name, mobile, deliver_count }))
    }

    async fn increment_courier_count(&mut self, id: CourierId) -> Result<(), StoreError> {
        sqlx::query("UPDATE business_user_delivery SET deliver_count = deliver_count + 1 WHERE id = $1")
            .bind(id.0).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn post_ledger_entry(&mut self, e: &LedgerEntry) -> Result<LedgerWrite, StoreError> {
        let entry_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO user_finance (user_id, username, account, operation, amount, reference_id, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (account, reference_id, operation) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(e.user_id.0).bind(&e.username).bind(e.account.as_str()).bind(e.operation.code())
        .bind(e.amount).bind(&e.reference_id).bind(&e.description)
        .fetch_optional(&mut *self.tx).await?;
        let Some(entry_id) = entry_id else { return Ok(LedgerWrite::Duplicate) };

        sqlx::query("INSERT INTO user_account (user_id, account, balance) VALUES ($1, $2, 0) ON CONFLICT (user_id, account) DO NOTHING")
            .bind(e.user_id.0).bind(e.account.as_str()).execute(&mut *self.tx).await?;
        let balance: Option<Decimal> = sqlx::query_scalar(
            "UPDATE user_account SET balance = balance + $3 WHERE user_id = $1 AND account = $2 AND balance + $3 >= 0 RETURNING balance",
        )
        .bind(e.user_id.0).bind(e.account.as_str()).bind(e.amount)
        .fetch_optional(&mut *self.tx).await?;

        match balance {
            Some(balance) => {
                sqlx::query("UPDATE user_finance SET balance = $2 WHERE id = $1")
                    .bind(entry_id).bind(balance).execute(&mut *self.tx).await?;
                Ok(LedgerWrite::Applied { balance })
            }
            None => {
                // the caller aborts the transaction, which also discards the finance row above
                let balance: Decimal = sqlx::query_scalar("SELECT balance FROM user_account WHERE user_id = $1 AND account = $2")
                    .bind(e.user_id.0).bind(e.account.as_str()).fetch_one(&mut *self.tx).await?;
                Ok(LedgerWrite::InsufficientBalance { balance })
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
