//! Storage contracts against a live Postgres.
//!
//! Run with `DATABASE_URL=postgres://... cargo test --features postgres-tests`.
#![cfg(feature = "postgres-tests")]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use fresh_shop_orders::domain::aggregates::User;
use fresh_shop_orders::domain::value_objects::{
    AddressId, CourierId, GoodsArea, GoodsId, OrderId, OrderStatus, ShipmentType, TimeRange, UserId,
};
use fresh_shop_orders::ledger::{Account, LedgerEntry, LedgerError, LedgerGateway, LedgerOperation, Posting};
use fresh_shop_orders::payment::UnavailablePaymentGateway;
use fresh_shop_orders::publisher::NoopPublisher;
use fresh_shop_orders::service::{CheckoutRequest, Dispatch, ReceiptConfirmation};
use fresh_shop_orders::store::{OrderSearch, StatusFilter, Store};
use fresh_shop_orders::{FulfillmentError, OrderService, PgStore, StoreLedger};

async fn insert_user(pool: &PgPool, username: &str) -> UserId {
    let id: i64 = sqlx::query_scalar("INSERT INTO sys_users (username, open_id) VALUES ($1, $2) RETURNING id")
        .bind(username).bind(format!("open-{username}"))
        .fetch_one(pool).await.unwrap();
    UserId(id)
}

async fn insert_goods(pool: &PgPool, price: Decimal, cost_price: Decimal, stock: i32, area: GoodsArea) -> GoodsId {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO shop_goods (name, price, cost_price, store, unit, goods_area) VALUES ('apple', $1, $2, $3, 'kg', $4) RETURNING id",
    )
    .bind(price).bind(cost_price).bind(stock).bind(area.code())
    .fetch_one(pool).await.unwrap();
    GoodsId(id)
}

async fn add_to_cart(pool: &PgPool, user: UserId, goods: GoodsId, num: i32) {
    sqlx::query("INSERT INTO shop_cart (user_id, goods_id, num, checked) VALUES ($1, $2, $3, TRUE)")
        .bind(user.0).bind(goods.0).bind(num)
        .execute(pool).await.unwrap();
}

async fn set_point(pool: &PgPool, value: &str) {
    sqlx::query("UPDATE sys_config SET value = $1, enabled = TRUE WHERE key = 'point'")
        .bind(value).execute(pool).await.unwrap();
}

async fn stock_of(pool: &PgPool, goods: GoodsId) -> i32 {
    sqlx::query_scalar("SELECT store FROM shop_goods WHERE id = $1").bind(goods.0).fetch_one(pool).await.unwrap()
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}")).fetch_one(pool).await.unwrap()
}

fn entry(user: &User, amount: i64, reference: &str, operation: LedgerOperation) -> LedgerEntry {
    LedgerEntry::new(Account::Points, user, Decimal::from(amount), reference, operation, "test")
}

fn service(pool: &PgPool) -> OrderService {
    OrderService::new(
        Arc::new(PgStore::new(pool.clone())), Arc::new(StoreLedger), Arc::new(UnavailablePaymentGateway),
        Arc::new(NoopPublisher), "SN",
    )
}

fn checkout(user: UserId) -> CheckoutRequest {
    CheckoutRequest {
        user_id: user, address_id: None, points_goods_id: None,
        shipment_type: ShipmentType::Delivery, client_ip: "10.0.0.1".into(),
    }
}

async fn place(svc: &OrderService, pool: &PgPool, user: UserId, goods: GoodsId) -> OrderId {
    add_to_cart(pool, user, goods, 1).await;
    svc.create_order(checkout(user)).await.unwrap().order.order.id
}

#[sqlx::test(migrations = "./migrations")]
async fn test_stock_decrement_is_conditional(pool: PgPool) {
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::from(10), 5, GoodsArea::Normal).await;
    let store = PgStore::new(pool.clone());

    let mut uow = store.begin().await.unwrap();
    assert!(uow.decrement_stock(goods, 3).await.unwrap());
    assert!(!uow.decrement_stock(goods, 3).await.unwrap());
    assert!(uow.decrement_stock(goods, 2).await.unwrap());
    uow.restock(goods, 1).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(stock_of(&pool, goods).await, 1);

    let mut uow = store.begin().await.unwrap();
    assert!(uow.decrement_stock(goods, 1).await.unwrap());
    drop(uow);
    assert_eq!(stock_of(&pool, goods).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_pickup_counter_starts_at_101_and_passes_existing_numbers(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let mut uow = store.begin().await.unwrap();
    assert_eq!(uow.next_pickup_number().await.unwrap(), 101);
    assert_eq!(uow.next_pickup_number().await.unwrap(), 102);
    uow.commit().await.unwrap();

    let user = insert_user(&pool, "erin").await;
    sqlx::query("INSERT INTO shop_order (order_sn, user_id, payment, num, total, pick_up_number) VALUES ('SN-LEGACY', $1, 1, 1, 1, 500)")
        .bind(user.0).execute(&pool).await.unwrap();

    let mut uow = store.begin().await.unwrap();
    assert_eq!(uow.next_pickup_number().await.unwrap(), 501);
    drop(uow);
    let mut uow = store.begin().await.unwrap();
    assert_eq!(uow.next_pickup_number().await.unwrap(), 501);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_transition_is_compare_and_swap(pool: PgPool) {
    let user = insert_user(&pool, "frank").await;
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::from(10), 5, GoodsArea::Normal).await;
    let svc = service(&pool);
    let id = place(&svc, &pool, user, goods).await;

    let store = PgStore::new(pool.clone());
    let mut uow = store.begin().await.unwrap();
    let order = uow.lock_order(id).await.unwrap().unwrap();
    let paid = order.state.pay(Utc::now()).unwrap();
    assert!(uow.transition_order(id, &order.state, &paid).await.unwrap());
    assert!(!uow.transition_order(id, &order.state, &paid).await.unwrap());
    uow.set_paid_amount(id, Decimal::from(10)).await.unwrap();
    uow.commit().await.unwrap();

    let stored = store.find_order(id).await.unwrap().unwrap();
    assert_eq!(stored.state, paid);
    assert_eq!(stored.paid_amount, Decimal::from(10));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_ledger_is_idempotent_and_never_negative(pool: PgPool) {
    let user_id = insert_user(&pool, "grace").await;
    let store = PgStore::new(pool.clone());

    let mut uow = store.begin().await.unwrap();
    let user = uow.user(user_id).await.unwrap().unwrap();
    let posted = StoreLedger.credit(&mut *uow, entry(&user, 10, "SN1", LedgerOperation::ReceiptReward)).await.unwrap();
    assert_eq!(posted, Posting::Applied { balance: Decimal::from(10) });
    let again = StoreLedger.credit(&mut *uow, entry(&user, 10, "SN1", LedgerOperation::ReceiptReward)).await.unwrap();
    assert_eq!(again, Posting::AlreadyApplied);
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let err = StoreLedger.deduct(&mut *uow, entry(&user, 15, "SN2", LedgerOperation::PointsPurchase)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { balance, .. } if balance == Decimal::from(10)));
    drop(uow);

    let balance: Decimal = sqlx::query_scalar("SELECT balance FROM user_account WHERE user_id = $1 AND account = 'point'")
        .bind(user_id.0).fetch_one(&pool).await.unwrap();
    assert_eq!(balance, Decimal::from(10));
    assert_eq!(count(&pool, "user_finance").await, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_concurrent_checkouts_consume_cart_once(pool: PgPool) {
    let user = insert_user(&pool, "heidi").await;
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::from(3), 100, GoodsArea::Normal).await;
    let svc = service(&pool);

    for _ in 0..10 {
        add_to_cart(&pool, user, goods, 2).await;
        let (first, second) = tokio::join!(svc.create_order(checkout(user)), svc.create_order(checkout(user)));
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| matches!(r, Err(FulfillmentError::EmptyPurchase(_)))));
    }
    assert_eq!(count(&pool, "shop_order").await, 10);
    assert_eq!(count(&pool, "shop_cart").await, 0);
    assert_eq!(stock_of(&pool, goods).await, 80);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_reward_round_trips_and_is_credited_on_receipt(pool: PgPool) {
    set_point(&pool, "2.5").await;
    let user = insert_user(&pool, "ivan").await;
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::new(999, 2), 5, GoodsArea::Normal).await;
    let courier: i64 = sqlx::query_scalar("INSERT INTO business_user_delivery (name) VALUES ('dave') RETURNING id")
        .fetch_one(&pool).await.unwrap();
    let svc = service(&pool);

    add_to_cart(&pool, user, goods, 1).await;
    let placed = svc.create_order(checkout(user)).await.unwrap().order;
    let id = placed.order.id;
    let stored = svc.get_order(id).await.unwrap();
    assert_eq!(placed.order.gift_points, Decimal::new(25, 2));
    assert_eq!(stored.order.gift_points, placed.order.gift_points);
    assert_eq!(stored.details[0].gift_points, placed.details[0].gift_points);

    svc.confirm_payment(id, Decimal::new(999, 2)).await.unwrap();
    svc.dispatch(Dispatch { order_id: id, courier_id: Some(CourierId(courier)), scheduled_time: None }).await.unwrap();
    let received = svc.confirm_receipt(ReceiptConfirmation { order_id: id, courier_id: Some(CourierId(courier)) }).await.unwrap();
    assert_eq!(received.order.state.status, OrderStatus::Received);

    let balance: Decimal = sqlx::query_scalar("SELECT balance FROM user_account WHERE user_id = $1 AND account = 'point'")
        .bind(user.0).fetch_one(&pool).await.unwrap();
    assert_eq!(balance, placed.order.gift_points);
    let deliveries: i32 = sqlx::query_scalar("SELECT deliver_count FROM business_user_delivery WHERE id = $1")
        .bind(courier).fetch_one(&pool).await.unwrap();
    assert_eq!(deliveries, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_search_filters_and_counts(pool: PgPool) {
    let user = insert_user(&pool, "judy").await;
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::from(10), 50, GoodsArea::Normal).await;
    let address: i64 = sqlx::query_scalar(
        "INSERT INTO shop_user_address (user_id, name, mobile, sex, address, title, detail) \
         VALUES ($1, 'Zhang', '13800000000', 1, 'Pudong ', 'Block 7 ', 'Room 301') RETURNING id",
    )
    .bind(user.0).fetch_one(&pool).await.unwrap();
    let svc = service(&pool);

    let unpaid = place(&svc, &pool, user, goods).await;
    let paid = place(&svc, &pool, user, goods).await;
    let cancelled = place(&svc, &pool, user, goods).await;
    add_to_cart(&pool, user, goods, 1).await;
    let addressed = svc.create_order(CheckoutRequest { address_id: Some(AddressId(address)), ..checkout(user) })
        .await.unwrap().order.order.id;
    svc.confirm_payment(paid, Decimal::from(10)).await.unwrap();
    svc.cancel_order(cancelled, None).await.unwrap();
    sqlx::query("INSERT INTO shop_order_return (order_id, reason) VALUES ($1, 'bruised'), ($2, 'late')")
        .bind(paid.0).bind(cancelled.0).execute(&pool).await.unwrap();

    let ids = |page: fresh_shop_orders::store::OrderPage| page.orders.into_iter().map(|v| v.order.id).collect::<Vec<_>>();
    let by_status = |status| OrderSearch { status: Some(status), ..Default::default() };

    let page = svc.search_orders(&by_status(StatusFilter::Status(OrderStatus::Unpaid))).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(ids(page), vec![addressed, unpaid]);
    let page = svc.search_orders(&by_status(StatusFilter::AfterSales)).await.unwrap();
    assert_eq!(page.orders[0].returns[0].reason, "bruised");
    assert_eq!(ids(page), vec![paid]);

    let by_name = OrderSearch { shipment_name: Some("Zhang".into()), ..Default::default() };
    let page = svc.search_orders(&by_name).await.unwrap();
    assert_eq!(page.orders[0].order.shipment.name, "Mr. Zhang");
    assert_eq!(ids(page), vec![addressed]);
    let by_address = OrderSearch { shipment_address: Some("Block 7".into()), ..Default::default() };
    assert_eq!(ids(svc.search_orders(&by_address).await.unwrap()), vec![addressed]);

    let sn = svc.get_order(paid).await.unwrap().order.order_sn;
    let by_sn = OrderSearch { order_sn: Some(sn.as_str()[2..].to_string()), ..Default::default() };
    assert_eq!(ids(svc.search_orders(&by_sn).await.unwrap()), vec![paid]);

    let window = TimeRange { start: Utc::now() - Duration::hours(1), end: Utc::now() + Duration::hours(1) };
    let cancelled_now = OrderSearch { cancel_time: Some(window), ..Default::default() };
    assert_eq!(ids(svc.search_orders(&cancelled_now).await.unwrap()), vec![cancelled]);
    let past = TimeRange { start: Utc::now() - Duration::days(30), end: Utc::now() - Duration::days(29) };
    assert_eq!(svc.search_orders(&OrderSearch { created: Some(past), ..Default::default() }).await.unwrap().total, 0);

    let second_page = svc.search_orders(&OrderSearch { page: 2, page_size: 3, ..Default::default() }).await.unwrap();
    assert_eq!(second_page.total, 4);
    assert_eq!(ids(second_page), vec![unpaid]);

    let counts = svc.user_order_counts(user).await.unwrap();
    assert_eq!((counts.unpaid, counts.delivered, counts.shipped, counts.success), (2, 1, 0, 0));
    assert_eq!(stock_of(&pool, goods).await, 47);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_delete_removes_owned_rows(pool: PgPool) {
    let user = insert_user(&pool, "ken").await;
    let goods = insert_goods(&pool, Decimal::ZERO, Decimal::from(10), 5, GoodsArea::Normal).await;
    let svc = service(&pool);
    let id = place(&svc, &pool, user, goods).await;
    let kept = place(&svc, &pool, user, goods).await;
    svc.confirm_payment(id, Decimal::from(10)).await.unwrap();
    svc.dispatch(Dispatch { order_id: id, courier_id: None, scheduled_time: None }).await.unwrap();
    sqlx::query("INSERT INTO shop_order_return (order_id, reason) VALUES ($1, 'crushed')").bind(id.0).execute(&pool).await.unwrap();

    svc.delete_order(id).await.unwrap();
    assert_eq!(count(&pool, "shop_order").await, 1);
    assert_eq!(count(&pool, "shop_order_details").await, 1);
    assert_eq!(count(&pool, "shop_order_delivery").await, 0);
    assert_eq!(count(&pool, "shop_order_return").await, 0);
    assert!(svc.get_order(kept).await.is_ok());
    assert!(matches!(svc.delete_order(id).await, Err(FulfillmentError::OrderNotFound(_))));
}
