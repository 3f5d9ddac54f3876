#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use fresh_shop_orders::domain::aggregates::Goods;
use fresh_shop_orders::domain::value_objects::{GoodsArea, GoodsId, ShipmentType, UserId};
use fresh_shop_orders::ledger::{LedgerEntry, LedgerError, LedgerGateway, Posting, StoreLedger};
use fresh_shop_orders::payment::{PaymentGateway, PaymentGatewayError, PaymentParams, PaymentRequest};
use fresh_shop_orders::domain::events::OrderEvent;
use fresh_shop_orders::publisher::EventPublisher;
use fresh_shop_orders::service::CheckoutRequest;
use fresh_shop_orders::store::{MemoryStore, UnitOfWork};
use fresh_shop_orders::OrderService;

pub const APPLE: GoodsId = GoodsId(1);
pub const BREAD: GoodsId = GoodsId(2);
pub const TEAPOT: GoodsId = GoodsId(3);

pub fn goods(id: GoodsId, price: i64, cost_price: i64, stock: i32) -> Goods {
    Goods {
        id, name: format!("goods-{id}"), price: Decimal::from(price), cost_price: Decimal::from(cost_price), stock,
        weight: 0, unit: "piece".into(), area: GoodsArea::Normal, images: vec![format!("/img/{id}.jpg")],
    }
}

pub fn points_goods(id: GoodsId, cost_price: i64, stock: i32) -> Goods {
    Goods { area: GoodsArea::Points, ..goods(id, 0, cost_price, stock) }
}

/// Keeps every published event in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingPublisher { events: Arc<Mutex<Vec<OrderEvent>>> }

impl RecordingPublisher {
    pub fn events(&self) -> Vec<OrderEvent> { self.events.lock().unwrap().clone() }

    pub fn kinds(&self) -> Vec<&'static str> { self.events().iter().map(OrderEvent::kind).collect() }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: OrderEvent) { self.events.lock().unwrap().push(event); }
}

/// Echoes the order serial back as the prepay id.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoGateway;

#[async_trait]
impl PaymentGateway for EchoGateway {
    async fn prepare(&self, request: &PaymentRequest) -> Result<PaymentParams, PaymentGatewayError> {
        Ok(PaymentParams(serde_json::json!({
            "package": format!("prepay_id={}", request.order_sn),
            "client_ip": request.client_ip,
        })))
    }
}

/// Accepts deductions but fails every credit.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreditFailingLedger;

#[async_trait]
impl LedgerGateway for CreditFailingLedger {
    async fn post(&self, uow: &mut dyn UnitOfWork, entry: LedgerEntry) -> Result<Posting, LedgerError> {
        if entry.amount > Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }
        StoreLedger.post(uow, entry).await
    }
}

pub struct Shop {
    pub store: MemoryStore,
    pub service: OrderService,
    pub events: RecordingPublisher,
    pub user: UserId,
}

impl Shop {
    pub async fn new() -> Self { Self::with_ledger(Arc::new(StoreLedger)).await }

    pub async fn with_ledger(ledger: Arc<dyn LedgerGateway>) -> Self {
        let store = MemoryStore::default();
        let user = store.seed(|t| {
            t.set_setting("point", "5", true);
            t.insert_user("alice")
        }).await;
        let events = RecordingPublisher::default();
        let service = OrderService::new(
            Arc::new(store.clone()), ledger, Arc::new(EchoGateway), Arc::new(events.clone()), "SN",
        );
        Self { store, service, events, user }
    }

    /// Goods A (price 9 < cost 10, stock 5) x2 and goods B (no discount, cost 20) x1, both checked.
    pub async fn with_standard_cart(bread_stock: i32) -> Self {
        let shop = Self::new().await;
        let user = shop.user;
        shop.store.seed(|t| {
            t.insert_goods(goods(APPLE, 9, 10, 5));
            t.insert_goods(goods(BREAD, 0, 20, bread_stock));
            t.insert_cart_line(user, APPLE, 2, true);
            t.insert_cart_line(user, BREAD, 1, true);
        }).await;
        shop
    }

    pub fn checkout(&self) -> CheckoutRequest {
        CheckoutRequest {
            user_id: self.user, address_id: None, points_goods_id: None,
            shipment_type: ShipmentType::Delivery, client_ip: "10.1.1.1".into(),
        }
    }

    pub fn pickup(&self) -> CheckoutRequest { CheckoutRequest { shipment_type: ShipmentType::Pickup, ..self.checkout() } }

    pub fn redeem(&self, goods_id: GoodsId) -> CheckoutRequest {
        CheckoutRequest { points_goods_id: Some(goods_id), ..self.checkout() }
    }

    pub async fn refill_cart(&self, goods_id: GoodsId, quantity: i32) {
        let user = self.user;
        self.store.seed(|t| { t.insert_cart_line(user, goods_id, quantity, true); }).await;
    }
}
