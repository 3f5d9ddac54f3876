//! Checkout: cart or points redemption into a persisted order

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::OrderService;
use crate::config::REWARD_SETTING_KEY;
use crate::domain::aggregates::{NewOrder, Order, OrderState, OrderView, Purchase, ShipmentSnapshot};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{AddressId, GoodsArea, GoodsId, OrderSn, PaymentMethod, ShipmentType, UserId};
use crate::ledger::{Account, LedgerEntry, LedgerOperation};
use crate::payment::{PaymentParams, PaymentRequest};
use crate::pricing::RewardPolicy;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub address_id: Option<AddressId>,
    /// Set for a points redemption; the cart is then left alone.
    pub points_goods_id: Option<GoodsId>,
    pub shipment_type: ShipmentType,
    pub client_ip: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order: OrderView,
    /// Client payment parameters for a normal order. `None` for redemptions, or
    /// when the gateway could not be reached (the buyer can retry payment later).
    pub payment: Option<PaymentParams>,
}

impl OrderService {
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<PlacedOrder> {
        let user_id = request.user_id;
        let (view, open_id) = self.assemble(&request).await
            .inspect_err(|e| warn!(%user_id, step = "create_order", error = %e, "Order creation rolled back"))?;
        let order = &view.order;
        info!(order_id = %order.id, order_sn = %order.order_sn, %user_id, total = %order.total, "Order created");

        self.events.publish(OrderEvent::Created {
            order_id: order.id, order_sn: order.order_sn.clone(), user_id, goods_area: order.goods_area, total: order.total,
        }).await;
        if order.is_redemption() {
            self.events.publish(OrderEvent::Paid { order_id: order.id, order_sn: order.order_sn.clone(), paid_amount: order.paid_amount }).await;
            return Ok(PlacedOrder { order: view, payment: None });
        }

        let payment = PaymentRequest {
            order_id: order.id, order_sn: order.order_sn.clone(), amount: order.total, open_id,
            client_ip: request.client_ip, description: format!("Order {}", order.order_sn),
        };
        let payment = match self.payments.prepare(&payment).await {
            Ok(params) => Some(params),
            Err(e) => {
                warn!(order_id = %order.id, step = "prepare_payment", error = %e, "Payment parameters unavailable");
                None
            }
        };
        Ok(PlacedOrder { order: view, payment })
    }

    async fn assemble(&self, request: &CheckoutRequest) -> Result<(OrderView, String)> {
        let mut uow = self.store.begin().await?;

        let user = uow.user(request.user_id).await?.ok_or(FulfillmentError::UserNotFound(request.user_id))?;
        let shipment = match request.address_id {
            Some(id) => uow.address(id).await?.ok_or(FulfillmentError::AddressNotFound(id))?.snapshot(),
            None => ShipmentSnapshot::default(),
        };
        let purchase = match request.points_goods_id {
            Some(id) => Purchase::redemption(uow.points_goods(id).await?.ok_or(FulfillmentError::GoodsNotFound(id))?),
            None => Purchase::from_cart(uow.checked_cart_lines(user.id).await?)
                .ok_or(FulfillmentError::EmptyPurchase(user.id))?,
        };
        let pick_up_number = match request.shipment_type {
            ShipmentType::Pickup => Some(uow.next_pickup_number().await?),
            ShipmentType::Delivery => None,
        };

        self.inventory.verify(&purchase)?;
        let policy = if purchase.is_redemption() {
            RewardPolicy::Disabled
        } else {
            RewardPolicy::from_setting(uow.system_setting(REWARD_SETTING_KEY).await?)?
        };
        let priced = self.pricing.price(&purchase, policy);

        let now = Utc::now();
        let redemption = purchase.is_redemption();
        let new = NewOrder {
            order_sn: OrderSn::generate(&self.sn_prefix, now),
            user_id: user.id,
            goods_area: if redemption { GoodsArea::Points } else { GoodsArea::Normal },
            payment: if redemption { PaymentMethod::Points } else { PaymentMethod::WechatPay },
            shipment_type: request.shipment_type,
            pick_up_number,
            address_id: request.address_id,
            shipment,
            num: priced.num,
            total: priced.total,
            paid_amount: if redemption { priced.total } else { Decimal::ZERO },
            gift_points: priced.gift_points,
            state: if redemption { OrderState::paid_at(now) } else { OrderState::unpaid() },
        };
        let order_id = uow.insert_order(&new, now).await?;
        uow.insert_order_details(order_id, &priced.details).await?;
        self.inventory.reserve(&mut *uow, &purchase).await?;

        match &purchase {
            Purchase::Redemption(line) if priced.total > Decimal::ZERO => {
                let entry = LedgerEntry::new(
                    Account::Points, &user, priced.total, new.order_sn.as_str(), LedgerOperation::PointsPurchase,
                    format!("Points purchase {}", line.goods.name),
                );
                self.ledger.deduct(&mut *uow, entry).await?;
            }
            Purchase::Redemption(_) => {}
            Purchase::Cart(_) => {
                let lines = purchase.cart_lines();
                // a concurrent checkout already consumed some of these lines
                if uow.delete_cart_lines(&lines).await? != lines.len() as u64 {
                    return Err(FulfillmentError::EmptyPurchase(user.id));
                }
            }
        }

        uow.commit().await?;
        let order = Order::from_new(order_id, now, new);
        Ok((OrderView { order, details: priced.details, delivery: None, returns: Vec::new() }, user.open_id))
    }
}
