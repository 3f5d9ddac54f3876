//! Order state transitions
//!
//! `ship` and `receive` run inside a unit of work owned by the delivery
//! operations; the rest open their own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{apply_transition, lock_order, OrderService};
use crate::domain::aggregates::Order;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{CancelReason, OrderId};
use crate::ledger::{Account, LedgerEntry, LedgerOperation, Posting};
use crate::payment::{PaymentParams, PaymentRequest};
use crate::store::UnitOfWork;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub order: Order,
    pub params: PaymentParams,
}

impl OrderService {
    /// Fetches payment parameters for an unpaid order. Changes nothing.
    pub async fn request_payment(&self, order_id: OrderId, client_ip: &str) -> Result<PaymentIntent> {
        self.prepare_payment(order_id, client_ip).await
            .inspect_err(|e| warn!(%order_id, step = "request_payment", error = %e, "Payment request failed"))
    }

    async fn prepare_payment(&self, order_id: OrderId, client_ip: &str) -> Result<PaymentIntent> {
        let order = self.store.find_order(order_id).await?.ok_or(FulfillmentError::OrderNotFound(order_id))?;
        order.state.pay(Utc::now()).map_err(|e| FulfillmentError::transition(order_id, e))?;
        let user = self.store.find_user(order.user_id).await?.ok_or(FulfillmentError::UserNotFound(order.user_id))?;
        let request = PaymentRequest {
            order_id, order_sn: order.order_sn.clone(), amount: order.total, open_id: user.open_id,
            client_ip: client_ip.to_string(), description: format!("Order {}", order.order_sn),
        };
        let params = self.payments.prepare(&request).await?;
        Ok(PaymentIntent { order, params })
    }

    /// Payment callback: `Unpaid -> Paid`.
    pub async fn confirm_payment(&self, order_id: OrderId, paid_amount: Decimal) -> Result<Order> {
        let order = self.pay(order_id, paid_amount).await
            .inspect_err(|e| warn!(%order_id, step = "confirm_payment", error = %e, "Payment confirmation rolled back"))?;
        info!(%order_id, order_sn = %order.order_sn, %paid_amount, "Order paid");
        self.events.publish(OrderEvent::Paid { order_id, order_sn: order.order_sn.clone(), paid_amount }).await;
        Ok(order)
    }

    async fn pay(&self, order_id: OrderId, paid_amount: Decimal) -> Result<Order> {
        if paid_amount <= Decimal::ZERO {
            return Err(FulfillmentError::InvalidPaidAmount { order_id, amount: paid_amount });
        }
        let mut uow = self.store.begin().await?;
        let order = lock_order(&mut *uow, order_id).await?;
        let next = order.state.pay(Utc::now()).map_err(|e| FulfillmentError::transition(order_id, e))?;
        let mut order = apply_transition(&mut *uow, &order, next).await?;
        uow.set_paid_amount(order_id, paid_amount).await?;
        uow.commit().await?;
        order.paid_amount = paid_amount;
        Ok(order)
    }

    /// Cancels an unpaid order and puts its goods back in stock.
    pub async fn cancel_order(&self, order_id: OrderId, reason: Option<i16>) -> Result<Order> {
        let reason = CancelReason::requested(reason);
        let order = self.cancel(order_id, reason).await
            .inspect_err(|e| warn!(%order_id, step = "cancel_order", error = %e, "Cancellation rejected"))?;
        info!(%order_id, order_sn = %order.order_sn, reason = reason.code(), "Order cancelled");
        self.events.publish(OrderEvent::Cancelled { order_id, order_sn: order.order_sn.clone(), reason }).await;
        Ok(order)
    }

    async fn cancel(&self, order_id: OrderId, reason: CancelReason) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let order = lock_order(&mut *uow, order_id).await?;
        let next = order.state.cancel(reason, Utc::now()).map_err(|e| FulfillmentError::transition(order_id, e))?;
        let order = apply_transition(&mut *uow, &order, next).await?;
        let details = uow.order_details(order_id).await?;
        self.inventory.release(&mut *uow, &details).await?;
        uow.commit().await?;
        Ok(order)
    }

    pub(super) async fn ship(&self, uow: &mut dyn UnitOfWork, order_id: OrderId, at: DateTime<Utc>) -> Result<Order> {
        let order = lock_order(uow, order_id).await?;
        let next = order.state.ship(at).map_err(|e| FulfillmentError::transition(order_id, e))?;
        apply_transition(uow, &order, next).await
    }

    /// Marks the order received and credits its reward points in the same unit of work.
    pub(super) async fn receive(&self, uow: &mut dyn UnitOfWork, order_id: OrderId, at: DateTime<Utc>) -> Result<Order> {
        let order = lock_order(uow, order_id).await?;
        let next = order.state.receive(at).map_err(|e| FulfillmentError::transition(order_id, e))?;
        let order = apply_transition(uow, &order, next).await?;
        if order.is_redemption() || order.gift_points <= Decimal::ZERO {
            return Ok(order);
        }

        let user = uow.user(order.user_id).await?.ok_or(FulfillmentError::UserNotFound(order.user_id))?;
        let entry = LedgerEntry::new(
            Account::Points, &user, order.gift_points, order.order_sn.as_str(), LedgerOperation::ReceiptReward,
            format!("Reward for order {}", order.order_sn),
        );
        if let Posting::AlreadyApplied = self.ledger.credit(uow, entry).await? {
            warn!(%order_id, "Receipt reward was already credited");
        }
        Ok(order)
    }
}
