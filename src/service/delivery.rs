//! Courier hand-off and receipt
//!
//! These operations keep the delivery record and courier counters; the status
//! changes themselves go through the lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::OrderService;
use crate::domain::aggregates::{Order, OrderDelivery};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{CourierId, OrderId};
use crate::store::{DeliveryLookup, UnitOfWork};
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub order_id: OrderId,
    pub courier_id: Option<CourierId>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptConfirmation {
    pub order_id: OrderId,
    /// Courier who completed the drop-off, if not already bound at dispatch.
    pub courier_id: Option<CourierId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderWithDelivery {
    pub order: Order,
    pub delivery: OrderDelivery,
}

impl OrderService {
    /// `Paid -> Shipped`, creating the delivery record and binding the courier.
    pub async fn dispatch(&self, dispatch: Dispatch) -> Result<OrderWithDelivery> {
        let order_id = dispatch.order_id;
        let shipped = self.ship_with_delivery(&dispatch).await
            .inspect_err(|e| warn!(%order_id, step = "dispatch", error = %e, "Dispatch rolled back"))?;
        let courier_id = shipped.delivery.courier_id;
        info!(%order_id, order_sn = %shipped.order.order_sn, courier_id = ?courier_id, "Order shipped");
        self.events.publish(OrderEvent::Shipped { order_id, order_sn: shipped.order.order_sn.clone(), courier_id }).await;
        Ok(shipped)
    }

    async fn ship_with_delivery(&self, dispatch: &Dispatch) -> Result<OrderWithDelivery> {
        let now = Utc::now();
        let mut uow = self.store.begin().await?;
        let order = self.ship(&mut *uow, dispatch.order_id, now).await?;
        let mut delivery = delivery_record(&mut *uow, dispatch.order_id, now).await?;
        bind_courier(&mut *uow, &mut delivery, dispatch.courier_id).await?;
        if dispatch.scheduled_time.is_some() {
            delivery.scheduled_time = dispatch.scheduled_time;
        }
        uow.update_delivery(&delivery).await?;
        uow.commit().await?;
        Ok(OrderWithDelivery { order, delivery })
    }

    /// `Shipped -> Received`, stamping the receipt time and crediting reward points.
    pub async fn confirm_receipt(&self, confirmation: ReceiptConfirmation) -> Result<OrderWithDelivery> {
        let order_id = confirmation.order_id;
        let received = self.receive_with_delivery(&confirmation).await
            .inspect_err(|e| warn!(%order_id, step = "confirm_receipt", error = %e, "Receipt confirmation rolled back"))?;
        let order = &received.order;
        info!(%order_id, order_sn = %order.order_sn, gift_points = %order.gift_points, "Order received");
        self.events.publish(OrderEvent::Received { order_id, order_sn: order.order_sn.clone(), gift_points: order.gift_points }).await;
        Ok(received)
    }

    async fn receive_with_delivery(&self, confirmation: &ReceiptConfirmation) -> Result<OrderWithDelivery> {
        let now = Utc::now();
        let mut uow = self.store.begin().await?;
        let order = self.receive(&mut *uow, confirmation.order_id, now).await?;
        let mut delivery = delivery_record(&mut *uow, confirmation.order_id, now).await?;
        bind_courier(&mut *uow, &mut delivery, confirmation.courier_id).await?;
        delivery.receipt_time = Some(now);
        uow.update_delivery(&delivery).await?;
        uow.commit().await?;
        Ok(OrderWithDelivery { order, delivery })
    }

    pub async fn find_delivery(&self, lookup: DeliveryLookup) -> Result<OrderDelivery> {
        self.store.find_delivery(lookup).await?.ok_or(FulfillmentError::DeliveryNotFound(lookup))
    }
}

async fn delivery_record(uow: &mut dyn UnitOfWork, order_id: OrderId, now: DateTime<Utc>) -> Result<OrderDelivery> {
    match uow.delivery_for_order(order_id).await? {
        Some(delivery) => Ok(delivery),
        None => Ok(uow.insert_delivery(order_id, None, None, now).await?),
    }
}

/// Counts a courier once per binding; re-sending the same courier is a no-op.
async fn bind_courier(uow: &mut dyn UnitOfWork, delivery: &mut OrderDelivery, courier_id: Option<CourierId>) -> Result<()> {
    let Some(courier_id) = courier_id else { return Ok(()) };
    if delivery.courier_id == Some(courier_id) {
        return Ok(());
    }
    uow.courier(courier_id).await?.ok_or(FulfillmentError::CourierNotFound(courier_id))?;
    uow.increment_courier_count(courier_id).await?;
    delivery.courier_id = Some(courier_id);
    Ok(())
}
