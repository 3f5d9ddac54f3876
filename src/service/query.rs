//! Read side and order removal

use tracing::{info, warn};

use super::OrderService;
use crate::domain::aggregates::OrderView;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{OrderId, OrderStatus, UserId};
use crate::store::{OrderPage, OrderSearch, OrderStatusCounts};
use crate::{FulfillmentError, Result};

impl OrderService {
    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderView> {
        self.store.order_view(order_id).await?.ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    pub async fn order_status(&self, order_id: OrderId) -> Result<OrderStatus> {
        self.store.order_status(order_id).await?.ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    pub async fn user_order_counts(&self, user_id: UserId) -> Result<OrderStatusCounts> {
        Ok(self.store.user_order_counts(user_id).await?)
    }

    pub async fn search_orders(&self, search: &OrderSearch) -> Result<OrderPage> {
        Ok(self.store.search_orders(search).await?)
    }

    /// Removes the order together with its detail rows and delivery record.
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        self.remove(order_id).await
            .inspect_err(|e| warn!(%order_id, step = "delete_order", error = %e, "Order deletion failed"))?;
        info!(%order_id, "Order deleted");
        self.events.publish(OrderEvent::Deleted { order_id }).await;
        Ok(())
    }

    async fn remove(&self, order_id: OrderId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        if !uow.delete_order(order_id).await? {
            return Err(FulfillmentError::OrderNotFound(order_id));
        }
        uow.commit().await?;
        Ok(())
    }
}
