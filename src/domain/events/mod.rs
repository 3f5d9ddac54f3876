//! Domain events raised after an order transaction commits
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{CancelReason, CourierId, GoodsArea, OrderId, OrderSn, UserId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: OrderId, order_sn: OrderSn, user_id: UserId, goods_area: GoodsArea, total: Decimal },
    Paid { order_id: OrderId, order_sn: OrderSn, paid_amount: Decimal },
    Shipped { order_id: OrderId, order_sn: OrderSn, courier_id: Option<CourierId> },
    Received { order_id: OrderId, order_sn: OrderSn, gift_points: Decimal },
    Cancelled { order_id: OrderId, order_sn: OrderSn, reason: CancelReason },
    Deleted { order_id: OrderId },
}

impl OrderEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Paid { .. } => "paid",
            Self::Shipped { .. } => "shipped",
            Self::Received { .. } => "received",
            Self::Cancelled { .. } => "cancelled",
            Self::Deleted { .. } => "deleted",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            Self::Created { order_id, .. } | Self::Paid { order_id, .. } | Self::Shipped { order_id, .. }
            | Self::Received { order_id, .. } | Self::Cancelled { order_id, .. } | Self::Deleted { order_id } => *order_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OrderEvent,
}

impl EventEnvelope {
    pub fn new(event: OrderEvent) -> Self { Self { event_id: Uuid::now_v7(), occurred_at: Utc::now(), event } }
    pub fn subject(&self) -> String { format!("orders.{}", self.event.kind()) }
}
