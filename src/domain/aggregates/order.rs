//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{
    AddressId, CancelReason, CourierId, DeliveryId, GoodsArea, GoodsId, OrderId, OrderSn, OrderStatus,
    PaymentMethod, RefundMark, ShipmentType, UserId,
};

/// Recipient data copied from the address book when the order is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentSnapshot { pub name: String, pub mobile: String, pub address: String }

/// Order header as it is about to be inserted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_sn: OrderSn,
    pub user_id: UserId,
    pub goods_area: GoodsArea,
    pub payment: PaymentMethod,
    pub shipment_type: ShipmentType,
    pub pick_up_number: Option<i32>,
    pub address_id: Option<AddressId>,
    pub shipment: ShipmentSnapshot,
    pub num: i32,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub gift_points: Decimal,
    pub state: OrderState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_sn: OrderSn,
    pub user_id: UserId,
    pub goods_area: GoodsArea,
    pub payment: PaymentMethod,
    pub shipment_type: ShipmentType,
    pub pick_up_number: Option<i32>,
    pub address_id: Option<AddressId>,
    pub shipment: ShipmentSnapshot,
    pub num: i32,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub gift_points: Decimal,
    #[serde(flatten)]
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn from_new(id: OrderId, created_at: DateTime<Utc>, o: NewOrder) -> Self {
        Self {
            id, order_sn: o.order_sn, user_id: o.user_id, goods_area: o.goods_area, payment: o.payment,
            shipment_type: o.shipment_type, pick_up_number: o.pick_up_number, address_id: o.address_id,
            shipment: o.shipment, num: o.num, total: o.total, paid_amount: o.paid_amount,
            gift_points: o.gift_points, state: o.state, created_at,
        }
    }

    pub fn is_redemption(&self) -> bool { self.goods_area == GoodsArea::Points }
}

/// Immutable snapshot of one purchased line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub goods_id: GoodsId,
    pub goods_name: String,
    pub goods_image: String,
    pub unit: String,
    pub spec_key_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
    pub gift_points: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivery {
    pub id: DeliveryId,
    pub order_id: OrderId,
    pub courier_id: Option<CourierId>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub receipt_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// After-sales request, read-only for the order engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReturn {
    pub id: i64,
    pub order_id: OrderId,
    pub status: i16,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Order with everything it owns, as returned by lookups and searches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub details: Vec<OrderDetail>,
    pub delivery: Option<OrderDelivery>,
    pub returns: Vec<OrderReturn>,
}

/// Status plus the terminal side flags and their timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    pub cancel: Option<CancelReason>,
    pub refund: Option<RefundMark>,
    pub pay_time: Option<DateTime<Utc>>,
    pub shipment_time: Option<DateTime<Utc>>,
    pub receive_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
}

impl OrderState {
    pub fn unpaid() -> Self {
        Self { status: OrderStatus::Unpaid, cancel: None, refund: None, pay_time: None, shipment_time: None, receive_time: None, cancel_time: None }
    }

    pub fn paid_at(at: DateTime<Utc>) -> Self { Self { status: OrderStatus::Paid, pay_time: Some(at), ..Self::unpaid() } }

    /// Neither cancelled nor refunded.
    pub fn is_open(&self) -> bool { self.cancel.is_none() && self.refund.is_none() }

    pub fn pay(&self, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        if self.status == OrderStatus::Paid { return Err(TransitionError::AlreadyPaid); }
        self.expect(OrderStatus::Unpaid, "pay")?;
        Ok(Self { status: OrderStatus::Paid, pay_time: Some(at), ..self.clone() })
    }

    pub fn cancel(&self, reason: CancelReason, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        if self.status >= OrderStatus::Shipped { return Err(TransitionError::CancelNotAllowed(self.status)); }
        if !self.is_open() { return Err(self.invalid("cancel")); }
        if self.status == OrderStatus::Paid { return Err(TransitionError::RefundPolicyUndefined); }
        Ok(Self { cancel: Some(reason), cancel_time: Some(at), ..self.clone() })
    }

    pub fn ship(&self, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.expect(OrderStatus::Paid, "ship")?;
        Ok(Self { status: OrderStatus::Shipped, shipment_time: Some(at), ..self.clone() })
    }

    pub fn receive(&self, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.expect(OrderStatus::Shipped, "receive")?;
        Ok(Self { status: OrderStatus::Received, receive_time: Some(at), ..self.clone() })
    }

    fn expect(&self, status: OrderStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status == status && self.is_open() { Ok(()) } else { Err(self.invalid(action)) }
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::InvalidState { action, status: self.status, cancelled: self.cancel.is_some(), refunded: self.refund.is_some() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    AlreadyPaid,
    CancelNotAllowed(OrderStatus),
    /// Cancelling a paid order needs a refund, and no refund policy exists yet.
    RefundPolicyUndefined,
    InvalidState { action: &'static str, status: OrderStatus, cancelled: bool, refunded: bool },
}

impl std::error::Error for TransitionError {}
impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyPaid => write!(f, "order is already paid"),
            Self::CancelNotAllowed(status) => write!(f, "order cannot be cancelled once {status}"),
            Self::RefundPolicyUndefined => write!(f, "cancelling a paid order requires a refund, which is not supported"),
            Self::InvalidState { action, status, cancelled, refunded } => {
                write!(f, "cannot {action} order in status {status} (cancelled: {cancelled}, refunded: {refunded})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> { Utc::now() }

    #[test]
    fn test_happy_path() {
        let t = now();
        let paid = OrderState::unpaid().pay(t).unwrap();
        assert_eq!(paid.pay_time, Some(t));
        let shipped = paid.ship(t).unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        let received = shipped.receive(t).unwrap();
        assert_eq!(received.status, OrderStatus::Received);
        assert_eq!(received.receive_time, Some(t));
    }

    #[test]
    fn test_pay_twice_is_already_paid() {
        let paid = OrderState::paid_at(now());
        assert_eq!(paid.pay(now()), Err(TransitionError::AlreadyPaid));
        assert!(matches!(paid.ship(now()).unwrap().pay(now()), Err(TransitionError::InvalidState { action: "pay", .. })));
    }

    #[test]
    fn test_cancel_rules() {
        let cancelled = OrderState::unpaid().cancel(CancelReason::UserInitiated, now()).unwrap();
        assert_eq!(cancelled.cancel, Some(CancelReason::UserInitiated));
        assert!(cancelled.cancel_time.is_some());
        assert!(matches!(cancelled.cancel(CancelReason::UserInitiated, now()), Err(TransitionError::InvalidState { .. })));
        assert!(matches!(cancelled.pay(now()), Err(TransitionError::InvalidState { cancelled: true, .. })));

        let paid = OrderState::paid_at(now());
        assert_eq!(paid.cancel(CancelReason::UserInitiated, now()), Err(TransitionError::RefundPolicyUndefined));
        let shipped = paid.ship(now()).unwrap();
        assert_eq!(shipped.cancel(CancelReason::UserInitiated, now()), Err(TransitionError::CancelNotAllowed(OrderStatus::Shipped)));
        let received = shipped.receive(now()).unwrap();
        assert_eq!(received.cancel(CancelReason::Code(4), now()), Err(TransitionError::CancelNotAllowed(OrderStatus::Received)));
    }

    #[test]
    fn test_refund_flag_blocks_shipping() {
        let mut paid = OrderState::paid_at(now());
        paid.refund = RefundMark::from_code(1);
        assert!(matches!(paid.ship(now()), Err(TransitionError::InvalidState { refunded: true, .. })));
    }

    #[test]
    fn test_receive_requires_shipment() {
        assert!(matches!(OrderState::paid_at(now()).receive(now()), Err(TransitionError::InvalidState { action: "receive", .. })));
    }
}
