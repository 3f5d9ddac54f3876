//! Fresh-shop order fulfillment engine
//!
//! Turns a checked-out cart (or a points redemption) into a persisted order and
//! drives it through payment, dispatch and receipt.
//!
//! ## Features
//! - Cart and points-redemption checkout with stock reservation
//! - Discount/cost-price pricing and reward points
//! - Order lifecycle: pay, ship, receive, cancel
//! - Courier binding and delivery records
//! - Idempotent points ledger
//! - Order search and per-user status counts

use rust_decimal::Decimal;
use thiserror::Error;

pub mod config;
pub mod domain;
pub mod http;
pub mod inventory;
pub mod ledger;
pub mod payment;
pub mod pricing;
pub mod publisher;
pub mod service;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use ledger::{LedgerError, LedgerGateway, StoreLedger};
pub use payment::{PaymentGateway, PaymentGatewayError};
pub use publisher::EventPublisher;
pub use service::OrderService;
pub use store::{MemoryStore, PgStore, Store, StoreError};

use domain::aggregates::TransitionError;
use domain::value_objects::{AddressId, CourierId, GoodsId, OrderId, OrderStatus, UserId};
use store::DeliveryLookup;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("address {0} not found")]
    AddressNotFound(AddressId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("points goods {0} not found")]
    GoodsNotFound(GoodsId),

    #[error("courier {0} not found")]
    CourierNotFound(CourierId),

    #[error("delivery record not found ({0:?})")]
    DeliveryNotFound(DeliveryLookup),

    #[error("insufficient stock for goods {goods_id} (requested {requested})")]
    InsufficientStock { goods_id: GoodsId, requested: i32 },

    #[error("user {0} has no checked cart lines")]
    EmptyPurchase(UserId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("order {order_id}: {reason}")]
    InvalidState { order_id: OrderId, reason: String },

    #[error("order {order_id}: paid amount {amount} must be positive")]
    InvalidPaidAmount { order_id: OrderId, amount: Decimal },

    #[error("order {0} is already paid")]
    AlreadyPaid(OrderId),

    #[error("order {order_id} cannot be cancelled once {status}")]
    CancelNotAllowed { order_id: OrderId, status: OrderStatus },

    #[error("order {0} is paid; cancelling it requires a refund, which is not supported")]
    RefundPolicyUndefined(OrderId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    PaymentGateway(#[from] PaymentGatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    pub fn transition(order_id: OrderId, err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyPaid => Self::AlreadyPaid(order_id),
            TransitionError::CancelNotAllowed(status) => Self::CancelNotAllowed { order_id, status },
            TransitionError::RefundPolicyUndefined => Self::RefundPolicyUndefined(order_id),
            err @ TransitionError::InvalidState { .. } => Self::InvalidState { order_id, reason: err.to_string() },
        }
    }

    /// The order row changed between the locked read and the write.
    pub fn lost_race(order_id: OrderId) -> Self {
        Self::InvalidState { order_id, reason: "order state changed concurrently".into() }
    }

    /// Text safe to show to the shopper or operator.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "User does not exist",
            Self::AddressNotFound(_) => "Shipping address does not exist",
            Self::OrderNotFound(_) => "Order does not exist",
            Self::GoodsNotFound(_) => "Goods are not available for points redemption",
            Self::CourierNotFound(_) => "Delivery person does not exist",
            Self::DeliveryNotFound(_) => "Delivery record does not exist",
            Self::InsufficientStock { .. } => "Insufficient stock",
            Self::EmptyPurchase(_) => "No goods selected",
            Self::Config(_) => "Points configuration is invalid",
            Self::InvalidState { .. } => "Order status does not allow this operation",
            Self::InvalidPaidAmount { .. } => "Paid amount must be positive",
            Self::AlreadyPaid(_) => "Order is already paid",
            Self::CancelNotAllowed { .. } => "Order can no longer be cancelled",
            Self::RefundPolicyUndefined(_) => "Paid orders cannot be cancelled yet",
            Self::Ledger(LedgerError::InsufficientBalance { .. }) => "Insufficient points",
            Self::Ledger(_) => "Points ledger operation failed",
            Self::PaymentGateway(_) => "Payment could not be initiated",
            Self::Store(_) => "Operation failed, please try again",
        }
    }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;
