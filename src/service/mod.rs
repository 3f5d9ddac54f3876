//! Order fulfillment services
//!
//! Every mutating operation opens one unit of work, re-reads the order inside
//! it, and commits once at the end. Any `?` before the commit drops the unit of
//! work and with it every write made so far. Events are published only after
//! the commit.

use std::sync::Arc;

use crate::domain::aggregates::{Order, OrderState};
use crate::domain::value_objects::OrderId;
use crate::inventory::InventoryGuard;
use crate::ledger::LedgerGateway;
use crate::payment::PaymentGateway;
use crate::pricing::PricingEngine;
use crate::publisher::EventPublisher;
use crate::store::{Store, UnitOfWork};
use crate::{FulfillmentError, Result};

mod assembler;
mod delivery;
mod lifecycle;
mod query;

pub use assembler::{CheckoutRequest, PlacedOrder};
pub use delivery::{Dispatch, OrderWithDelivery, ReceiptConfirmation};
pub use lifecycle::PaymentIntent;

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerGateway>,
    payments: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    pricing: PricingEngine,
    inventory: InventoryGuard,
    sn_prefix: String,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerGateway>,
        payments: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        sn_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store, ledger, payments, events,
            pricing: PricingEngine, inventory: InventoryGuard, sn_prefix: sn_prefix.into(),
        }
    }
}

async fn lock_order(uow: &mut dyn UnitOfWork, id: OrderId) -> Result<Order> {
    uow.lock_order(id).await?.ok_or(FulfillmentError::OrderNotFound(id))
}

/// Writes `next` only if the stored state is still the one `order` was read with.
async fn apply_transition(uow: &mut dyn UnitOfWork, order: &Order, next: OrderState) -> Result<Order> {
    if !uow.transition_order(order.id, &order.state, &next).await? {
        return Err(FulfillmentError::lost_race(order.id));
    }
    Ok(Order { state: next, ..order.clone() })
}
