//! Aggregates module
pub mod goods;
pub mod order;
pub mod cart;
pub mod directory;

pub use goods::Goods;
pub use order::{NewOrder, Order, OrderDelivery, OrderDetail, OrderReturn, OrderState, OrderView, ShipmentSnapshot, TransitionError};
pub use cart::{CartLine, Purchase, PurchaseLine};
pub use directory::{Address, Courier, User};
