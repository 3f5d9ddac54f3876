//! Goods as seen by the order engine
//!
//! Everything except `stock` is read-only here; stock only moves through the
//! storage layer's conditional decrement.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{GoodsArea, GoodsId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goods {
    pub id: GoodsId,
    pub name: String,
    /// Discount price; zero when no discount is configured.
    pub price: Decimal,
    pub cost_price: Decimal,
    pub stock: i32,
    /// Grams per unit, zero when not tracked.
    pub weight: i32,
    pub unit: String,
    pub area: GoodsArea,
    pub images: Vec<String>,
}

impl Goods {
    pub fn cover_image(&self) -> &str { self.images.first().map(String::as_str).unwrap_or("") }

    /// Specification label snapshotted into order details, e.g. `500g/box`.
    pub fn spec_key_name(&self) -> String {
        if self.weight > 0 { format!("{}g/{}", self.weight, self.unit) } else { self.unit.clone() }
    }
}
