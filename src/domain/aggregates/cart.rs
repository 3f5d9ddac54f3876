//! Cart lines and the purchase they resolve into

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::goods::Goods;
use crate::domain::value_objects::{CartLineId, GoodsId, UserId};

/// A cart row joined with its goods record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub spec_item_id: i64,
    pub quantity: i32,
    pub checked: bool,
    pub goods: Goods,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseLine {
    /// Cart row consumed by this line; `None` for points redemptions.
    pub cart_line: Option<CartLineId>,
    pub goods: Goods,
    pub quantity: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Purchase {
    Cart(Vec<PurchaseLine>),
    /// Single points-area item, quantity fixed at one.
    Redemption(PurchaseLine),
}

impl Purchase {
    pub fn from_cart(lines: Vec<CartLine>) -> Option<Self> {
        let lines: Vec<_> = lines.into_iter()
            .filter(|l| l.checked)
            .map(|l| PurchaseLine { cart_line: Some(l.id), goods: l.goods, quantity: l.quantity })
            .collect();
        if lines.is_empty() { None } else { Some(Self::Cart(lines)) }
    }

    pub fn redemption(goods: Goods) -> Self { Self::Redemption(PurchaseLine { cart_line: None, goods, quantity: 1 }) }

    pub fn is_redemption(&self) -> bool { matches!(self, Self::Redemption(_)) }

    pub fn lines(&self) -> &[PurchaseLine] {
        match self { Self::Cart(lines) => lines, Self::Redemption(line) => std::slice::from_ref(line) }
    }

    pub fn cart_lines(&self) -> Vec<CartLineId> { self.lines().iter().filter_map(|l| l.cart_line).collect() }

    pub fn total_quantity(&self) -> i32 { self.lines().iter().map(|l| l.quantity).sum() }

    /// Requested quantity per goods item, with the stock seen when the lines were read.
    pub fn demand(&self) -> BTreeMap<GoodsId, (i32, i32)> {
        let mut demand = BTreeMap::new();
        for line in self.lines() {
            let entry = demand.entry(line.goods.id).or_insert((0, line.goods.stock));
            entry.0 += line.quantity;
        }
        demand
    }
}
