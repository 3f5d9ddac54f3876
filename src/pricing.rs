//! Order pricing and reward points
//!
//! The charged unit price is the discount price when one is set below the cost
//! price, otherwise the cost price. Points redemptions charge the item's cost
//! price once, in points, and never earn rewards.

use rust_decimal::{Decimal, RoundingStrategy};
use crate::config::{ConfigError, SystemSetting, REWARD_SETTING_KEY};
use crate::domain::aggregates::{OrderDetail, Purchase, PurchaseLine};

/// Decimal places stored for amounts and points.
pub const AMOUNT_SCALE: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardPolicy {
    Disabled,
    /// Percentage of the line total credited as points.
    Percent(Decimal),
}

impl RewardPolicy {
    pub fn from_setting(setting: Option<SystemSetting>) -> Result<Self, ConfigError> {
        let setting = setting.ok_or_else(|| ConfigError::MissingSetting(REWARD_SETTING_KEY.to_string()))?;
        if !setting.enabled { return Ok(Self::Disabled); }
        setting.value.trim().parse::<Decimal>()
            .map(Self::Percent)
            .map_err(|_| ConfigError::Invalid { key: REWARD_SETTING_KEY.to_string(), value: setting.value })
    }

    /// Reward for `amount`, rounded half away from zero to the stored scale.
    pub fn reward_for(&self, amount: Decimal) -> Decimal {
        match self {
            Self::Disabled => Decimal::ZERO,
            Self::Percent(p) => (amount * *p / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero),
        }
    }
}

pub fn charged_unit_price(price: Decimal, cost_price: Decimal) -> Decimal {
    if price > Decimal::ZERO && price < cost_price { price } else { cost_price }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricedOrder {
    pub details: Vec<OrderDetail>,
    pub num: i32,
    pub total: Decimal,
    pub gift_points: Decimal,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PricingEngine;

impl PricingEngine {
    pub fn price(&self, purchase: &Purchase, policy: RewardPolicy) -> PricedOrder {
        let policy = if purchase.is_redemption() { RewardPolicy::Disabled } else { policy };
        let details: Vec<OrderDetail> = purchase.lines().iter()
            .map(|line| self.detail(line, purchase.is_redemption(), policy))
            .collect();
        let total = details.iter().map(|d| d.total).sum();
        PricedOrder { num: purchase.total_quantity(), gift_points: policy.reward_for(total), total, details }
    }

    fn detail(&self, line: &PurchaseLine, redemption: bool, policy: RewardPolicy) -> OrderDetail {
        let goods = &line.goods;
        let total = if redemption {
            goods.cost_price
        } else {
            Decimal::from(line.quantity) * charged_unit_price(goods.price, goods.cost_price)
        };
        OrderDetail {
            goods_id: goods.id,
            goods_name: goods.name.clone(),
            goods_image: goods.cover_image().to_string(),
            unit: goods.unit.clone(),
            spec_key_name: goods.spec_key_name(),
            quantity: line.quantity,
            price: goods.price,
            total,
            gift_points: policy.reward_for(total),
        }
    }
}
