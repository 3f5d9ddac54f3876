//! Value Objects for order fulfillment

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    )*};
}

id_type!(
    UserId,
    AddressId,
    GoodsId,
    CartLineId,
    OrderId,
    /// Delivery personnel roster entry.
    CourierId,
    DeliveryId,
);

/// Human-readable order serial: prefix, creation instant to the millisecond, six random digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderSn(String);

impl OrderSn {
    pub fn generate(prefix: &str, now: DateTime<Utc>) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self(format!("{prefix}{}{suffix:06}", now.format("%Y%m%d%H%M%S%3f")))
    }
    pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderSn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// A stored code that does not map onto any known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCode { pub kind: &'static str, pub code: i16 }
impl std::error::Error for UnknownCode {}
impl fmt::Display for UnknownCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown {} code {}", self.kind, self.code) }
}

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name { $($variant),+ }

        impl $name {
            pub fn code(self) -> i16 { match self { $(Self::$variant => $code),+ } }
        }

        impl TryFrom<i16> for $name {
            type Error = UnknownCode;
            fn try_from(code: i16) -> Result<Self, Self::Error> {
                match code { $($code => Ok(Self::$variant),)+ _ => Err(UnknownCode { kind: $kind, code }) }
            }
        }
    };
}

coded_enum!(
    /// Catalog partition: currency goods or points-redeemable goods.
    GoodsArea, "goods area" { Normal = 0, Points = 1 }
);

coded_enum!(PaymentMethod, "payment method" { WechatPay = 2, Points = 4 });

coded_enum!(ShipmentType, "shipment type" { Delivery = 0, Pickup = 1 });

coded_enum!(
    /// Happy-path progress. Only ever moves forward.
    OrderStatus, "order status" { Unpaid = 0, Paid = 1, Shipped = 2, Received = 3 }
);

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self { Self::Unpaid => "unpaid", Self::Paid => "paid", Self::Shipped => "shipped", Self::Received => "received" };
        f.write_str(name)
    }
}

/// Why an order was cancelled. Stored as `status_cancel`, where 0 means not cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserInitiated,
    Code(i16),
}

impl CancelReason {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            c if c <= 0 => None,
            1 => Some(Self::UserInitiated),
            c => Some(Self::Code(c)),
        }
    }

    /// Requested codes above 1 are kept as given; anything else is a user cancellation.
    pub fn requested(code: Option<i16>) -> Self {
        match code { Some(c) if c > 1 => Self::Code(c), _ => Self::UserInitiated }
    }

    pub fn code(self) -> i16 { match self { Self::UserInitiated => 1, Self::Code(c) => c } }
}

/// Refund progress marker. Stored as `status_refund`, where 0 means no refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundMark(i16);

impl RefundMark {
    pub fn from_code(code: i16) -> Option<Self> { (code > 0).then_some(Self(code)) }
    pub fn code(self) -> i16 { self.0 }
}

/// Salutation derived from the address book sex marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Salutation { Mr, Ms }

impl Salutation {
    pub fn from_sex_marker(sex: Option<i16>) -> Self { if sex == Some(1) { Self::Mr } else { Self::Ms } }
    pub fn address(self, name: &str) -> String {
        let title = match self { Self::Mr => "Mr.", Self::Ms => "Ms." };
        if name.trim().is_empty() { title.to_string() } else { format!("{title} {}", name.trim()) }
    }
}

/// Closed interval used by the order search filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange { pub start: DateTime<Utc>, pub end: DateTime<Utc> }

impl TimeRange {
    /// Both ends must be present for the range to apply.
    pub fn from_bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<Self> {
        Some(Self { start: start?, end: end? })
    }
    pub fn contains(&self, at: DateTime<Utc>) -> bool { self.start <= at && at <= self.end }
    pub fn contains_opt(&self, at: Option<DateTime<Utc>>) -> bool { at.is_some_and(|t| self.contains(t)) }
}
