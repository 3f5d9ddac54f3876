//! Read-only records from the user directory, address book and courier roster

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::order::ShipmentSnapshot;
use crate::domain::value_objects::{AddressId, CourierId, Salutation, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User { pub id: UserId, pub username: String, pub open_id: String }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub name: String,
    pub mobile: String,
    /// 1 for male, anything else is addressed as female.
    pub sex: Option<i16>,
    pub address: String,
    pub title: String,
    pub detail: String,
}

impl Address {
    pub fn snapshot(&self) -> ShipmentSnapshot {
        ShipmentSnapshot {
            name: Salutation::from_sex_marker(self.sex).address(&self.name),
            mobile: self.mobile.clone(),
            address: format!("{}{}{}", self.address, self.title, self.detail),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Courier { pub id: CourierId, pub name: String, pub mobile: String, pub deliver_count: i32 }
