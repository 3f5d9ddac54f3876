//! Points ledger gateway
//!
//! Ledger entries are written inside the caller's unit of work so that a
//! failed order step also discards the ledger change. Every entry carries a
//! reference id (the order serial); posting the same reference and operation
//! twice is a no-op.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::aggregates::User;
use crate::domain::value_objects::UserId;
use crate::store::{LedgerWrite, StoreError, UnitOfWork};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Account { Points }

impl Account {
    pub fn as_str(self) -> &'static str { match self { Self::Points => "point" } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    /// Points spent on a points-area item.
    PointsPurchase,
    /// Points granted when a normal order is received.
    ReceiptReward,
}

impl LedgerOperation {
    pub fn code(self) -> i16 { match self { Self::PointsPurchase => 1, Self::ReceiptReward => 6 } }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account: Account,
    pub user_id: UserId,
    pub username: String,
    /// Signed: negative for deductions.
    pub amount: Decimal,
    pub reference_id: String,
    pub operation: LedgerOperation,
    pub description: String,
}

impl LedgerEntry {
    pub fn new(
        account: Account,
        user: &User,
        amount: Decimal,
        reference_id: impl Into<String>,
        operation: LedgerOperation,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account, user_id: user.id, username: user.username.clone(), amount,
            reference_id: reference_id.into(), operation, description: description.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Posting { Applied { balance: Decimal }, AlreadyApplied }

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient {account:?} balance for user {user_id}: balance {balance}, change {amount}")]
    InsufficientBalance { user_id: UserId, account: Account, balance: Decimal, amount: Decimal },

    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Appends a signed entry.
    async fn post(&self, uow: &mut dyn UnitOfWork, entry: LedgerEntry) -> Result<Posting, LedgerError>;

    /// Posts `-entry.amount`; `entry.amount` is the positive quantity to remove.
    async fn deduct(&self, uow: &mut dyn UnitOfWork, entry: LedgerEntry) -> Result<Posting, LedgerError> {
        if entry.amount <= Decimal::ZERO { return Err(LedgerError::InvalidAmount(entry.amount)); }
        let entry = LedgerEntry { amount: -entry.amount, ..entry };
        self.post(uow, entry).await
    }

    async fn credit(&self, uow: &mut dyn UnitOfWork, entry: LedgerEntry) -> Result<Posting, LedgerError> {
        if entry.amount <= Decimal::ZERO { return Err(LedgerError::InvalidAmount(entry.amount)); }
        self.post(uow, entry).await
    }
}

/// Ledger kept in the shop database itself (`user_account` / `user_finance`).
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreLedger;

#[async_trait]
impl LedgerGateway for StoreLedger {
    async fn post(&self, uow: &mut dyn UnitOfWork, entry: LedgerEntry) -> Result<Posting, LedgerError> {
        match uow.post_ledger_entry(&entry).await? {
            LedgerWrite::Applied { balance } => {
                info!(user_id = %entry.user_id, reference_id = %entry.reference_id, amount = %entry.amount, %balance, "Ledger entry posted");
                Ok(Posting::Applied { balance })
            }
            LedgerWrite::Duplicate => {
                warn!(user_id = %entry.user_id, reference_id = %entry.reference_id, operation = ?entry.operation, "Ledger entry already posted, skipping");
                Ok(Posting::AlreadyApplied)
            }
            LedgerWrite::InsufficientBalance { balance } => Err(LedgerError::InsufficientBalance {
                user_id: entry.user_id, account: entry.account, balance, amount: entry.amount,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};

    fn user() -> User { User { id: UserId(1), username: "alice".into(), open_id: "o-1".into() } }

    fn entry(amount: i64, reference: &str) -> LedgerEntry {
        LedgerEntry::new(Account::Points, &user(), Decimal::from(amount), reference, LedgerOperation::ReceiptReward, "reward")
    }

    #[tokio::test]
    async fn test_credit_is_idempotent_per_reference() {
        let store = MemoryStore::default();
        let mut uow = store.begin().await.unwrap();
        assert_eq!(StoreLedger.credit(&mut *uow, entry(30, "SN1")).await.unwrap(), Posting::Applied { balance: Decimal::from(30) });
        assert_eq!(StoreLedger.credit(&mut *uow, entry(30, "SN1")).await.unwrap(), Posting::AlreadyApplied);
        uow.commit().await.unwrap();
        assert_eq!(store.snapshot().await.balance(UserId(1), Account::Points), Decimal::from(30));
    }

    #[tokio::test]
    async fn test_deduct_refuses_overdraft() {
        let store = MemoryStore::default();
        let mut uow = store.begin().await.unwrap();
        let err = StoreLedger.deduct(&mut *uow, entry(5, "SN2")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { amount, .. } if amount == Decimal::from(-5)));
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let store = MemoryStore::default();
        let mut uow = store.begin().await.unwrap();
        assert!(matches!(StoreLedger.credit(&mut *uow, entry(0, "SN3")).await, Err(LedgerError::InvalidAmount(_))));
    }
}
