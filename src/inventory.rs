//! Stock checks and reservations
//!
//! `verify` compares the purchase against the stock read with the cart, before
//! anything is written. `reserve` then applies one conditional decrement per
//! goods item; if another order took the stock in between, the decrement does
//! not apply and the whole unit of work is abandoned.

use tracing::warn;

use crate::domain::aggregates::{OrderDetail, Purchase};
use crate::domain::value_objects::GoodsId;
use crate::store::{StoreError, UnitOfWork};
use crate::FulfillmentError;

#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryGuard;

impl InventoryGuard {
    pub fn verify(&self, purchase: &Purchase) -> Result<(), FulfillmentError> {
        for (goods_id, (requested, available)) in purchase.demand() {
            if requested > available {
                warn!(%goods_id, requested, available, "Insufficient stock");
                return Err(FulfillmentError::InsufficientStock { goods_id, requested });
            }
        }
        Ok(())
    }

    pub async fn reserve(&self, uow: &mut dyn UnitOfWork, purchase: &Purchase) -> Result<(), FulfillmentError> {
        for (goods_id, (requested, _)) in purchase.demand() {
            if !uow.decrement_stock(goods_id, requested).await? {
                warn!(%goods_id, requested, "Stock taken by a concurrent order");
                return Err(FulfillmentError::InsufficientStock { goods_id, requested });
            }
        }
        Ok(())
    }

    /// Puts the quantities of a cancelled order back on the shelf.
    pub async fn release(&self, uow: &mut dyn UnitOfWork, details: &[OrderDetail]) -> Result<(), StoreError> {
        let mut released: Vec<(GoodsId, i32)> = Vec::new();
        for detail in details {
            match released.iter_mut().find(|(id, _)| *id == detail.goods_id) {
                Some((_, quantity)) => *quantity += detail.quantity,
                None => released.push((detail.goods_id, detail.quantity)),
            }
        }
        for (goods_id, quantity) in released {
            uow.restock(goods_id, quantity).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use crate::domain::aggregates::{CartLine, Goods};
    use crate::domain::value_objects::{CartLineId, GoodsArea, UserId};
    use crate::store::{MemoryStore, Store};

    fn goods(id: i64, stock: i32) -> Goods {
        Goods {
            id: GoodsId(id), name: "apple".into(), price: Decimal::ZERO, cost_price: Decimal::TEN, stock,
            weight: 500, unit: "bag".into(), area: GoodsArea::Normal, images: vec![],
        }
    }

    fn purchase(lines: &[(Goods, i32)]) -> Purchase {
        Purchase::from_cart(lines.iter().enumerate().map(|(i, (g, q))| CartLine {
            id: CartLineId(i as i64 + 1), user_id: UserId(1), spec_item_id: i as i64, quantity: *q, checked: true, goods: g.clone(),
        }).collect()).unwrap()
    }

    #[test]
    fn test_verify_names_the_short_goods() {
        let err = InventoryGuard.verify(&purchase(&[(goods(1, 5), 2), (goods(2, 0), 1)])).unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { goods_id: GoodsId(2), requested: 1 }));
        assert!(InventoryGuard.verify(&purchase(&[(goods(1, 5), 5)])).is_ok());
    }

    #[test]
    fn test_verify_sums_lines_of_the_same_goods() {
        let err = InventoryGuard.verify(&purchase(&[(goods(1, 3), 2), (goods(1, 3), 2)])).unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { requested: 4, .. }));
    }

    #[tokio::test]
    async fn test_reserve_fails_when_stock_moved_underneath() {
        let store = MemoryStore::default();
        store.seed(|t| t.insert_goods(goods(1, 1))).await;
        // the purchase still believes three units are on the shelf
        let stale = purchase(&[(goods(1, 3), 2)]);
        let mut uow = store.begin().await.unwrap();
        let err = InventoryGuard.reserve(&mut *uow, &stale).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { goods_id: GoodsId(1), requested: 2 }));
    }

    #[tokio::test]
    async fn test_release_restocks() {
        let store = MemoryStore::default();
        store.seed(|t| t.insert_goods(goods(1, 1))).await;
        let mut uow = store.begin().await.unwrap();
        let detail = |quantity| OrderDetail {
            goods_id: GoodsId(1), goods_name: "apple".into(), goods_image: String::new(), unit: "bag".into(),
            spec_key_name: "500g/bag".into(), quantity, price: Decimal::ZERO, total: Decimal::ZERO, gift_points: Decimal::ZERO,
        };
        InventoryGuard.release(&mut *uow, &[detail(2), detail(3)]).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.snapshot().await.stock(GoodsId(1)), Some(6));
    }
}
