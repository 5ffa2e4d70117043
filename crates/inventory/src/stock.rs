use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotkeeper_core::{DomainError, DomainResult, ProductId, WarehouseId};

/// On-hand quantity of one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    /// Zero-quantity row, as created on first touch.
    pub fn empty(warehouse_id: WarehouseId, product_id: ProductId, now: DateTime<Utc>) -> Self {
        Self {
            warehouse_id,
            product_id,
            quantity: 0,
            updated_at: now,
        }
    }

    pub fn receive(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive (got {quantity})"
            )));
        }
        self.quantity = self.quantity.checked_add(quantity).ok_or_else(|| {
            DomainError::validation(format!(
                "receiving {quantity} overflows on-hand quantity {}",
                self.quantity
            ))
        })?;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_available(&self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive (got {quantity})"
            )));
        }
        if self.quantity < quantity {
            return Err(DomainError::InsufficientStock {
                requested: quantity,
                available: self.quantity,
            });
        }
        Ok(())
    }
}

/// Total on-hand quantity of a product across all warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub product_id: ProductId,
    pub total_quantity: i64,
}

/// Fold stock rows into per-product totals, ordered by product id.
pub fn summarize<'a>(rows: impl IntoIterator<Item = &'a Stock>) -> Vec<StockSummary> {
    let mut totals = std::collections::BTreeMap::<ProductId, i64>::new();
    for row in rows {
        let total = totals.entry(row.product_id).or_default();
        *total = total.saturating_add(row.quantity);
    }
    totals
        .into_iter()
        .map(|(product_id, total_quantity)| StockSummary {
            product_id,
            total_quantity,
        })
        .collect()
}
