//! Stock movement ledger entries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use lotkeeper_core::{
    ActorId, BatchId, DomainError, MovementId, ProductId, WarehouseId, impl_str_enum,
};
use lotkeeper_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Import,
    Export,
    Check,
    Transfer,
    Adjust,
}

impl_str_enum!(MovementType, "movement type", {
    Import => "import",
    Export => "export",
    Check => "check",
    Transfer => "transfer",
    Adjust => "adjust",
});

impl MovementType {
    /// Prefix used in movement numbers.
    pub fn prefix(self) -> &'static str {
        match self {
            MovementType::Import => "IMP",
            MovementType::Export => "EXP",
            MovementType::Check => "CHK",
            MovementType::Transfer => "TRF",
            MovementType::Adjust => "ADJ",
        }
    }
}

/// `{PREFIX}-{YYYYMMDD}-{seq:04}`; `seq` is 1-based per (prefix, day).
pub fn movement_number(kind: MovementType, day: NaiveDate, seq: u32) -> String {
    format!("{}-{}-{seq:04}", kind.prefix(), day.format("%Y%m%d"))
}

/// Originating business document (e.g. `{"order", "SO-42"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Append-only ledger entry for one physical movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub movement_number: String,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub batch_id: Option<BatchId>,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reference: Option<DocumentRef>,
    pub note: Option<String>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

/// Caller input for an import or export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// For exports, `None` lets FEFO pick the batch.
    pub batch_id: Option<BatchId>,
    pub quantity: i64,
    pub reference: Option<DocumentRef>,
    pub actor_id: ActorId,
    pub note: Option<String>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        actor_id: ActorId,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            batch_id: None,
            quantity,
            reference: None,
            actor_id,
            note: None,
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_reference(mut self, reference: DocumentRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive (got {})",
                self.quantity
            )));
        }
        if let Some(r) = &self.reference {
            if r.kind.trim().is_empty() || r.id.trim().is_empty() {
                return Err(DomainError::validation(
                    "reference kind and id cannot be empty",
                ));
            }
        }
        Ok(())
    }

    /// Build the ledger entry for this request once batch and number are settled.
    pub fn into_movement(
        self,
        id: MovementId,
        movement_type: MovementType,
        movement_number: String,
        batch_id: Option<BatchId>,
        created_at: DateTime<Utc>,
    ) -> StockMovement {
        StockMovement {
            id,
            movement_number,
            movement_type,
            product_id: self.product_id,
            batch_id,
            warehouse_id: self.warehouse_id,
            quantity: self.quantity,
            reference: self.reference,
            note: self.note,
            created_by: self.actor_id,
            created_at,
        }
    }
}

/// Event: StockMoved (published after the movement commits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub movement: StockMovement,
    /// Warehouse stock for (warehouse, product) after the movement.
    pub stock_after: i64,
}

impl Event for StockMoved {
    fn event_type(&self) -> &'static str {
        "inventory.stock.moved"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.movement.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_numbers_use_type_prefix() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert_eq!(movement_number(MovementType::Import, day, 1), "IMP-20250110-0001");
        assert_eq!(movement_number(MovementType::Export, day, 42), "EXP-20250110-0042");
        assert_eq!(movement_number(MovementType::Adjust, day, 12345), "ADJ-20250110-12345");
    }

    #[test]
    fn request_validation() {
        let req = MovementRequest::new(ProductId::new(), WarehouseId::new(), 0, ActorId::new(1));
        assert!(matches!(req.validate(), Err(DomainError::Validation(_))));

        let req = MovementRequest::new(ProductId::new(), WarehouseId::new(), 3, ActorId::new(1))
            .with_reference(DocumentRef::new("order", " "));
        assert!(matches!(req.validate(), Err(DomainError::Validation(_))));

        let req = MovementRequest::new(ProductId::new(), WarehouseId::new(), 3, ActorId::new(1))
            .with_reference(DocumentRef::new("order", "SO-42"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn movement_type_round_trips_through_str() {
        for kind in [
            MovementType::Import,
            MovementType::Export,
            MovementType::Check,
            MovementType::Transfer,
            MovementType::Adjust,
        ] {
            assert_eq!(kind.as_str().parse::<MovementType>().unwrap(), kind);
        }
    }
}
