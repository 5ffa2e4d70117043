//! Inventory domain module.
//!
//! Batches (quantity and QC status), warehouse stock rows, the stock movement
//! ledger and FEFO selection. Pure domain logic (no IO, no storage).

pub mod batch;
pub mod fefo;
pub mod movement;
pub mod stock;

pub use batch::{
    Batch, BatchCommand, BatchDeactivated, BatchEvent, BatchReceived, BatchRecord,
    DeactivateBatch, DecreaseQuantity, IncreaseQuantity, QcOutcomeRecorded, QcStatus,
    QuantityDecreased, QuantityIncreased, ReceiveBatch, RecordQcOutcome, batch_number,
};
pub use fefo::{eligible_in_fefo_order, fefo_cmp};
pub use movement::{
    DocumentRef, MovementRequest, MovementType, StockMovement, StockMoved, movement_number,
};
pub use stock::{Stock, StockSummary, summarize};
