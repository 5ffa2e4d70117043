//! Postgres-backed store.
//!
//! ## Concurrency
//!
//! Transactions run at `READ COMMITTED`. Rows that are read, checked and then
//! written back (stock, batches, inspections) are loaded `FOR UPDATE`, which
//! serialises competing writers on the same row. On top of that:
//!
//! - a missing stock row is inserted at zero before it is locked, so the
//!   first receipts into a warehouse queue behind each other;
//! - export locks every FEFO candidate of the product, not just the one it
//!   picks, so two exporters never both settle on the same earliest batch;
//! - movements lock the stock row before any batch row;
//! - the stock decrement is conditional (`WHERE quantity >= $n`), so a stale
//!   read can never overdraw;
//! - batch and inspection updates compare the stored `version` and report
//!   [`StoreError::Conflict`] when it moved on;
//! - movement and batch number counters are a single
//!   `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` |
//! |------------|-----------------|--------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Conflict` |
//! | Database (other) | any other | `Backend` |
//! | ColumnDecode / ColumnNotFound | N/A | `Decode` |
//! | Other | N/A | `Backend` |

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use lotkeeper_core::{
    ActorId, BatchId, DefectId, DomainError, ExpectedVersion, InspectionId, MeasurementId,
    MovementId, ProductId, WarehouseId,
};
use lotkeeper_inventory::{
    BatchRecord, DocumentRef, QcStatus, Stock, StockMovement, StockSummary,
};
use lotkeeper_quality::{AqlLevels, Defect, InspectionRecord, Measurement, SamplingPlan};

use super::{
    InspectionFilter, MovementFilter, Page, Pagination, Store, StoreError, StoreTx,
};

/// Schema applied by [`PostgresStore::migrate`].
pub const MIGRATION: &str = include_str!("migrations/0001_lotkeeper.sql");

const BATCH_COLUMNS: &str = "id, batch_number, product_id, initial_quantity, current_quantity, \
     manufacturing_date, expiry_date, qc_status, qc_note, is_active, created_at, updated_at, version";

const MOVEMENT_COLUMNS: &str = "id, movement_number, movement_type, product_id, batch_id, \
     warehouse_id, quantity, reference_type, reference_id, note, created_by, created_at";

const INSPECTION_COLUMNS: &str = "id, type, batch_id, lot_size, inspection_level, aql_critical, \
     aql_major, aql_minor, sample_size, accept_major, reject_major, accept_minor, reject_minor, \
     status, decision, owner, note, started_at, completed_at, version";

/// Postgres-backed transactional store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Make a product known to the catalog lookup (dev/test seeding).
    pub async fn register_product(&self, id: ProductId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO products (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_product", e))?;
        Ok(())
    }

    /// Make a warehouse known to the catalog lookup (dev/test seeding).
    pub async fn register_warehouse(&self, id: WarehouseId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO warehouses (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx { tx })
    }
}

/// Open Postgres transaction; rolled back on drop unless committed.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    async fn exists(&mut self, sql: &str, id: &Uuid, op: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        Ok(row.is_some())
    }

    async fn fetch_batch(
        &mut self,
        id: BatchId,
        for_update: bool,
    ) -> Result<Option<BatchRecord>, StoreError> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1{lock}");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_batch", e))?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn fetch_inspection(
        &mut self,
        id: InspectionId,
        for_update: bool,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let sql = format!("SELECT {INSPECTION_COLUMNS} FROM qc_inspections WHERE id = $1{lock}");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_inspection", e))?;
        row.as_ref().map(inspection_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl StoreTx for PostgresTx {
    async fn product_exists(&mut self, id: ProductId) -> Result<bool, StoreError> {
        self.exists("SELECT 1 FROM products WHERE id = $1", id.as_uuid(), "product_exists")
            .await
    }

    async fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError> {
        self.exists(
            "SELECT 1 FROM warehouses WHERE id = $1",
            id.as_uuid(),
            "warehouse_exists",
        )
        .await
    }

    async fn next_sequence(&mut self, prefix: &str, day: NaiveDate) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sequence_counters (prefix, day, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, day)
            DO UPDATE SET last_value = sequence_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(day)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;

        to_u32(col::<i32>(&row, "last_value")?, "last_value")
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id), err)]
    async fn insert_batch(&mut self, batch: &BatchRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batches (
                id, batch_number, product_id, initial_quantity, current_quantity,
                manufacturing_date, expiry_date, qc_status, qc_note, is_active,
                created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(&batch.batch_number)
        .bind(batch.product_id.as_uuid())
        .bind(batch.initial_quantity)
        .bind(batch.current_quantity)
        .bind(batch.manufacturing_date)
        .bind(batch.expiry_date)
        .bind(batch.qc_status.as_str())
        .bind(&batch.qc_note)
        .bind(batch.is_active)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .bind(batch.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_batch", e))?;
        Ok(())
    }

    async fn load_batch(&mut self, id: BatchId) -> Result<Option<BatchRecord>, StoreError> {
        self.fetch_batch(id, false).await
    }

    async fn load_batch_for_update(
        &mut self,
        id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError> {
        self.fetch_batch(id, true).await
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id, expected = ?expected), err)]
    async fn update_batch(
        &mut self,
        batch: &BatchRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET current_quantity = $2,
                qc_status = $3,
                qc_note = $4,
                is_active = $5,
                updated_at = $6,
                version = $7
            WHERE id = $1 AND ($8::bigint IS NULL OR version = $8)
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(batch.current_quantity)
        .bind(batch.qc_status.as_str())
        .bind(&batch.qc_note)
        .bind(batch.is_active)
        .bind(batch.updated_at)
        .bind(batch.version as i64)
        .bind(expected_param(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_batch", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::stale("batch", expected));
        }
        Ok(())
    }

    async fn batches_for_product(
        &mut self,
        product_id: ProductId,
        qc_status: Option<QcStatus>,
        active_only: bool,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM batches
            WHERE product_id = $1
                AND ($2::text IS NULL OR qc_status = $2)
                AND (NOT $3 OR is_active)
            ORDER BY seq ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(qc_status.map(|s| s.as_str()))
            .bind(active_only)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("batches_for_product", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn lock_exportable_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        // Rows come back locked in FEFO order; a row emptied by a writer we
        // waited on is re-checked against the WHERE clause and dropped.
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM batches
            WHERE product_id = $1
                AND qc_status = $2
                AND is_active
                AND current_quantity > 0
            ORDER BY expiry_date ASC NULLS LAST, seq ASC
            FOR UPDATE
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(QcStatus::Passed.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_exportable_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn load_stock_for_update(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Option<Stock>, StoreError> {
        // Without a row there is nothing to lock and two first receipts would
        // both start from zero.
        sqlx::query(
            r#"
            INSERT INTO stocks (warehouse_id, product_id, quantity, updated_at)
            VALUES ($1, $2, 0, now())
            ON CONFLICT (warehouse_id, product_id) DO NOTHING
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(product_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_stock_row", e))?;

        let row = sqlx::query(
            r#"
            SELECT warehouse_id, product_id, quantity, updated_at
            FROM stocks
            WHERE warehouse_id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_stock", e))?;
        row.as_ref().map(stock_from_row).transpose()
    }

    async fn save_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stocks (warehouse_id, product_id, quantity, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (warehouse_id, product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(stock.warehouse_id.as_uuid())
        .bind(stock.product_id.as_uuid())
        .bind(stock.quantity)
        .bind(stock.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_stock", e))?;
        Ok(())
    }

    async fn decrement_stock(
        &mut self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE stocks
            SET quantity = quantity - $3, updated_at = $4
            WHERE warehouse_id = $1 AND product_id = $2 AND quantity >= $3
            RETURNING quantity
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("decrement_stock", e))?;
        row.as_ref().map(|r| col::<i64>(r, "quantity")).transpose()
    }

    async fn stock_summary(
        &mut self,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, SUM(quantity)::bigint AS total_quantity
            FROM stocks
            WHERE ($1::uuid IS NULL OR product_id = $1)
            GROUP BY product_id
            ORDER BY product_id
            "#,
        )
        .bind(product_id.map(|p| *p.as_uuid()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("stock_summary", e))?;

        rows.iter()
            .map(|row| {
                Ok(StockSummary {
                    product_id: ProductId::from_uuid(col(row, "product_id")?),
                    total_quantity: col(row, "total_quantity")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, movement), fields(movement_number = %movement.movement_number), err)]
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, movement_number, movement_type, product_id, batch_id, warehouse_id,
                quantity, reference_type, reference_id, note, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(&movement.movement_number)
        .bind(movement.movement_type.as_str())
        .bind(movement.product_id.as_uuid())
        .bind(movement.batch_id.map(|b| *b.as_uuid()))
        .bind(movement.warehouse_id.as_uuid())
        .bind(movement.quantity)
        .bind(movement.reference.as_ref().map(|r| r.kind.as_str()))
        .bind(movement.reference.as_ref().map(|r| r.id.as_str()))
        .bind(&movement.note)
        .bind(movement.created_by.get())
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn list_movements(
        &mut self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        let movement_type = filter.movement_type.map(|t| t.as_str());
        let product_id = filter.product_id.map(|p| *p.as_uuid());
        let warehouse_id = filter.warehouse_id.map(|w| *w.as_uuid());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM stock_movements
            WHERE ($1::text IS NULL OR movement_type = $1)
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::uuid IS NULL OR warehouse_id = $3)
            "#,
        )
        .bind(movement_type)
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;
        let total: i64 = col(&count_row, "total")?;

        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE ($1::text IS NULL OR movement_type = $1)
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::uuid IS NULL OR warehouse_id = $3)
            ORDER BY seq DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(movement_type)
            .bind(product_id)
            .bind(warehouse_id)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let items = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    #[instrument(skip(self, record), fields(inspection_id = %record.id), err)]
    async fn insert_inspection(&mut self, record: &InspectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO qc_inspections (
                id, type, batch_id, lot_size, inspection_level,
                aql_critical, aql_major, aql_minor,
                sample_size, accept_major, reject_major, accept_minor, reject_minor,
                status, decision, owner, note, started_at, completed_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.kind.as_str())
        .bind(record.batch_id.as_uuid())
        .bind(record.lot_size)
        .bind(record.inspection_level.as_str())
        .bind(record.aql.critical)
        .bind(record.aql.major)
        .bind(record.aql.minor)
        .bind(record.sampling.sample_size.map(to_i32).transpose()?)
        .bind(to_i32(record.sampling.accept_major)?)
        .bind(to_i32(record.sampling.reject_major)?)
        .bind(to_i32(record.sampling.accept_minor)?)
        .bind(to_i32(record.sampling.reject_minor)?)
        .bind(record.status.as_str())
        .bind(record.decision.map(|d| d.as_str()))
        .bind(record.owner.map(|o| o.get()))
        .bind(&record.note)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_inspection", e))?;
        Ok(())
    }

    async fn load_inspection(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        self.fetch_inspection(id, false).await
    }

    async fn load_inspection_for_update(
        &mut self,
        id: InspectionId,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        self.fetch_inspection(id, true).await
    }

    #[instrument(skip(self, record), fields(inspection_id = %record.id, expected = ?expected), err)]
    async fn update_inspection(
        &mut self,
        record: &InspectionRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE qc_inspections
            SET status = $2,
                decision = $3,
                note = $4,
                completed_at = $5,
                version = $6
            WHERE id = $1 AND ($7::bigint IS NULL OR version = $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.status.as_str())
        .bind(record.decision.map(|d| d.as_str()))
        .bind(&record.note)
        .bind(record.completed_at)
        .bind(record.version as i64)
        .bind(expected_param(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_inspection", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::stale("inspection", expected));
        }
        Ok(())
    }

    async fn insert_defects(&mut self, defects: &[Defect]) -> Result<(), StoreError> {
        for d in defects {
            sqlx::query(
                r#"
                INSERT INTO qc_defects (id, inspection_id, severity, qty, code, name, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(d.id.as_uuid())
            .bind(d.inspection_id.as_uuid())
            .bind(d.severity.as_str())
            .bind(to_i32(d.qty)?)
            .bind(&d.code)
            .bind(&d.name)
            .bind(&d.description)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_defect", e))?;
        }
        Ok(())
    }

    async fn insert_measurements(
        &mut self,
        measurements: &[Measurement],
    ) -> Result<(), StoreError> {
        for m in measurements {
            sqlx::query(
                r#"
                INSERT INTO qc_measurements (
                    id, inspection_id, characteristic, value, unit, pass_fail, method
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(m.id.as_uuid())
            .bind(m.inspection_id.as_uuid())
            .bind(&m.characteristic)
            .bind(m.value)
            .bind(&m.unit)
            .bind(m.pass_fail)
            .bind(&m.method)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_measurement", e))?;
        }
        Ok(())
    }

    async fn defects_for(&mut self, id: InspectionId) -> Result<Vec<Defect>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, inspection_id, severity, qty, code, name, description
            FROM qc_defects
            WHERE inspection_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("defects_for", e))?;

        rows.iter()
            .map(|row| {
                Ok(Defect {
                    id: DefectId::from_uuid(col(row, "id")?),
                    inspection_id: InspectionId::from_uuid(col(row, "inspection_id")?),
                    severity: parse(&col::<String>(row, "severity")?)?,
                    qty: to_u32(col(row, "qty")?, "qty")?,
                    code: col(row, "code")?,
                    name: col(row, "name")?,
                    description: col(row, "description")?,
                })
            })
            .collect()
    }

    async fn measurements_for(
        &mut self,
        id: InspectionId,
    ) -> Result<Vec<Measurement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, inspection_id, characteristic, value, unit, pass_fail, method
            FROM qc_measurements
            WHERE inspection_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("measurements_for", e))?;

        rows.iter()
            .map(|row| {
                Ok(Measurement {
                    id: MeasurementId::from_uuid(col(row, "id")?),
                    inspection_id: InspectionId::from_uuid(col(row, "inspection_id")?),
                    characteristic: col(row, "characteristic")?,
                    value: col(row, "value")?,
                    unit: col(row, "unit")?,
                    pass_fail: col(row, "pass_fail")?,
                    method: col(row, "method")?,
                })
            })
            .collect()
    }

    async fn list_inspections(
        &mut self,
        filter: &InspectionFilter,
    ) -> Result<Vec<InspectionRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {INSPECTION_COLUMNS}
            FROM qc_inspections
            WHERE ($1::uuid IS NULL OR batch_id = $1)
                AND ($2::text IS NULL OR type = $2)
                AND ($3::text IS NULL OR status = $3)
            ORDER BY started_at DESC, seq DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.batch_id.map(|b| *b.as_uuid()))
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_inspections", e))?;
        rows.iter().map(inspection_from_row).collect()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

// Row mapping

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Decode(format!("column {name}: {e}")))
}

fn parse<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = DomainError>,
{
    value.parse().map_err(|e: DomainError| StoreError::Decode(e.to_string()))
}

fn to_u32(value: i32, name: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("{name} is negative: {value}")))
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("{value} exceeds INTEGER range")))
}

fn expected_param(expected: ExpectedVersion) -> Option<i64> {
    expected.exact().map(|v| v as i64)
}

fn batch_from_row(row: &PgRow) -> Result<BatchRecord, StoreError> {
    Ok(BatchRecord {
        id: BatchId::from_uuid(col(row, "id")?),
        batch_number: col(row, "batch_number")?,
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        initial_quantity: col(row, "initial_quantity")?,
        current_quantity: col(row, "current_quantity")?,
        manufacturing_date: col(row, "manufacturing_date")?,
        expiry_date: col(row, "expiry_date")?,
        qc_status: parse(&col::<String>(row, "qc_status")?)?,
        qc_note: col(row, "qc_note")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
        version: col::<i64>(row, "version")? as u64,
    })
}

fn stock_from_row(row: &PgRow) -> Result<Stock, StoreError> {
    Ok(Stock {
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        quantity: col(row, "quantity")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let reference_type: Option<String> = col(row, "reference_type")?;
    let reference_id: Option<String> = col(row, "reference_id")?;
    let reference = match (reference_type, reference_id) {
        (Some(kind), Some(id)) => Some(DocumentRef { kind, id }),
        _ => None,
    };

    Ok(StockMovement {
        id: MovementId::from_uuid(col(row, "id")?),
        movement_number: col(row, "movement_number")?,
        movement_type: parse(&col::<String>(row, "movement_type")?)?,
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        batch_id: col::<Option<Uuid>>(row, "batch_id")?.map(BatchId::from_uuid),
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        quantity: col(row, "quantity")?,
        reference,
        note: col(row, "note")?,
        created_by: ActorId::new(col(row, "created_by")?),
        created_at: col(row, "created_at")?,
    })
}

fn inspection_from_row(row: &PgRow) -> Result<InspectionRecord, StoreError> {
    let sample_size = col::<Option<i32>>(row, "sample_size")?
        .map(|v| to_u32(v, "sample_size"))
        .transpose()?;

    Ok(InspectionRecord {
        id: InspectionId::from_uuid(col(row, "id")?),
        kind: parse(&col::<String>(row, "type")?)?,
        batch_id: BatchId::from_uuid(col(row, "batch_id")?),
        lot_size: col(row, "lot_size")?,
        inspection_level: parse(&col::<String>(row, "inspection_level")?)?,
        aql: AqlLevels {
            critical: col(row, "aql_critical")?,
            major: col(row, "aql_major")?,
            minor: col(row, "aql_minor")?,
        },
        sampling: SamplingPlan {
            sample_size,
            accept_major: to_u32(col(row, "accept_major")?, "accept_major")?,
            reject_major: to_u32(col(row, "reject_major")?, "reject_major")?,
            accept_minor: to_u32(col(row, "accept_minor")?, "accept_minor")?,
            reject_minor: to_u32(col(row, "reject_minor")?, "reject_minor")?,
        },
        status: parse(&col::<String>(row, "status")?)?,
        decision: col::<Option<String>>(row, "decision")?
            .as_deref()
            .map(parse)
            .transpose()?,
        owner: col::<Option<i64>>(row, "owner")?.map(ActorId::new),
        note: col(row, "note")?,
        started_at: col(row, "started_at")?,
        completed_at: col(row, "completed_at")?,
        version: col::<i64>(row, "version")? as u64,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: a concurrent writer took the key first.
                Some("23505") => StoreError::Conflict(msg),
                // Check violation: e.g. a quantity would have gone negative.
                Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
