//! Stock operation engine
//!
//! The seven atomic stock operations. Each one runs inside a single
//! serializable transaction bounded by lock and statement timeouts; the
//! store's transaction manager, not application locks, is what prevents
//! lost updates between concurrent writers. A conflicting transaction
//! aborts with a retryable [`LedgerError::TransactionConflict`] and the
//! operation has no observable effect.
//!
//! Alert evaluation runs after commit as a best-effort side effect.

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::StockConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{InventoryLevel, MovementDraft, StockMovement};
use crate::services::{AlertService, LevelService};

const MOVEMENT_COLUMNS: &str = "id, business_id, tenant_id, warehouse_id, variant_id, \
     inventory_level_id, movement_type, quantity_change, quantity_before, quantity_after, \
     movement_date, reference_type, reference_id, unit_cost, total_cost, \
     from_warehouse_id, to_warehouse_id, reason, notes, created_by, approved_by, \
     metadata, created_at";

/// Stock operation engine
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
    config: StockConfig,
    levels: LevelService,
    alerts: AlertService,
}

/// Input for adding stock
#[derive(Debug, Deserialize)]
pub struct AddStockInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Input for deducting stock
#[derive(Debug, Deserialize)]
pub struct DeductStockInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Input for a signed stock adjustment
#[derive(Debug, Deserialize)]
pub struct AdjustStockInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub delta: i64,
    pub reason: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Input for reserving stock against an order
#[derive(Debug, Deserialize)]
pub struct ReserveStockInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub order_id: Uuid,
}

/// Input for releasing a reservation
#[derive(Debug, Deserialize)]
pub struct ReleaseStockInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub order_id: Uuid,
}

/// Input for confirming a reserved sale
#[derive(Debug, Deserialize)]
pub struct ConfirmSaleInput {
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub order_id: Uuid,
    pub created_by: Option<Uuid>,
}

/// Input for transferring stock between warehouses
#[derive(Debug, Deserialize)]
pub struct TransferStockInput {
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Updated level and the movement an operation appended
#[derive(Debug, Clone)]
pub struct StockOperationOutcome {
    pub level: InventoryLevel,
    pub movement: StockMovement,
}

/// Both sides of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub source_level: InventoryLevel,
    pub destination_level: InventoryLevel,
    pub outbound: StockMovement,
    pub inbound: StockMovement,
    /// Shared reference id linking the two movement legs
    pub transfer_id: Uuid,
}

/// Extra columns recorded on a movement row
#[derive(Debug, Default)]
struct MovementMeta {
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    from_warehouse_id: Option<Uuid>,
    to_warehouse_id: Option<Uuid>,
    reason: Option<String>,
    notes: Option<String>,
    created_by: Option<Uuid>,
}

impl StockService {
    /// Create a new StockService instance
    pub fn new(db: PgPool, config: StockConfig) -> Self {
        let levels = LevelService::new(db.clone(), config.clone());
        let alerts = AlertService::new(db.clone());
        Self {
            db,
            config,
            levels,
            alerts,
        }
    }

    /// The resolver this engine uses, for callers that need read access.
    pub fn levels(&self) -> &LevelService {
        &self.levels
    }

    /// The alert service this engine notifies.
    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    /// Increase available stock, recomputing the weighted average cost, and
    /// append a PURCHASE movement.
    pub async fn add_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: AddStockInput,
    ) -> LedgerResult<StockOperationOutcome> {
        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        let draft = level.receive(input.quantity, input.unit_cost)?;
        self.persist_level(&mut tx, &level).await?;
        let movement = self
            .insert_movement(
                &mut tx,
                &level,
                &draft,
                MovementMeta {
                    reference_type: input.reference_type,
                    reference_id: input.reference_id,
                    notes: input.notes,
                    created_by: input.created_by,
                    ..MovementMeta::default()
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            quantity = input.quantity,
            available = level.available_quantity,
            "stock added"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(StockOperationOutcome { level, movement })
    }

    /// Decrease available stock for a direct sale and append a SALE
    /// movement. Fails with insufficient-stock when the available bucket
    /// cannot cover the quantity.
    pub async fn deduct_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: DeductStockInput,
    ) -> LedgerResult<StockOperationOutcome> {
        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        let draft = level.deduct(input.quantity)?;
        self.persist_level(&mut tx, &level).await?;
        let movement = self
            .insert_movement(
                &mut tx,
                &level,
                &draft,
                MovementMeta {
                    reference_type: input.reference_type,
                    reference_id: input.reference_id,
                    notes: input.notes,
                    created_by: input.created_by,
                    ..MovementMeta::default()
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            quantity = input.quantity,
            available = level.available_quantity,
            "stock deducted"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(StockOperationOutcome { level, movement })
    }

    /// Apply a signed correction from a physical count and append an
    /// ADJUSTMENT movement.
    pub async fn adjust_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: AdjustStockInput,
    ) -> LedgerResult<StockOperationOutcome> {
        if input.reason.trim().is_empty() {
            return Err(LedgerError::Validation {
                field: "reason".to_string(),
                message: "Adjustment reason is required".to_string(),
            });
        }

        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        let draft = level.adjust(input.delta)?;
        self.persist_level(&mut tx, &level).await?;
        let movement = self
            .insert_movement(
                &mut tx,
                &level,
                &draft,
                MovementMeta {
                    reason: Some(input.reason),
                    notes: input.notes,
                    created_by: input.created_by,
                    ..MovementMeta::default()
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            delta = input.delta,
            available = level.available_quantity,
            "stock adjusted"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(StockOperationOutcome { level, movement })
    }

    /// Move stock from available to reserved for a pending order. A state
    /// transition only: no movement row is appended.
    pub async fn reserve_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: ReserveStockInput,
    ) -> LedgerResult<InventoryLevel> {
        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        level.reserve(input.quantity)?;
        self.persist_level(&mut tx, &level).await?;
        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            order_id = %input.order_id,
            quantity = input.quantity,
            available = level.available_quantity,
            reserved = level.reserved_quantity,
            "stock reserved"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(level)
    }

    /// Inverse of [`reserve_stock`](Self::reserve_stock): return reserved
    /// stock to the available bucket. No movement row.
    pub async fn release_reserved_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: ReleaseStockInput,
    ) -> LedgerResult<InventoryLevel> {
        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        level.release(input.quantity)?;
        self.persist_level(&mut tx, &level).await?;
        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            order_id = %input.order_id,
            quantity = input.quantity,
            available = level.available_quantity,
            reserved = level.reserved_quantity,
            "reservation released"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(level)
    }

    /// Finalize a reservation into a sale: clear the reservation bucket and
    /// append the SALE audit entry. Available was already deducted at
    /// reserve time and is untouched here; a confirm without a matching
    /// reservation fails with insufficient-reserved.
    pub async fn confirm_sale(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: ConfirmSaleInput,
    ) -> LedgerResult<StockOperationOutcome> {
        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.warehouse_id)
            .await?;

        let mut level = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, input.warehouse_id, input.variant_id)
            .await?;

        let draft = level.confirm_sale(input.quantity)?;
        self.persist_level(&mut tx, &level).await?;
        let movement = self
            .insert_movement(
                &mut tx,
                &level,
                &draft,
                MovementMeta {
                    reference_type: Some("order".to_string()),
                    reference_id: Some(input.order_id),
                    created_by: input.created_by,
                    ..MovementMeta::default()
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            warehouse_id = %input.warehouse_id,
            variant_id = %input.variant_id,
            order_id = %input.order_id,
            quantity = input.quantity,
            reserved = level.reserved_quantity,
            "sale confirmed"
        );

        self.alerts.evaluate_and_log(&level).await;
        Ok(StockOperationOutcome { level, movement })
    }

    /// Move stock between two warehouses as one unit: debit the source,
    /// credit the destination (carrying forward the source's average cost),
    /// and append two movements sharing one transfer id. Either both legs
    /// commit or neither does.
    pub async fn transfer_stock(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: TransferStockInput,
    ) -> LedgerResult<TransferOutcome> {
        if input.from_warehouse_id == input.to_warehouse_id {
            return Err(LedgerError::Validation {
                field: "to_warehouse_id".to_string(),
                message: "Source and destination warehouses must differ".to_string(),
            });
        }

        let mut tx = self.begin_serializable().await?;
        self.ensure_warehouse(&mut tx, business_id, input.from_warehouse_id)
            .await?;
        self.ensure_warehouse(&mut tx, business_id, input.to_warehouse_id)
            .await?;

        // Resolve the two levels in warehouse-id order so concurrent
        // transfers between the same pair acquire rows consistently.
        let ordered = {
            let mut ids = [input.from_warehouse_id, input.to_warehouse_id];
            ids.sort();
            ids
        };
        let mut first = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, ordered[0], input.variant_id)
            .await?;
        let mut second = self
            .levels
            .get_or_create_in(&mut tx, business_id, tenant_id, ordered[1], input.variant_id)
            .await?;

        let (source, destination) = if first.warehouse_id == input.from_warehouse_id {
            (&mut first, &mut second)
        } else {
            (&mut second, &mut first)
        };

        let outbound_draft = source.transfer_out(input.quantity)?;
        let inbound_draft = destination.transfer_in(input.quantity, source.average_cost)?;

        self.persist_level(&mut tx, source).await?;
        self.persist_level(&mut tx, destination).await?;

        let transfer_id = Uuid::new_v4();
        let legs_meta = |reason: &Option<String>, notes: &Option<String>| MovementMeta {
            reference_type: Some("transfer".to_string()),
            reference_id: Some(transfer_id),
            from_warehouse_id: Some(input.from_warehouse_id),
            to_warehouse_id: Some(input.to_warehouse_id),
            reason: reason.clone(),
            notes: notes.clone(),
            created_by: input.created_by,
        };

        let outbound = self
            .insert_movement(&mut tx, source, &outbound_draft, legs_meta(&input.reason, &input.notes))
            .await?;
        let inbound = self
            .insert_movement(&mut tx, destination, &inbound_draft, legs_meta(&input.reason, &input.notes))
            .await?;

        let source_level = source.clone();
        let destination_level = destination.clone();

        tx.commit().await?;

        tracing::info!(
            from_warehouse_id = %input.from_warehouse_id,
            to_warehouse_id = %input.to_warehouse_id,
            variant_id = %input.variant_id,
            quantity = input.quantity,
            %transfer_id,
            "stock transferred"
        );

        self.alerts.evaluate_and_log(&source_level).await;
        self.alerts.evaluate_and_log(&destination_level).await;

        Ok(TransferOutcome {
            source_level,
            destination_level,
            outbound,
            inbound,
            transfer_id,
        })
    }

    /// Ordered movement history for a (warehouse, variant) pair, oldest
    /// first.
    pub async fn movement_history(
        &self,
        warehouse_id: Uuid,
        variant_id: Uuid,
    ) -> LedgerResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS} FROM stock_movements
            WHERE warehouse_id = $1 AND variant_id = $2
            ORDER BY created_at, id
            "#
        ))
        .bind(warehouse_id)
        .bind(variant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(movements)
    }

    /// List movements for a business, newest first.
    pub async fn list_movements(&self, business_id: Uuid) -> LedgerResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS} FROM stock_movements
            WHERE business_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(business_id)
        .fetch_all(&self.db)
        .await?;

        Ok(movements)
    }

    /// Open a serializable transaction bounded by the configured lock and
    /// statement timeouts.
    async fn begin_serializable(&self) -> LedgerResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}s'",
            self.config.lock_timeout_secs
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}s'",
            self.config.statement_timeout_secs
        ))
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }

    async fn ensure_warehouse(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        business_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<()> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM warehouses WHERE id = $1 AND business_id = $2)",
        )
        .bind(warehouse_id)
        .bind(business_id)
        .fetch_one(&mut **tx)
        .await?;

        if !exists {
            return Err(LedgerError::NotFound("Warehouse".to_string()));
        }
        Ok(())
    }

    async fn persist_level(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        level: &InventoryLevel,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            UPDATE inventory_levels
            SET available_quantity = $1, reserved_quantity = $2, average_cost = $3,
                total_value = $4, is_low_stock = $5, is_out_of_stock = $6,
                last_counted_at = $7, last_restock_at = $8, updated_at = $9
            WHERE id = $10
            "#,
        )
        .bind(level.available_quantity)
        .bind(level.reserved_quantity)
        .bind(level.average_cost)
        .bind(level.total_value)
        .bind(level.is_low_stock)
        .bind(level.is_out_of_stock)
        .bind(level.last_counted_at)
        .bind(level.last_restock_at)
        .bind(level.updated_at)
        .bind(level.id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_movement(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        level: &InventoryLevel,
        draft: &MovementDraft,
        meta: MovementMeta,
    ) -> LedgerResult<StockMovement> {
        let movement = sqlx::query_as::<_, StockMovement>(&format!(
            r#"
            INSERT INTO stock_movements
                (business_id, tenant_id, warehouse_id, variant_id, inventory_level_id,
                 movement_type, quantity_change, quantity_before, quantity_after,
                 reference_type, reference_id, unit_cost, total_cost,
                 from_warehouse_id, to_warehouse_id, reason, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        ))
        .bind(level.business_id)
        .bind(level.tenant_id)
        .bind(level.warehouse_id)
        .bind(level.variant_id)
        .bind(level.id)
        .bind(draft.movement_type)
        .bind(draft.quantity_change)
        .bind(draft.quantity_before)
        .bind(draft.quantity_after)
        .bind(&meta.reference_type)
        .bind(meta.reference_id)
        .bind(draft.unit_cost)
        .bind(draft.total_cost)
        .bind(meta.from_warehouse_id)
        .bind(meta.to_warehouse_id)
        .bind(&meta.reason)
        .bind(&meta.notes)
        .bind(meta.created_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(movement)
    }
}

/// Retry an operation on retryable transaction conflicts with bounded
/// exponential backoff. Validation and business-conflict errors are
/// returned immediately.
pub async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    base_backoff: Duration,
    mut op: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff = base_backoff * 2u32.saturating_pow(attempt - 1)
                    + Duration::from_millis(u64::from(attempt * 7 % 13));
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying stock operation after transaction conflict"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
