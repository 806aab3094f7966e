//! Warehouse registry service

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Warehouse, WarehouseType};

/// Partial unique index enforcing one default warehouse per business.
const DEFAULT_WAREHOUSE_KEY: &str = "warehouses_business_default_key";

const WAREHOUSE_COLUMNS: &str = "id, business_id, tenant_id, name, code, warehouse_type, \
     address, contact_name, contact_phone, contact_email, total_capacity, used_capacity, \
     is_default, is_active, priority, operating_hours, metadata, created_at, updated_at";

/// Registry service for warehouse CRUD and default selection
#[derive(Clone)]
pub struct WarehouseService {
    db: PgPool,
}

/// Input for creating a warehouse
#[derive(Debug, Deserialize)]
pub struct CreateWarehouseInput {
    pub name: String,
    pub code: String,
    pub warehouse_type: Option<WarehouseType>,
    pub address: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub total_capacity: Option<i64>,
    pub priority: Option<i32>,
    pub operating_hours: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for updating a warehouse (patch semantics: absent fields keep
/// their current value)
#[derive(Debug, Default, Deserialize)]
pub struct UpdateWarehouseInput {
    pub name: Option<String>,
    pub warehouse_type: Option<WarehouseType>,
    pub address: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub total_capacity: Option<i64>,
    pub priority: Option<i32>,
    pub operating_hours: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl WarehouseService {
    /// Create a new WarehouseService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Register a warehouse. The first warehouse created for a business
    /// becomes its default; the partial unique index on
    /// (business_id) WHERE is_default is the authority, so two concurrent
    /// first creates can never both carry the flag.
    pub async fn create_warehouse(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: CreateWarehouseInput,
    ) -> LedgerResult<Warehouse> {
        if input.name.trim().is_empty() {
            return Err(LedgerError::Validation {
                field: "name".to_string(),
                message: "Warehouse name is required".to_string(),
            });
        }
        if input.code.trim().is_empty() {
            return Err(LedgerError::Validation {
                field: "code".to_string(),
                message: "Warehouse code is required".to_string(),
            });
        }
        if let Some(capacity) = input.total_capacity {
            if capacity < 0 {
                return Err(LedgerError::Validation {
                    field: "total_capacity".to_string(),
                    message: "Capacity cannot be negative".to_string(),
                });
            }
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM warehouses WHERE business_id = $1",
        )
        .bind(business_id)
        .fetch_one(&self.db)
        .await?;

        let result = self
            .insert_warehouse(business_id, tenant_id, &input, existing == 0)
            .await;

        let warehouse = match result {
            // Another creator claimed the default flag in the window
            // between the count and the insert; this one is not the first.
            Err(err) if err.violated_constraint() == Some(DEFAULT_WAREHOUSE_KEY) => {
                self.insert_warehouse(business_id, tenant_id, &input, false)
                    .await
            }
            other => other,
        }
        .map_err(|err| {
            if err.is_unique_violation() {
                LedgerError::DuplicateEntry("warehouse code".to_string())
            } else {
                err
            }
        })?;

        tracing::info!(warehouse_id = %warehouse.id, code = %warehouse.code, "warehouse created");
        Ok(warehouse)
    }

    async fn insert_warehouse(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        input: &CreateWarehouseInput,
        is_default: bool,
    ) -> LedgerResult<Warehouse> {
        let warehouse_type = input.warehouse_type.unwrap_or(WarehouseType::Standard);

        let warehouse = sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            INSERT INTO warehouses
                (business_id, tenant_id, name, code, warehouse_type, address,
                 contact_name, contact_phone, contact_email, total_capacity,
                 is_default, priority, operating_hours, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {WAREHOUSE_COLUMNS}
            "#
        ))
        .bind(business_id)
        .bind(tenant_id)
        .bind(input.name.trim())
        .bind(input.code.trim())
        .bind(warehouse_type.as_str())
        .bind(&input.address)
        .bind(&input.contact_name)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(input.total_capacity)
        .bind(is_default)
        .bind(input.priority.unwrap_or(0))
        .bind(&input.operating_hours)
        .bind(&input.metadata)
        .fetch_one(&self.db)
        .await?;

        Ok(warehouse)
    }

    /// Get a warehouse by id.
    pub async fn get_warehouse(
        &self,
        business_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<Warehouse> {
        sqlx::query_as::<_, Warehouse>(&format!(
            "SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE id = $1 AND business_id = $2"
        ))
        .bind(warehouse_id)
        .bind(business_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Warehouse".to_string()))
    }

    /// List warehouses for a business, highest priority first.
    pub async fn list_warehouses(
        &self,
        business_id: Uuid,
        include_inactive: bool,
    ) -> LedgerResult<Vec<Warehouse>> {
        let warehouses = sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            SELECT {WAREHOUSE_COLUMNS} FROM warehouses
            WHERE business_id = $1 AND (is_active OR $2)
            ORDER BY priority DESC, created_at
            "#
        ))
        .bind(business_id)
        .bind(include_inactive)
        .fetch_all(&self.db)
        .await?;

        Ok(warehouses)
    }

    /// Get the default warehouse for a business.
    pub async fn get_default_warehouse(&self, business_id: Uuid) -> LedgerResult<Warehouse> {
        sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            SELECT {WAREHOUSE_COLUMNS} FROM warehouses
            WHERE business_id = $1 AND is_default AND is_active
            "#
        ))
        .bind(business_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Default warehouse".to_string()))
    }

    /// Update warehouse attributes.
    pub async fn update_warehouse(
        &self,
        business_id: Uuid,
        warehouse_id: Uuid,
        input: UpdateWarehouseInput,
    ) -> LedgerResult<Warehouse> {
        let existing = self.get_warehouse(business_id, warehouse_id).await?;

        if let Some(name) = &input.name {
            if name.trim().is_empty() {
                return Err(LedgerError::Validation {
                    field: "name".to_string(),
                    message: "Warehouse name is required".to_string(),
                });
            }
        }
        if let Some(capacity) = input.total_capacity {
            if capacity < 0 {
                return Err(LedgerError::Validation {
                    field: "total_capacity".to_string(),
                    message: "Capacity cannot be negative".to_string(),
                });
            }
        }

        let warehouse_type = input
            .warehouse_type
            .map(|t| t.as_str().to_string())
            .unwrap_or(existing.warehouse_type);

        let warehouse = sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            UPDATE warehouses
            SET name = $1, warehouse_type = $2, address = $3, contact_name = $4,
                contact_phone = $5, contact_email = $6, total_capacity = $7,
                priority = $8, operating_hours = $9, metadata = $10, updated_at = NOW()
            WHERE id = $11 AND business_id = $12
            RETURNING {WAREHOUSE_COLUMNS}
            "#
        ))
        .bind(input.name.map(|n| n.trim().to_string()).unwrap_or(existing.name))
        .bind(warehouse_type)
        .bind(input.address.or(existing.address))
        .bind(input.contact_name.or(existing.contact_name))
        .bind(input.contact_phone.or(existing.contact_phone))
        .bind(input.contact_email.or(existing.contact_email))
        .bind(input.total_capacity.or(existing.total_capacity))
        .bind(input.priority.unwrap_or(existing.priority))
        .bind(input.operating_hours.or(existing.operating_hours))
        .bind(input.metadata.or(existing.metadata))
        .bind(warehouse_id)
        .bind(business_id)
        .fetch_one(&self.db)
        .await?;

        Ok(warehouse)
    }

    /// Soft-disable a warehouse. Existing levels and movements keep
    /// referencing it; new default selection skips it.
    pub async fn deactivate_warehouse(
        &self,
        business_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<Warehouse> {
        sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            UPDATE warehouses
            SET is_active = FALSE, is_default = FALSE, updated_at = NOW()
            WHERE id = $1 AND business_id = $2
            RETURNING {WAREHOUSE_COLUMNS}
            "#
        ))
        .bind(warehouse_id)
        .bind(business_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Warehouse".to_string()))
    }

    /// Make a warehouse the business default. Clears the flag on all other
    /// warehouses first, in one transaction, so there is never a window
    /// with zero or two defaults.
    pub async fn set_default_warehouse(
        &self,
        business_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<Warehouse> {
        let mut tx = self.db.begin().await?;

        let target = sqlx::query_as::<_, (bool,)>(
            "SELECT is_active FROM warehouses WHERE id = $1 AND business_id = $2 FOR UPDATE",
        )
        .bind(warehouse_id)
        .bind(business_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Warehouse".to_string()))?;

        if !target.0 {
            return Err(LedgerError::Validation {
                field: "warehouse_id".to_string(),
                message: "Cannot set an inactive warehouse as default".to_string(),
            });
        }

        sqlx::query(
            "UPDATE warehouses SET is_default = FALSE, updated_at = NOW()
             WHERE business_id = $1 AND id <> $2 AND is_default",
        )
        .bind(business_id)
        .bind(warehouse_id)
        .execute(&mut *tx)
        .await?;

        let warehouse = sqlx::query_as::<_, Warehouse>(&format!(
            r#"
            UPDATE warehouses SET is_default = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING {WAREHOUSE_COLUMNS}
            "#
        ))
        .bind(warehouse_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(%warehouse_id, %business_id, "default warehouse changed");
        Ok(warehouse)
    }

    /// Hard-delete a warehouse. Refused while any inventory level or
    /// movement (including transfer legs) still references it.
    pub async fn delete_warehouse(
        &self,
        business_id: Uuid,
        warehouse_id: Uuid,
    ) -> LedgerResult<()> {
        let level_refs = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM inventory_levels WHERE warehouse_id = $1",
        )
        .bind(warehouse_id)
        .fetch_one(&self.db)
        .await?;

        let movement_refs = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stock_movements
             WHERE warehouse_id = $1 OR from_warehouse_id = $1 OR to_warehouse_id = $1",
        )
        .bind(warehouse_id)
        .fetch_one(&self.db)
        .await?;

        if level_refs > 0 || movement_refs > 0 {
            return Err(LedgerError::Conflict {
                resource: "Warehouse".to_string(),
                message: format!(
                    "Warehouse is still referenced by {} inventory level(s) and {} movement(s)",
                    level_refs, movement_refs
                ),
            });
        }

        let result = sqlx::query("DELETE FROM warehouses WHERE id = $1 AND business_id = $2")
            .bind(warehouse_id)
            .bind(business_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound("Warehouse".to_string()));
        }

        Ok(())
    }
}
