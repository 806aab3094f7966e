//! Stock movement models: the append-only audit ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stock movement types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "stock_movement_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Sale,
    Adjustment,
    TransferOut,
    TransferIn,
    Damage,
    Return,
    WriteOff,
    Production,
    Consumption,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::Damage => "damage",
            MovementType::Return => "return",
            MovementType::WriteOff => "write_off",
            MovementType::Production => "production",
            MovementType::Consumption => "consumption",
        }
    }
}

/// An immutable audit record of one quantity change. Never updated or
/// deleted after creation; replaying the ordered movements for a
/// (warehouse, variant) pair from zero reconstructs the current available
/// quantity.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockMovement {
    pub id: Uuid,
    pub business_id: Uuid,
    pub tenant_id: Uuid,
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub inventory_level_id: Uuid,
    pub movement_type: MovementType,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub movement_date: DateTime<Utc>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
    /// Source warehouse, transfers only
    pub from_warehouse_id: Option<Uuid>,
    /// Destination warehouse, transfers only
    pub to_warehouse_id: Option<Uuid>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A movement computed by a level transition but not yet persisted. The
/// before/after identity holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
}
