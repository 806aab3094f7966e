//! Warehouse models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Warehouse types supported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseType {
    Standard,
    ColdStorage,
    Distribution,
    Retail,
    /// Virtual location for drop-shipped or consigned stock
    Virtual,
}

impl WarehouseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseType::Standard => "standard",
            WarehouseType::ColdStorage => "cold_storage",
            WarehouseType::Distribution => "distribution",
            WarehouseType::Retail => "retail",
            WarehouseType::Virtual => "virtual",
        }
    }
}

/// A stock-holding location
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Warehouse {
    pub id: Uuid,
    pub business_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Unique per business
    pub code: String,
    pub warehouse_type: String,
    pub address: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub total_capacity: Option<i64>,
    pub used_capacity: i64,
    pub is_default: bool,
    pub is_active: bool,
    pub priority: i32,
    pub operating_hours: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
