//! Inventory level model and its pure state transitions
//!
//! All quantity arithmetic lives here so the service layer and the test
//! suite exercise the same code. Methods mutate the level in place only
//! when the transition is valid; otherwise the level is untouched and an
//! error is returned.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::movement::{MovementDraft, MovementType};

/// Current stock state for exactly one (warehouse, variant) pair
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventoryLevel {
    pub id: Uuid,
    pub business_id: Uuid,
    pub tenant_id: Uuid,
    pub warehouse_id: Uuid,
    pub variant_id: Uuid,
    pub available_quantity: i64,
    pub reserved_quantity: i64,
    pub damaged_quantity: i64,
    pub in_transit_quantity: i64,
    pub reorder_point: Option<i64>,
    pub reorder_quantity: i64,
    pub max_stock_level: Option<i64>,
    pub average_cost: Decimal,
    pub total_value: Decimal,
    pub bin_location: Option<String>,
    pub aisle: Option<String>,
    pub shelf: Option<String>,
    pub last_counted_at: Option<DateTime<Utc>>,
    pub last_restock_at: Option<DateTime<Utc>>,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn positive(field: &str, quantity: i64) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::Validation {
            field: field.to_string(),
            message: format!("Quantity must be positive, got {}", quantity),
        });
    }
    Ok(())
}

impl InventoryLevel {
    /// A zeroed level for a pair that has seen no stock events yet.
    pub fn empty(
        business_id: Uuid,
        tenant_id: Uuid,
        warehouse_id: Uuid,
        variant_id: Uuid,
        reorder_point: i64,
        reorder_quantity: i64,
    ) -> Self {
        let now = Utc::now();
        let mut level = Self {
            id: Uuid::new_v4(),
            business_id,
            tenant_id,
            warehouse_id,
            variant_id,
            available_quantity: 0,
            reserved_quantity: 0,
            damaged_quantity: 0,
            in_transit_quantity: 0,
            reorder_point: Some(reorder_point),
            reorder_quantity,
            max_stock_level: None,
            average_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
            bin_location: None,
            aisle: None,
            shelf: None,
            last_counted_at: None,
            last_restock_at: None,
            is_low_stock: false,
            is_out_of_stock: false,
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        // A zeroed level is out of stock and, with a reorder point set,
        // already below threshold.
        level.refresh_stock_flags();
        level
    }

    /// Recompute the derived stock flags from current quantities.
    pub fn refresh_stock_flags(&mut self) {
        self.is_out_of_stock = self.available_quantity == 0;
        self.is_low_stock = match self.reorder_point {
            Some(point) => self.available_quantity <= point,
            None => false,
        };
    }

    fn touch(&mut self) {
        self.refresh_stock_flags();
        self.total_value = self.average_cost * Decimal::from(self.available_quantity);
        self.updated_at = Utc::now();
    }

    /// Receive stock into the available bucket, recomputing the weighted
    /// average cost when a unit cost is supplied.
    pub fn receive(&mut self, quantity: i64, unit_cost: Option<Decimal>) -> LedgerResult<MovementDraft> {
        positive("quantity", quantity)?;

        let before = self.available_quantity;
        let after = before + quantity;

        if let Some(cost) = unit_cost {
            if cost < Decimal::ZERO {
                return Err(LedgerError::Validation {
                    field: "unit_cost".to_string(),
                    message: "Unit cost cannot be negative".to_string(),
                });
            }
            let existing_value = self.average_cost * Decimal::from(before);
            let incoming_value = cost * Decimal::from(quantity);
            self.average_cost = (existing_value + incoming_value) / Decimal::from(after);
        }

        self.available_quantity = after;
        self.last_restock_at = Some(Utc::now());
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::Purchase,
            quantity_change: quantity,
            quantity_before: before,
            quantity_after: after,
            unit_cost,
            total_cost: unit_cost.map(|c| c * Decimal::from(quantity)),
        })
    }

    /// Remove stock from the available bucket for a direct sale.
    pub fn deduct(&mut self, quantity: i64) -> LedgerResult<MovementDraft> {
        positive("quantity", quantity)?;

        if self.available_quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                requested: quantity,
                available: self.available_quantity,
            });
        }

        let before = self.available_quantity;
        self.available_quantity = before - quantity;
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::Sale,
            quantity_change: -quantity,
            quantity_before: before,
            quantity_after: self.available_quantity,
            unit_cost: None,
            total_cost: None,
        })
    }

    /// Apply a signed correction from a physical count.
    pub fn adjust(&mut self, delta: i64) -> LedgerResult<MovementDraft> {
        if delta == 0 {
            return Err(LedgerError::Validation {
                field: "delta".to_string(),
                message: "Adjustment delta cannot be zero".to_string(),
            });
        }

        let before = self.available_quantity;
        let after = before + delta;
        if after < 0 {
            return Err(LedgerError::InsufficientStock {
                requested: -delta,
                available: before,
            });
        }

        self.available_quantity = after;
        self.last_counted_at = Some(Utc::now());
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::Adjustment,
            quantity_change: delta,
            quantity_before: before,
            quantity_after: after,
            unit_cost: None,
            total_cost: None,
        })
    }

    /// Move stock from available to reserved for a pending order. Not a
    /// ledger event: no movement is drafted.
    pub fn reserve(&mut self, quantity: i64) -> LedgerResult<()> {
        positive("quantity", quantity)?;

        if self.available_quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                requested: quantity,
                available: self.available_quantity,
            });
        }

        self.available_quantity -= quantity;
        self.reserved_quantity += quantity;
        self.touch();
        Ok(())
    }

    /// Inverse of [`reserve`](Self::reserve): return reserved stock to the
    /// available bucket.
    pub fn release(&mut self, quantity: i64) -> LedgerResult<()> {
        positive("quantity", quantity)?;

        if self.reserved_quantity < quantity {
            return Err(LedgerError::InsufficientReserved {
                requested: quantity,
                reserved: self.reserved_quantity,
            });
        }

        self.reserved_quantity -= quantity;
        self.available_quantity += quantity;
        self.touch();
        Ok(())
    }

    /// Finalize a reservation as a sale. Available is untouched here: the
    /// deduction already happened at reserve time; this clears the
    /// reservation bucket and drafts the audit entry. `quantity_before` is
    /// the pre-reservation total (available + reserved).
    pub fn confirm_sale(&mut self, quantity: i64) -> LedgerResult<MovementDraft> {
        positive("quantity", quantity)?;

        if self.reserved_quantity < quantity {
            return Err(LedgerError::InsufficientReserved {
                requested: quantity,
                reserved: self.reserved_quantity,
            });
        }

        let before = self.available_quantity + self.reserved_quantity;
        self.reserved_quantity -= quantity;
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::Sale,
            quantity_change: -quantity,
            quantity_before: before,
            quantity_after: before - quantity,
            unit_cost: None,
            total_cost: None,
        })
    }

    /// Outbound leg of a transfer.
    pub fn transfer_out(&mut self, quantity: i64) -> LedgerResult<MovementDraft> {
        positive("quantity", quantity)?;

        if self.available_quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                requested: quantity,
                available: self.available_quantity,
            });
        }

        let before = self.available_quantity;
        self.available_quantity = before - quantity;
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::TransferOut,
            quantity_change: -quantity,
            quantity_before: before,
            quantity_after: self.available_quantity,
            unit_cost: None,
            total_cost: None,
        })
    }

    /// Inbound leg of a transfer, carrying forward the source's average
    /// cost for the received units.
    pub fn transfer_in(&mut self, quantity: i64, source_average_cost: Decimal) -> LedgerResult<MovementDraft> {
        positive("quantity", quantity)?;

        let before = self.available_quantity;
        let after = before + quantity;

        let existing_value = self.average_cost * Decimal::from(before);
        let incoming_value = source_average_cost * Decimal::from(quantity);
        self.average_cost = (existing_value + incoming_value) / Decimal::from(after);

        self.available_quantity = after;
        self.last_restock_at = Some(Utc::now());
        self.touch();

        Ok(MovementDraft {
            movement_type: MovementType::TransferIn,
            quantity_change: quantity,
            quantity_before: before,
            quantity_after: after,
            unit_cost: Some(source_average_cost),
            total_cost: Some(source_average_cost * Decimal::from(quantity)),
        })
    }
}
