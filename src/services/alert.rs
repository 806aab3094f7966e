//! Alert evaluator and stock-alert lifecycle
//!
//! Evaluation is a best-effort side effect of stock operations: it runs
//! after the operation's transaction commits and its failures are logged
//! and swallowed, never propagated to the caller.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{AlertSeverity, AlertStatus, AlertType, InventoryLevel, StockAlert};

const ALERT_COLUMNS: &str = "id, business_id, inventory_level_id, alert_type, severity, status, \
     current_quantity, reorder_point, recommended_order_quantity, \
     notification_sent, notification_sent_at, acknowledged_by, acknowledged_at, \
     resolved_at, resolution_note, metadata, created_at, updated_at";

/// What the evaluator should do for a level in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Open (or refresh) an alert of the given type.
    Open {
        alert_type: AlertType,
        severity: AlertSeverity,
    },
    /// Stock is above threshold: resolve any open alerts for the level.
    Resolve,
}

impl AlertDecision {
    /// Pure threshold decision for a post-mutation level.
    pub fn for_level(level: &InventoryLevel) -> Self {
        if level.available_quantity == 0 {
            return AlertDecision::Open {
                alert_type: AlertType::OutOfStock,
                severity: AlertSeverity::Critical,
            };
        }
        match level.reorder_point {
            Some(point) if level.available_quantity <= point => AlertDecision::Open {
                alert_type: AlertType::LowStock,
                severity: AlertSeverity::Warning,
            },
            _ => AlertDecision::Resolve,
        }
    }
}

/// Alert service for evaluation and operator actions
#[derive(Clone)]
pub struct AlertService {
    db: PgPool,
}

impl AlertService {
    /// Create a new AlertService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Evaluate a post-mutation level: open/refresh the matching alert, or
    /// resolve open alerts when stock has recovered above threshold.
    pub async fn evaluate_level(&self, level: &InventoryLevel) -> LedgerResult<Option<StockAlert>> {
        match AlertDecision::for_level(level) {
            AlertDecision::Open {
                alert_type,
                severity,
            } => {
                // An alert of the other type is superseded by this one.
                self.resolve_open_alerts(
                    level.id,
                    Some(other_type(alert_type)),
                    "superseded by new alert",
                )
                .await?;

                let alert = self.upsert_active_alert(level, alert_type, severity).await?;
                Ok(Some(alert))
            }
            AlertDecision::Resolve => {
                self.resolve_open_alerts(level.id, None, "stock recovered above threshold")
                    .await?;
                Ok(None)
            }
        }
    }

    /// Fire-and-log wrapper used by the stock operation engine.
    pub async fn evaluate_and_log(&self, level: &InventoryLevel) {
        if let Err(err) = self.evaluate_level(level).await {
            tracing::warn!(
                level_id = %level.id,
                warehouse_id = %level.warehouse_id,
                variant_id = %level.variant_id,
                error = %err,
                "alert evaluation failed; stock operation unaffected"
            );
        }
    }

    /// Open an active alert for the level, or refresh the observed quantity
    /// on the one already active (the partial unique index keeps at most
    /// one active alert per (level, type)).
    async fn upsert_active_alert(
        &self,
        level: &InventoryLevel,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> LedgerResult<StockAlert> {
        let alert = sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            INSERT INTO stock_alerts
                (business_id, inventory_level_id, alert_type, severity, status,
                 current_quantity, reorder_point, recommended_order_quantity)
            VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)
            ON CONFLICT (inventory_level_id, alert_type) WHERE status = 'active'
            DO UPDATE SET current_quantity = EXCLUDED.current_quantity,
                          severity = EXCLUDED.severity,
                          updated_at = NOW()
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(level.business_id)
        .bind(level.id)
        .bind(alert_type)
        .bind(severity)
        .bind(level.available_quantity)
        .bind(level.reorder_point)
        .bind(level.reorder_quantity)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(
            alert_id = %alert.id,
            level_id = %level.id,
            alert_type = alert_type.as_str(),
            current_quantity = level.available_quantity,
            "stock alert raised"
        );
        Ok(alert)
    }

    async fn resolve_open_alerts(
        &self,
        level_id: Uuid,
        only_type: Option<AlertType>,
        note: &str,
    ) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_alerts
            SET status = 'resolved', resolved_at = NOW(), resolution_note = $3, updated_at = NOW()
            WHERE inventory_level_id = $1
              AND status IN ('active', 'acknowledged')
              AND ($2::stock_alert_type IS NULL OR alert_type = $2)
            "#,
        )
        .bind(level_id)
        .bind(only_type)
        .bind(note)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Acknowledge an active alert.
    pub async fn acknowledge_alert(
        &self,
        business_id: Uuid,
        alert_id: Uuid,
        acknowledged_by: Uuid,
    ) -> LedgerResult<StockAlert> {
        sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            UPDATE stock_alerts
            SET status = 'acknowledged', acknowledged_by = $3, acknowledged_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND business_id = $2 AND status = 'active'
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .bind(business_id)
        .bind(acknowledged_by)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Active alert".to_string()))
    }

    /// Resolve an alert through explicit operator action.
    pub async fn resolve_alert(
        &self,
        business_id: Uuid,
        alert_id: Uuid,
        note: Option<String>,
    ) -> LedgerResult<StockAlert> {
        sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            UPDATE stock_alerts
            SET status = 'resolved', resolved_at = NOW(), resolution_note = $3,
                updated_at = NOW()
            WHERE id = $1 AND business_id = $2 AND status IN ('active', 'acknowledged')
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .bind(business_id)
        .bind(note)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Open alert".to_string()))
    }

    /// List open (active or acknowledged) alerts for a business.
    pub async fn list_open_alerts(&self, business_id: Uuid) -> LedgerResult<Vec<StockAlert>> {
        let alerts = sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM stock_alerts
            WHERE business_id = $1 AND status IN ('active', 'acknowledged')
            ORDER BY created_at DESC
            "#
        ))
        .bind(business_id)
        .fetch_all(&self.db)
        .await?;

        Ok(alerts)
    }

    /// List alerts for a business, optionally filtered by status.
    pub async fn list_alerts(
        &self,
        business_id: Uuid,
        status: Option<AlertStatus>,
    ) -> LedgerResult<Vec<StockAlert>> {
        let alerts = sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM stock_alerts
            WHERE business_id = $1 AND ($2::stock_alert_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(business_id)
        .bind(status)
        .fetch_all(&self.db)
        .await?;

        Ok(alerts)
    }

    /// Record that a notification was dispatched for an alert.
    pub async fn mark_notification_sent(&self, alert_id: Uuid) -> LedgerResult<StockAlert> {
        sqlx::query_as::<_, StockAlert>(&format!(
            r#"
            UPDATE stock_alerts
            SET notification_sent = TRUE, notification_sent_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Alert".to_string()))
    }
}

fn other_type(alert_type: AlertType) -> AlertType {
    match alert_type {
        AlertType::LowStock => AlertType::OutOfStock,
        AlertType::OutOfStock => AlertType::LowStock,
    }
}
