//! Stock operation engine tests
//!
//! Tests for the ledger's core invariants:
//! - Ledger replay: movement history reconstructs the available quantity
//! - Reserve/release symmetry and the deduct-at-reserve, audit-at-confirm split
//! - Transfer conservation across two levels
//! - No operation drives any quantity bucket negative

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use inventory_ledger::error::LedgerError;
use inventory_ledger::models::{InventoryLevel, MovementDraft, MovementType};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A fresh zeroed level with the reference defaults (reorder point 10,
/// reorder quantity 50).
fn fresh_level() -> InventoryLevel {
    InventoryLevel::empty(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        10,
        50,
    )
}

/// Replay a movement history from zero, as a reconciliation job would.
fn replay(drafts: &[MovementDraft]) -> i64 {
    drafts.iter().map(|d| d.quantity_change).sum()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_receive_increases_available_and_drafts_purchase() {
        let mut level = fresh_level();
        let draft = level.receive(100, Some(dec("5.0"))).unwrap();

        assert_eq!(level.available_quantity, 100);
        assert_eq!(draft.movement_type, MovementType::Purchase);
        assert_eq!(draft.quantity_before, 0);
        assert_eq!(draft.quantity_after, 100);
        assert_eq!(draft.quantity_change, 100);
        assert_eq!(draft.total_cost, Some(dec("500.0")));
    }

    #[test]
    fn test_receive_rejects_non_positive_quantity() {
        let mut level = fresh_level();
        assert!(matches!(
            level.receive(0, None),
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            level.receive(-5, None),
            Err(LedgerError::Validation { .. })
        ));
        // Rejected before any mutation
        assert_eq!(level.available_quantity, 0);
    }

    #[test]
    fn test_weighted_average_cost_on_receive() {
        let mut level = fresh_level();
        // 100 units at 20, then 50 units at 30: (2000 + 1500) / 150 = 23.33...
        level.receive(100, Some(dec("20"))).unwrap();
        level.receive(50, Some(dec("30"))).unwrap();

        assert!(level.average_cost > dec("23.0") && level.average_cost < dec("24.0"));
        assert_eq!(
            level.total_value,
            level.average_cost * Decimal::from(level.available_quantity)
        );
    }

    #[test]
    fn test_receive_without_cost_keeps_average() {
        let mut level = fresh_level();
        level.receive(100, Some(dec("8"))).unwrap();
        level.receive(20, None).unwrap();

        assert_eq!(level.average_cost, dec("8"));
        assert_eq!(level.available_quantity, 120);
    }

    #[test]
    fn test_deduct_rejects_insufficient_stock() {
        let mut level = fresh_level();
        level.receive(50, None).unwrap();

        let err = level.deduct(60).unwrap_err();
        match err {
            LedgerError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 60);
                assert_eq!(available, 50);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
        // No partial state
        assert_eq!(level.available_quantity, 50);
    }

    #[test]
    fn test_add_then_deduct_restores_available() {
        let mut level = fresh_level();
        level.receive(80, None).unwrap();
        let before = level.available_quantity;

        level.receive(25, None).unwrap();
        level.deduct(25).unwrap();

        assert_eq!(level.available_quantity, before);
    }

    #[test]
    fn test_adjust_rejects_zero_delta_and_negative_result() {
        let mut level = fresh_level();
        level.receive(10, None).unwrap();

        assert!(matches!(
            level.adjust(0),
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            level.adjust(-11),
            Err(LedgerError::InsufficientStock { .. })
        ));

        let draft = level.adjust(-3).unwrap();
        assert_eq!(draft.movement_type, MovementType::Adjustment);
        assert_eq!(level.available_quantity, 7);
    }

    #[test]
    fn test_reserve_then_release_is_noop() {
        let mut level = fresh_level();
        level.receive(100, None).unwrap();

        level.reserve(30).unwrap();
        assert_eq!(level.available_quantity, 70);
        assert_eq!(level.reserved_quantity, 30);

        level.release(30).unwrap();
        assert_eq!(level.available_quantity, 100);
        assert_eq!(level.reserved_quantity, 0);
    }

    #[test]
    fn test_reserve_rejects_insufficient_available() {
        let mut level = fresh_level();
        level.receive(20, None).unwrap();

        assert!(matches!(
            level.reserve(21),
            Err(LedgerError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn test_release_rejects_more_than_reserved() {
        let mut level = fresh_level();
        level.receive(100, None).unwrap();
        level.reserve(10).unwrap();

        assert!(matches!(
            level.release(11),
            Err(LedgerError::InsufficientReserved { .. })
        ));
    }

    #[test]
    fn test_confirm_sale_clears_reservation_without_touching_available() {
        let mut level = fresh_level();
        level.receive(100, None).unwrap();
        level.reserve(30).unwrap();

        let available_before_confirm = level.available_quantity;
        let draft = level.confirm_sale(30).unwrap();

        assert_eq!(level.reserved_quantity, 0);
        assert_eq!(level.available_quantity, available_before_confirm);
        assert_eq!(draft.movement_type, MovementType::Sale);
        // quantity_before is the pre-reservation total
        assert_eq!(draft.quantity_before, 100);
        assert_eq!(draft.quantity_after, 70);
        assert_eq!(draft.quantity_change, -30);
    }

    #[test]
    fn test_confirm_sale_without_reservation_is_rejected() {
        let mut level = fresh_level();
        level.receive(100, None).unwrap();

        // No reservation outstanding: confirming must not double-count
        assert!(matches!(
            level.confirm_sale(10),
            Err(LedgerError::InsufficientReserved { .. })
        ));
        assert_eq!(level.available_quantity, 100);
    }

    #[test]
    fn test_double_confirm_is_rejected() {
        let mut level = fresh_level();
        level.receive(100, None).unwrap();
        level.reserve(30).unwrap();
        level.confirm_sale(30).unwrap();

        assert!(matches!(
            level.confirm_sale(30),
            Err(LedgerError::InsufficientReserved { .. })
        ));
    }

    #[test]
    fn test_transfer_conserves_total_stock() {
        let mut source = fresh_level();
        let mut destination = fresh_level();
        source.receive(100, Some(dec("4"))).unwrap();

        let out = source.transfer_out(40).unwrap();
        let inb = destination.transfer_in(40, source.average_cost).unwrap();

        assert_eq!(source.available_quantity, 60);
        assert_eq!(destination.available_quantity, 40);
        assert_eq!(source.available_quantity + destination.available_quantity, 100);
        assert_eq!(out.movement_type, MovementType::TransferOut);
        assert_eq!(inb.movement_type, MovementType::TransferIn);
        assert_eq!(out.quantity_change, -inb.quantity_change);
        // Average cost carried forward to the destination
        assert_eq!(destination.average_cost, dec("4"));
    }

    #[test]
    fn test_transfer_out_rejects_insufficient_source() {
        let mut source = fresh_level();
        source.receive(5, None).unwrap();

        assert!(matches!(
            source.transfer_out(6),
            Err(LedgerError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn test_movement_draft_balance_identity() {
        let mut level = fresh_level();
        let drafts = [
            level.receive(100, Some(dec("5"))).unwrap(),
            level.deduct(30).unwrap(),
            level.adjust(-20).unwrap(),
            level.adjust(7).unwrap(),
        ];

        for draft in &drafts {
            assert_eq!(draft.quantity_after, draft.quantity_before + draft.quantity_change);
        }
    }

    #[test]
    fn test_stock_flags_track_thresholds() {
        let mut level = fresh_level();
        assert!(level.is_out_of_stock);

        level.receive(100, None).unwrap();
        assert!(!level.is_out_of_stock);
        assert!(!level.is_low_stock);

        level.deduct(95).unwrap();
        // available = 5 <= reorder point 10
        assert!(level.is_low_stock);
        assert!(!level.is_out_of_stock);

        level.deduct(5).unwrap();
        assert!(level.is_out_of_stock);
    }

    #[test]
    fn test_fresh_level_flags_are_consistent() {
        // A lazily created level must satisfy the flag invariants before
        // its first successful mutation: zero available is out of stock
        // and, with a reorder point set, also low stock.
        let level = fresh_level();
        assert!(level.is_out_of_stock);
        assert!(level.is_low_stock);

        // A rejected operation leaves the fresh level untouched and the
        // flags still matching the thresholds.
        let mut level = fresh_level();
        assert!(level.deduct(1).is_err());
        assert_eq!(level.is_out_of_stock, level.available_quantity == 0);
        assert_eq!(
            level.is_low_stock,
            level.available_quantity <= level.reorder_point.unwrap()
        );
    }

    /// The example scenario from the design review: W1/W2, variant X,
    /// reorder point 10, reorder quantity 50.
    #[test]
    fn test_reference_scenario() {
        let mut w1 = fresh_level();
        let mut w2 = fresh_level();
        let mut history = Vec::new();

        // 1. add 100 at unit cost 5
        let m1 = w1.receive(100, Some(dec("5"))).unwrap();
        assert_eq!(w1.available_quantity, 100);
        assert_eq!((m1.quantity_before, m1.quantity_after), (0, 100));
        history.push(m1);

        // 2. reserve 30 for order O1
        w1.reserve(30).unwrap();
        assert_eq!((w1.available_quantity, w1.reserved_quantity), (70, 30));

        // 3. confirm sale of 30
        let m2 = w1.confirm_sale(30).unwrap();
        assert_eq!((w1.available_quantity, w1.reserved_quantity), (70, 0));
        assert_eq!((m2.quantity_before, m2.quantity_after), (100, 70));
        history.push(m2);

        // 4. deduct 65: available drops to 5, below the reorder point
        let m3 = w1.deduct(65).unwrap();
        assert_eq!(w1.available_quantity, 5);
        assert!(w1.is_low_stock);
        assert_eq!((m3.quantity_before, m3.quantity_after), (70, 5));
        history.push(m3);

        // 5. transfer 5 to W2: W1 empties, W2 gains 5
        let m4 = w1.transfer_out(5).unwrap();
        let m5 = w2.transfer_in(5, w1.average_cost).unwrap();
        assert_eq!(w1.available_quantity, 0);
        assert!(w1.is_out_of_stock);
        assert_eq!(w2.available_quantity, 5);
        history.push(m4);

        // Replaying W1's history reconstructs its available quantity
        assert_eq!(replay(&history), w1.available_quantity);
        assert_eq!(m5.quantity_change, 5);
    }

    #[test]
    fn test_concurrent_deducts_exactly_floor_succeed() {
        // N deducts of q against M available: exactly floor(M/q) succeed
        // once serialized, and available never goes negative.
        let (m, q, n) = (100i64, 30i64, 8usize);
        let mut level = fresh_level();
        level.receive(m, None).unwrap();

        let mut successes = 0;
        for _ in 0..n {
            match level.deduct(q) {
                Ok(_) => successes += 1,
                Err(LedgerError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
            assert!(level.available_quantity >= 0);
        }

        assert_eq!(successes, m / q);
        assert_eq!(level.available_quantity, m % q);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for valid operation quantities
    fn quantity_strategy() -> impl Strategy<Value = i64> {
        1i64..=1000
    }

    /// Strategy for unit costs
    fn cost_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100000).prop_map(|n| Decimal::new(n, 2)) // 0.01 to 1000.00
    }

    /// An operation against a single level
    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Deduct(i64),
        Adjust(i64),
        Reserve(i64),
        Release(i64),
        Confirm(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            quantity_strategy().prop_map(Op::Add),
            quantity_strategy().prop_map(Op::Deduct),
            (-200i64..=200).prop_map(Op::Adjust),
            quantity_strategy().prop_map(Op::Reserve),
            quantity_strategy().prop_map(Op::Release),
            quantity_strategy().prop_map(Op::Confirm),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Ledger replay: after any sequence of operations, summing the
        /// drafted movements from zero equals available + reserved (the
        /// outstanding reservations have no movement yet).
        #[test]
        fn prop_ledger_replay_reconstructs_stock(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut level = fresh_level();
            let mut history = Vec::new();

            for op in ops {
                let result = match op {
                    Op::Add(q) => level.receive(q, None).map(Some),
                    Op::Deduct(q) => level.deduct(q).map(Some),
                    Op::Adjust(d) => level.adjust(d).map(Some),
                    Op::Reserve(q) => level.reserve(q).map(|_| None),
                    Op::Release(q) => level.release(q).map(|_| None),
                    Op::Confirm(q) => level.confirm_sale(q).map(Some),
                };
                if let Ok(Some(draft)) = result {
                    history.push(draft);
                }
            }

            prop_assert_eq!(replay(&history), level.available_quantity + level.reserved_quantity);
        }

        /// Quantity buckets never go negative under any operation sequence.
        #[test]
        fn prop_buckets_never_negative(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut level = fresh_level();

            for op in ops {
                let _ = match op {
                    Op::Add(q) => level.receive(q, None).map(|_| ()),
                    Op::Deduct(q) => level.deduct(q).map(|_| ()),
                    Op::Adjust(d) => level.adjust(d).map(|_| ()),
                    Op::Reserve(q) => level.reserve(q),
                    Op::Release(q) => level.release(q),
                    Op::Confirm(q) => level.confirm_sale(q).map(|_| ()),
                };
                prop_assert!(level.available_quantity >= 0);
                prop_assert!(level.reserved_quantity >= 0);
            }
        }

        /// Every successful draft satisfies the before/after identity.
        #[test]
        fn prop_draft_balance_identity(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut level = fresh_level();

            for op in ops {
                let draft = match op {
                    Op::Add(q) => level.receive(q, None).ok(),
                    Op::Deduct(q) => level.deduct(q).ok(),
                    Op::Adjust(d) => level.adjust(d).ok(),
                    Op::Confirm(q) => level.confirm_sale(q).ok(),
                    Op::Reserve(q) => { let _ = level.reserve(q); None }
                    Op::Release(q) => { let _ = level.release(q); None }
                };
                if let Some(d) = draft {
                    prop_assert_eq!(d.quantity_after, d.quantity_before + d.quantity_change);
                }
            }
        }

        /// add then deduct of the same quantity restores available.
        #[test]
        fn prop_add_deduct_identity(start in 0i64..=1000, q in quantity_strategy()) {
            let mut level = fresh_level();
            if start > 0 {
                level.receive(start, None).unwrap();
            }

            level.receive(q, None).unwrap();
            level.deduct(q).unwrap();

            prop_assert_eq!(level.available_quantity, start);
        }

        /// reserve(q) then release(q) is a no-op on both buckets.
        #[test]
        fn prop_reserve_release_noop(start in 1i64..=1000, q in quantity_strategy()) {
            let mut level = fresh_level();
            level.receive(start, None).unwrap();

            if q <= start {
                level.reserve(q).unwrap();
                level.release(q).unwrap();
                prop_assert_eq!(level.available_quantity, start);
                prop_assert_eq!(level.reserved_quantity, 0);
            } else {
                prop_assert!(level.reserve(q).is_err());
            }
        }

        /// reserve(q) then confirm(q) reduces reserved by q, leaves
        /// available at its post-reserve value, and drafts one SALE.
        #[test]
        fn prop_reserve_confirm_split(start in 1i64..=1000, q in quantity_strategy()) {
            let mut level = fresh_level();
            level.receive(start, None).unwrap();

            if q <= start {
                level.reserve(q).unwrap();
                let available_after_reserve = level.available_quantity;

                let draft = level.confirm_sale(q).unwrap();
                prop_assert_eq!(level.reserved_quantity, 0);
                prop_assert_eq!(level.available_quantity, available_after_reserve);
                prop_assert_eq!(draft.movement_type, MovementType::Sale);
                prop_assert_eq!(draft.quantity_before, start);
            }
        }

        /// Transfers conserve total stock across the two levels.
        #[test]
        fn prop_transfer_conservation(
            source_start in 1i64..=1000,
            dest_start in 0i64..=1000,
            q in quantity_strategy()
        ) {
            let mut source = fresh_level();
            let mut destination = fresh_level();
            source.receive(source_start, None).unwrap();
            if dest_start > 0 {
                destination.receive(dest_start, None).unwrap();
            }
            let total = source_start + dest_start;

            if q <= source_start {
                source.transfer_out(q).unwrap();
                destination.transfer_in(q, source.average_cost).unwrap();
            } else {
                prop_assert!(source.transfer_out(q).is_err());
            }

            prop_assert_eq!(
                source.available_quantity + destination.available_quantity,
                total
            );
        }

        /// Weighted average cost stays between the cheapest and priciest
        /// receipts.
        #[test]
        fn prop_average_cost_bounded(
            receipts in prop::collection::vec((quantity_strategy(), cost_strategy()), 2..10)
        ) {
            let mut level = fresh_level();
            for (q, cost) in &receipts {
                level.receive(*q, Some(*cost)).unwrap();
            }

            let min_cost = receipts.iter().map(|(_, c)| *c).min().unwrap();
            let max_cost = receipts.iter().map(|(_, c)| *c).max().unwrap();
            prop_assert!(level.average_cost >= min_cost);
            prop_assert!(level.average_cost <= max_cost);
        }

        /// Derived flags always match the threshold predicates.
        #[test]
        fn prop_flags_match_quantities(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut level = fresh_level();

            for op in ops {
                let _ = match op {
                    Op::Add(q) => level.receive(q, None).map(|_| ()),
                    Op::Deduct(q) => level.deduct(q).map(|_| ()),
                    Op::Adjust(d) => level.adjust(d).map(|_| ()),
                    Op::Reserve(q) => level.reserve(q),
                    Op::Release(q) => level.release(q),
                    Op::Confirm(q) => level.confirm_sale(q).map(|_| ()),
                };

                prop_assert_eq!(level.is_out_of_stock, level.available_quantity == 0);
                let expect_low = match level.reorder_point {
                    Some(point) => level.available_quantity <= point,
                    None => false,
                };
                prop_assert_eq!(level.is_low_stock, expect_low);
            }
        }
    }
}

// ============================================================================
// Retry Helper
// ============================================================================

#[cfg(test)]
mod retry_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use inventory_ledger::services::stock::with_retry;

    #[tokio::test]
    async fn test_with_retry_retries_transaction_conflicts() {
        let calls = AtomicU32::new(0);

        let result = with_retry(3, Duration::from_millis(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(LedgerError::TransactionConflict(
                        "could not serialize access".to_string(),
                    ))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LedgerError::TransactionConflict("conflict".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::TransactionConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_business_conflicts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LedgerError::InsufficientStock {
                    requested: 10,
                    available: 5,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
