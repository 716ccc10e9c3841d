//! FIFO lot planning.
//!
//! The planner is pure: callers load the candidate lots (oldest first, with
//! row locks where the backend supports them), ask for a plan, and only then
//! write. A shortfall means nothing is written.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::entities::stock_lot;
use crate::entities::stock_transfer_item::LotDraw;

/// Remaining quantity of one lot, in consumption order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotBalance {
    pub lot_id: Uuid,
    pub qty_remaining: i64,
    pub unit_cost_cents: Option<i64>,
}

impl From<&stock_lot::Model> for LotBalance {
    fn from(lot: &stock_lot::Model) -> Self {
        Self {
            lot_id: lot.id,
            qty_remaining: lot.qty_remaining,
            unit_cost_cents: lot.unit_cost_cents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("requested {requested}, available {available}")]
pub struct Shortfall {
    pub requested: i64,
    pub available: i64,
}

/// Consumption order: `received_at`, then `created_at`, then id.
pub fn fifo_order(a: &stock_lot::Model, b: &stock_lot::Model) -> Ordering {
    a.received_at
        .cmp(&b.received_at)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Draws `qty` from `lots` front to back. Lots with nothing remaining are
/// skipped.
pub fn plan_consumption(lots: &[LotBalance], qty: i64) -> Result<Vec<LotDraw>, Shortfall> {
    let available = lots
        .iter()
        .fold(0i64, |sum, l| sum.saturating_add(l.qty_remaining.max(0)));
    if qty <= 0 || available < qty {
        return Err(Shortfall {
            requested: qty,
            available,
        });
    }

    let mut outstanding = qty;
    let mut draws = Vec::new();
    for lot in lots.iter().filter(|l| l.qty_remaining > 0) {
        if outstanding == 0 {
            break;
        }
        let take = lot.qty_remaining.min(outstanding);
        draws.push(LotDraw {
            lot_id: lot.lot_id,
            qty: take,
            unit_cost_cents: lot.unit_cost_cents,
        });
        outstanding -= take;
    }

    Ok(draws)
}

/// Quantity-weighted cost of the costed draws, rounded half up. `None` when
/// no draw carries a cost.
///
/// Sums are kept in `i128`; the average of `i64` costs always fits back.
pub fn weighted_unit_cost(draws: &[LotDraw]) -> Option<i64> {
    let (value, qty) = draws
        .iter()
        .filter_map(|d| {
            d.unit_cost_cents
                .map(|cost| (i128::from(cost) * i128::from(d.qty), i128::from(d.qty)))
        })
        .fold((0i128, 0i128), |(v, q), (dv, dq)| (v + dv, q + dq));

    if qty == 0 {
        None
    } else {
        i64::try_from((value + qty / 2) / qty).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn balance(qty: i64, cost: Option<i64>) -> LotBalance {
        LotBalance {
            lot_id: Uuid::new_v4(),
            qty_remaining: qty,
            unit_cost_cents: cost,
        }
    }

    #[test]
    fn draws_oldest_lots_first() {
        let lots = vec![balance(5, Some(100)), balance(10, Some(200))];
        let draws = plan_consumption(&lots, 8).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].lot_id, draws[0].qty), (lots[0].lot_id, 5));
        assert_eq!((draws[1].lot_id, draws[1].qty), (lots[1].lot_id, 3));
        assert_eq!(weighted_unit_cost(&draws), Some((500 + 600 + 4) / 8));
    }

    #[test]
    fn exhausted_lots_are_skipped() {
        let lots = vec![balance(0, Some(1)), balance(4, None)];
        let draws = plan_consumption(&lots, 4).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].lot_id, lots[1].lot_id);
        assert_eq!(weighted_unit_cost(&draws), None);
    }

    #[test]
    fn shortfall_reports_availability() {
        let lots = vec![balance(2, None), balance(3, None)];
        assert_eq!(
            plan_consumption(&lots, 6),
            Err(Shortfall {
                requested: 6,
                available: 5
            })
        );
        assert!(plan_consumption(&[], 1).is_err());
    }

    #[test]
    fn weighted_cost_handles_extreme_values() {
        let draws = vec![
            LotDraw { lot_id: Uuid::new_v4(), qty: i64::MAX / 2, unit_cost_cents: Some(i64::MAX) },
            LotDraw { lot_id: Uuid::new_v4(), qty: i64::MAX / 2, unit_cost_cents: Some(i64::MAX - 2) },
        ];
        assert_eq!(weighted_unit_cost(&draws), Some(i64::MAX - 1));

        let lots = vec![balance(i64::MAX, None), balance(i64::MAX, None)];
        assert_eq!(plan_consumption(&lots, i64::MAX).map(|d| d.len()), Ok(1));
    }

    #[test]
    fn orders_by_received_then_created_then_id() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let lot = |received: i64, created: i64, id: u128| stock_lot::Model {
            id: Uuid::from_u128(id),
            tenant_id: Uuid::nil(),
            branch_id: Uuid::nil(),
            product_id: Uuid::nil(),
            qty_received: 1,
            qty_remaining: 1,
            unit_cost_cents: None,
            source_ref: None,
            received_at: base + Duration::hours(received),
            created_at: base + Duration::hours(created),
        };

        let mut lots = vec![lot(2, 0, 1), lot(1, 5, 2), lot(1, 3, 4), lot(1, 3, 3)];
        lots.sort_by(fifo_order);
        let ids: Vec<u128> = lots.iter().map(|l| l.id.as_u128()).collect();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }

    proptest! {
        #[test]
        fn plan_takes_exactly_the_requested_quantity(
            qtys in prop::collection::vec(0i64..50, 1..8),
            want in 1i64..200,
        ) {
            let lots: Vec<LotBalance> = qtys.iter().map(|q| balance(*q, Some(10))).collect();
            let available: i64 = qtys.iter().sum();

            match plan_consumption(&lots, want) {
                Ok(draws) => {
                    prop_assert!(want <= available);
                    prop_assert_eq!(draws.iter().map(|d| d.qty).sum::<i64>(), want);
                    for draw in &draws {
                        let lot = lots.iter().find(|l| l.lot_id == draw.lot_id).unwrap();
                        prop_assert!(draw.qty > 0 && draw.qty <= lot.qty_remaining);
                    }
                    // Every lot before the last drawn one is emptied.
                    let last = draws.last().unwrap().lot_id;
                    let last_idx = lots.iter().position(|l| l.lot_id == last).unwrap();
                    for (idx, lot) in lots.iter().enumerate().take(last_idx) {
                        let drawn = draws.iter().find(|d| d.lot_id == lot.lot_id).map_or(0, |d| d.qty);
                        prop_assert_eq!(drawn, lot.qty_remaining, "lot {} not emptied", idx);
                    }
                }
                Err(shortfall) => {
                    prop_assert!(want > available);
                    prop_assert_eq!(shortfall.available, available);
                }
            }
        }

        #[test]
        fn weighted_cost_stays_within_lot_costs(
            costs in prop::collection::vec((1i64..20, 0i64..10_000), 1..6),
        ) {
            let draws: Vec<LotDraw> = costs
                .iter()
                .map(|(qty, cost)| LotDraw { lot_id: Uuid::new_v4(), qty: *qty, unit_cost_cents: Some(*cost) })
                .collect();
            let min = costs.iter().map(|c| c.1).min().unwrap();
            let max = costs.iter().map(|c| c.1).max().unwrap();
            let avg = weighted_unit_cost(&draws).unwrap();
            prop_assert!(avg >= min && avg <= max);
        }
    }
}
